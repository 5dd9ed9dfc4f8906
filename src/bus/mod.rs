pub mod relay;
pub mod telemetry;
