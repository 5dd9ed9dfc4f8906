pub mod api;
pub mod bus;
pub mod clock;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod estimation;
pub mod events;
pub mod sensor;
pub mod state;
pub mod status;
pub mod store;
