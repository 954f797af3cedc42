pub mod api;
pub mod clock;
pub mod config;
pub mod control;
pub mod detector;
pub mod error;
pub mod indicator;
pub mod radio;
pub mod schedule;
pub mod sensor;
pub mod state;
