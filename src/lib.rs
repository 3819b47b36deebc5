pub mod app;
pub mod clock;
pub mod config;
pub mod domain;
pub mod event_sourcing;
pub mod metrics;
pub mod services;
pub mod utils;
