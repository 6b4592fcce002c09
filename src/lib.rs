pub mod app;
pub mod cache;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod store;
pub mod timezone;

pub use app::{App, AppError};
pub use config::Config;
pub use engine::AvailabilityError;
