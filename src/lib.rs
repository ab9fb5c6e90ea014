pub mod cache;
pub mod clock;
pub mod config;
pub mod duration;
pub mod error;
pub mod market_data;
pub mod refresh;
pub mod scheduler;
pub mod store;
