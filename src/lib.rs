pub mod cache;
pub mod config;
pub mod detection;
pub mod fetch;
pub mod logging;
pub mod notify;
pub mod version;
