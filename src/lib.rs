pub mod arguments;
pub mod config;
pub mod errors; // Structured error handling
pub mod logger;
pub mod reading;
pub mod store;
pub mod webserver;
