pub mod api;
pub mod client;
pub mod config;
pub mod core;
pub mod logger;
pub mod models;
pub mod services;
pub mod utils;
