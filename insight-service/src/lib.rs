pub mod analyzers;
pub mod backends;
pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod sessions;
pub mod startup;
