pub mod app;
pub mod auth;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod routes;
pub mod scheduler;
pub mod state;
