pub mod cart;
pub mod config;
pub mod error;
pub mod event;
pub mod normalize;
pub mod repository;
pub mod schedule;
pub mod settings;
pub mod template;
pub mod transport;
