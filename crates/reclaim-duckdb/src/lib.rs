pub mod actions;
pub mod backend;
pub mod carts;
pub mod conversions;
pub mod events;
pub mod repository_impl;
pub(crate) mod rows;
pub mod schema;
pub mod settings;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `reclaim_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
