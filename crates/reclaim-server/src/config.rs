/// Re-export `Config` from `reclaim-core`; env parsing lives there so tests
/// can build one without the server crate.
pub use reclaim_core::config::Config;
