pub mod comms;
pub mod dispatch;
pub mod security;
pub mod service;
pub mod utils;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
