pub mod admission;
pub mod audit_log;
pub mod credential;
pub mod redis_store;
pub mod replay;
pub mod token;
