//! CLI command implementations.

pub mod cache;
pub mod database;
pub mod dev;
pub mod doctor;
pub mod init;
pub mod module;
