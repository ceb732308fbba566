pub mod config;
pub mod error;
pub mod identity;
pub mod backend;
pub mod render;
pub mod server;
