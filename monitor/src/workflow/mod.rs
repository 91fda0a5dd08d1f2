pub mod config;
pub mod frontend;
pub mod runner;
