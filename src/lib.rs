pub mod acquisition;
pub mod cli;
pub mod config;
pub mod logging;
pub mod protocol;
pub mod provider;
pub mod server;
pub mod service;
pub mod session;
