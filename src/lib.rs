pub mod cli;
pub mod config;
pub mod mcp;
pub mod memory;
pub mod session;
pub mod telemetry;
