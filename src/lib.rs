// ABOUTME: Root library module for the courier binary
// ABOUTME: Wires configuration, transports and the router into a running service

pub mod app;
pub mod platform;

// Re-export platform-agnostic modules from courier-core
pub use courier_core::config;
pub use courier_core::paths;
