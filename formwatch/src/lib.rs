//! Form-status monitor.
//!
//! Polls a remote form-status endpoint from two independent channels and
//! raises a persistent, acknowledgeable alarm exactly once per open
//! episode.

pub mod alarm;
pub mod api;
pub mod api_client;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod error;
pub mod outputs;
pub mod poller;
pub mod session;
pub mod slot;
pub mod status;
pub mod store;
pub mod tracing;
