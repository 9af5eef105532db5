//! Local control API served by the daemon.

pub mod server;
mod v0;

pub use server::{SharedState, router, serve};
