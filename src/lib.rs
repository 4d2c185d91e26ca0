//! Shipload - manifest-driven module loader
//!
//! Fetches versioned, content-addressed code bundles through an ordered
//! chain of sources (embedded snapshot, local cache, network), verifies them
//! against their manifest digests, and hands them to an execution runtime in
//! dependency order. A failed update never replaces a working version.

pub mod cache;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod fetch;
pub mod loader;
pub mod manifest;
pub mod runtime;
pub mod transport;
pub mod ui;

#[cfg(test)]
mod testing;

pub use error::{ShiploadError, ShiploadResult};
