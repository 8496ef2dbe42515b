//! Mediagate - media intake, conversion tracking and signed delivery
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod conversion;
pub mod delivery;
pub mod events;
pub mod intake;
pub mod server;
pub mod thumbnails;
pub mod variants;
