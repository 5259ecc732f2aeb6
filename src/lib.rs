//! Slidegate - Sliding Window Admission Control
//!
//! This crate implements per-key admission control with a true sliding time
//! window: each key may have at most `max_requests` admitted events within
//! any `window_size` span. It also ships a message stream simulation that
//! drives the limiter the way a chat service would.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod simulation;
