//! Booking and payment status transitions with time-slot conflict detection.
//!
//! The host drives everything through [`engine::Engine`]: manual booking
//! changes, payment updates (admin, gateway callback, sweep) and read-only
//! availability queries. Storage, timers and event delivery stay with the
//! host behind the traits in [`ports`].

pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod period;
pub mod period_set;
pub mod ports;
pub mod reaper;
pub mod status;
pub mod store;
