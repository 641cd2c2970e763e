//! Shared test helpers for `calsync-core` integration tests.
//!
//! These helpers provide an in-memory calendar and in-memory stores so the
//! orchestrator and service tests can focus on behaviour instead of
//! boilerplate.

#![allow(dead_code)]

pub mod calendar;
pub mod repositories;

use chrono::{DateTime, TimeZone, Utc};

/// Reference "now" for every test; events are placed a few days later so
/// they sit inside the lookahead window.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).single().unwrap_or_default()
}

pub fn on_day(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, hour, minute, 0).single().unwrap_or_default()
}
