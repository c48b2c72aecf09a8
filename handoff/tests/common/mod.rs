#![allow(dead_code)]

use std::time::Duration;

/// Time given to a spawned thread to reach its blocking call.
pub const SETTLE: Duration = Duration::from_millis(50);
pub const SHORT_TIMEOUT: Duration = Duration::from_millis(100);
pub const LONG_TIMEOUT: Duration = Duration::from_secs(5);
pub const ITEMS_LOW: usize = 50;
pub const ITEMS_MEDIUM: usize = 500;
pub const ITEMS_HIGH: usize = 10_000;

pub const BOTH_MODES: [fibre_handoff::Fairness; 2] = [fibre_handoff::Fairness::Unfair, fibre_handoff::Fairness::Fair];
