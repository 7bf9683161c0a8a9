//! # Gateway
//!
//! | Module    | Purpose                                                 |
//! |-----------|---------------------------------------------------------|
//! | `service` | UDP listener, bounded queue and single frame worker     |
//! | `stats`   | Atomic counters and the `GatewayStats` snapshot         |

pub mod service;
pub mod stats;

pub use service::{Gateway, GatewayOptions, StartOutcome};
pub use stats::{GatewayStats, StatsCounters};
