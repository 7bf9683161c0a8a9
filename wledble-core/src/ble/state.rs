//! Link state machine for the display connection.
//!
//! Models the lifecycle of the single logical BLE connection, with
//! validated transitions that return `Result` instead of panicking.

use std::time::Instant;

use crate::error::BridgeError;

// ── LinkState ────────────────────────────────────────────────────

/// The current phase of the display connection.
///
/// ```text
///  Unbound ──bind──► Disconnected ◄──────────────┐
///                       │                        │
///                    connect          disconnect / link lost
///                       ▼                        │
///                   Connected ───────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No device address has been set.
    #[default]
    Unbound,

    /// Address known, no live link.
    Disconnected,

    /// Live link to the device.
    Connected {
        /// When the link was established.
        since: Instant,
    },
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbound => write!(f, "Unbound"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected { .. } => write!(f, "Connected"),
        }
    }
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_bound(&self) -> bool {
        !matches!(self, Self::Unbound)
    }

    /// How long the link has been up. `None` unless connected.
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// An address was set.
    ///
    /// Valid from any state; a live link is left as is.
    pub fn bind(&mut self) {
        if let Self::Unbound = self {
            *self = Self::Disconnected;
        }
    }

    /// A link was established.
    ///
    /// Valid from: `Disconnected`.
    pub fn connected(&mut self) -> Result<(), BridgeError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            Self::Unbound => Err(BridgeError::AddressNotSet),
            Self::Connected { .. } => Ok(()),
        }
    }

    /// The link was closed or lost.
    ///
    /// Idempotent; an unbound state stays unbound.
    pub fn disconnected(&mut self) {
        if let Self::Connected { .. } = self {
            *self = Self::Disconnected;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
