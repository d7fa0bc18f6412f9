//! Connectivity state types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_domain_status_conversions;

/// Transport the device is currently reachable over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    None,
    Wifi,
    Cellular,
    Ethernet,
    #[default]
    Unknown,
}

impl_domain_status_conversions!(ConnectionKind {
    None => "none",
    Wifi => "wifi",
    Cellular => "cellular",
    Ethernet => "ethernet",
    Unknown => "unknown",
});

/// Settled device reachability
///
/// Transient: never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub is_online: bool,
    pub connection_kind: ConnectionKind,
    pub changed_at: DateTime<Utc>,
}

impl ConnectivityState {
    /// Initial state before the first settled reading
    pub fn offline(at: DateTime<Utc>) -> Self {
        Self { is_online: false, connection_kind: ConnectionKind::None, changed_at: at }
    }

    /// Whether a reading differs from this state in a way listeners care about
    pub fn differs_from(&self, is_online: bool, kind: ConnectionKind) -> bool {
        self.is_online != is_online || self.connection_kind != kind
    }
}
