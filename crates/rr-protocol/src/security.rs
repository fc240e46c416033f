//! Transport security mode, selected identically at both ends.

use serde::Deserialize;

/// Transport security for relay <-> endpoint connections.
///
/// `Tcp` disables encryption entirely and is unsafe on untrusted networks;
/// it exists for loopback testing and fully trusted fabrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Security {
    #[default]
    Tls,
    Tcp,
}
