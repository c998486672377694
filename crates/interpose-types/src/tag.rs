use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction discriminator passed as the first hook argument.
///
/// A single imported hook serves both patched functions; the tag tells
/// the host which one called it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookTag {
    /// Incoming data (the receive routine). Wire value `0`.
    Receive,
    /// Outgoing data (the send routine). Wire value `1`.
    Send,
}

impl HookTag {
    /// Both tags, in wire-value order.
    pub const ALL: [HookTag; 2] = [HookTag::Receive, HookTag::Send];

    /// The `i32` constant pushed by the injected prologue.
    pub fn wire_value(self) -> i32 {
        match self {
            HookTag::Receive => 0,
            HookTag::Send => 1,
        }
    }

    /// Decode a tag received from a running module.
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(HookTag::Receive),
            1 => Some(HookTag::Send),
            _ => None,
        }
    }

    /// Event name seen by listeners: `clientbound` for received data,
    /// `serverbound` for sent data.
    pub fn event_name(self) -> &'static str {
        match self {
            HookTag::Receive => "clientbound",
            HookTag::Send => "serverbound",
        }
    }
}

impl fmt::Display for HookTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookTag::Receive => write!(f, "receive"),
            HookTag::Send => write!(f, "send"),
        }
    }
}
