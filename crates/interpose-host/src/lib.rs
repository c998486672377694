//! Interpose host bridge: runs a patched module under `wasmi` and turns
//! hook calls into [`PacketEvent`]s.
//!
//! ```text
//! HostBridge::new → add_listener / linker_mut / on_ready
//!                 → instantiate(bytes): patch → bind hook → start
//!                 → HookedInstance { send, recv, read_i32, listeners }
//! ```
//!
//! The hook bound under the configured import name receives
//! `(tag, ptr, len)`, copies `len` bytes out of linear memory and
//! dispatches them to every listener whose filter matches. The call is
//! suppressed when any listener returns [`Verdict::Suppress`].
//!
//! [`HookedInstance::send`] and [`HookedInstance::recv`] go the other way:
//! the buffer is copied into memory obtained from the module's own
//! allocator, the exported target is called, and the allocation is freed.

mod bridge;
mod error;
mod events;
pub mod memory;

pub use bridge::{HookState, HookedInstance, HostBridge};
pub use error::{BridgeError, BridgeResult};
pub use events::{EventFilter, ListenerId, PacketEvent, Verdict};

pub use interpose_types::{BridgeConfig, HookTag};
