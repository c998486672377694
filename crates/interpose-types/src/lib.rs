//! Shared types for the interpose workspace.
//!
//! This crate defines the configuration surface of a patch (which
//! functions to intercept, under which names the hook is imported and
//! the targets are exported), the hook direction tag, and the value-kind
//! signatures used by the patch engine and the host bridge.

mod config;
mod signature;
mod tag;

pub use config::{
    BridgeConfig, ConfigError, HookImport, ParamSelection, PatchConfig, TargetConfig,
};
pub use signature::{Signature, ValueKind};
pub use tag::HookTag;
