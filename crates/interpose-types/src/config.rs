//! Patch and bridge configuration.
//!
//! Every value here is a pre-known constant for one build of the target
//! module; nothing is discovered at runtime. [`PatchConfig::default`] and
//! [`BridgeConfig::default`] carry the values for the build the hook was
//! written against.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::HookTag;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed or produced.
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Module and field name under which the hook function is imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookImport {
    pub module: String,
    pub field: String,
}

impl Default for HookImport {
    fn default() -> Self {
        Self {
            module: "hook".to_string(),
            field: "mainHook".to_string(),
        }
    }
}

/// Which parameters of a target function are forwarded to the hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSelection {
    /// Every declared parameter, in declaration order.
    All,
    /// The listed parameter slots, in the listed order.
    Slots(Vec<u32>),
}

impl ParamSelection {
    /// Resolve to concrete parameter slots for a function with
    /// `param_count` parameters.
    pub fn slots(&self, param_count: u32) -> Vec<u32> {
        match self {
            ParamSelection::All => (0..param_count).collect(),
            ParamSelection::Slots(slots) => slots.clone(),
        }
    }
}

/// One function to intercept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Position in the combined import + local function index space of the
    /// unpatched module.
    pub ordinal: u32,
    /// Name under which the function is exported after patching.
    pub export_name: String,
    /// Parameters pushed after the tag when calling the hook.
    pub forward: ParamSelection,
}

/// Everything the patch engine needs to know about one target build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    pub hook: HookImport,
    /// The send routine, `(socket, ptr, len)` in the known build.
    pub send: TargetConfig,
    /// The receive routine, `(ptr, len)` in the known build.
    pub recv: TargetConfig,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            hook: HookImport::default(),
            send: TargetConfig {
                ordinal: 105,
                export_name: "sendPacket".to_string(),
                forward: ParamSelection::Slots(vec![1, 2]),
            },
            recv: TargetConfig {
                ordinal: 406,
                export_name: "recvPacket".to_string(),
                forward: ParamSelection::Slots(vec![0, 1]),
            },
        }
    }
}

impl PatchConfig {
    /// The target for a direction.
    pub fn target(&self, tag: HookTag) -> &TargetConfig {
        match tag {
            HookTag::Receive => &self.recv,
            HookTag::Send => &self.send,
        }
    }

    /// Check names are present and the two targets do not collide.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hook.module.is_empty() || self.hook.field.is_empty() {
            return Err(ConfigError::Invalid(
                "hook import module and field must be non-empty".to_string(),
            ));
        }
        for tag in HookTag::ALL {
            if self.target(tag).export_name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{tag} target export name must be non-empty"
                )));
            }
        }
        if self.send.ordinal == self.recv.ordinal {
            return Err(ConfigError::Invalid(format!(
                "send and recv targets share ordinal {}",
                self.send.ordinal
            )));
        }
        if self.send.export_name == self.recv.export_name {
            return Err(ConfigError::Invalid(format!(
                "send and recv targets share export name `{}`",
                self.send.export_name
            )));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Host-side configuration: the patch plus the names the memory bridge
/// needs once the module is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub patch: PatchConfig,
    /// Export name of the linear memory, when the module exports it.
    pub memory_export: String,
    /// Export name of the module's allocator, `(size) -> ptr`.
    pub malloc_export: String,
    /// Export name of the module's deallocator, `(ptr)`.
    pub free_export: String,
    /// Byte offset of the socket pointer passed as the first argument of the
    /// send routine. `None` calls the send routine with `(ptr, len)` only.
    pub socket_ptr_offset: Option<u32>,
    /// Instantiate the unpatched bytes when patching fails.
    pub fallback_to_original: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            patch: PatchConfig::default(),
            memory_export: "memory".to_string(),
            malloc_export: "R".to_string(),
            free_export: "t".to_string(),
            socket_ptr_offset: Some(103_360),
            fallback_to_original: false,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.patch.validate()?;
        if self.malloc_export.is_empty() || self.free_export.is_empty() {
            return Err(ConfigError::Invalid(
                "allocator export names must be non-empty".to_string(),
            ));
        }
        if let Some(offset) = self.socket_ptr_offset {
            if offset % 4 != 0 {
                return Err(ConfigError::Invalid(format!(
                    "socket pointer offset {offset} is not 4-byte aligned"
                )));
            }
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
