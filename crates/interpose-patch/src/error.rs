//! Patch error types.

use interpose_types::{HookTag, Signature};
use thiserror::Error;

/// Errors that abort a patch. None of them leave partial output behind:
/// the patched bytes only exist once every step has succeeded.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The input bytes are not a valid core WebAssembly module.
    #[error("malformed module: {0}")]
    MalformedModule(String),

    /// A configured ordinal does not name a locally defined function.
    /// Usually means the module is a different build than configured.
    #[error("{tag} target function {ordinal} not found: {reason}")]
    TargetFunctionNotFound {
        tag: HookTag,
        ordinal: u32,
        reason: String,
    },

    /// The injection template cannot be applied to a target's signature.
    #[error("unsupported signature {signature} for function {ordinal}: {reason}")]
    UnsupportedSignature {
        ordinal: u32,
        signature: Signature,
        reason: String,
    },

    /// The mutated module could not be re-encoded, or the result failed
    /// validation.
    #[error("serialization failed: {0}")]
    SerializationFailure(String),

    /// The module already imports the hook. Patching twice would wrap the
    /// targets in a second prologue.
    #[error("module already imports `{module}.{field}`")]
    AlreadyPatched { module: String, field: String },

    /// A configured export name is already taken in the module.
    #[error("export `{0}` already exists")]
    DuplicateExport(String),

    /// The patch configuration itself is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An internal consistency check failed.
    #[error("internal patch error: {0}")]
    Internal(String),
}

/// Patch result type alias.
pub type PatchResult<T> = Result<T, PatchError>;

impl PatchError {
    /// Stable snake_case name of the variant, for machine-readable reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PatchError::MalformedModule(_) => "malformed_module",
            PatchError::TargetFunctionNotFound { .. } => "target_function_not_found",
            PatchError::UnsupportedSignature { .. } => "unsupported_signature",
            PatchError::SerializationFailure(_) => "serialization_failure",
            PatchError::AlreadyPatched { .. } => "already_patched",
            PatchError::DuplicateExport(_) => "duplicate_export",
            PatchError::InvalidConfig(_) => "invalid_config",
            PatchError::Internal(_) => "internal",
        }
    }
}
