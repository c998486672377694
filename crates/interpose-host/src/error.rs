//! Host bridge error types.

use interpose_patch::PatchError;
use interpose_types::{ConfigError, Signature};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Patching failed and falling back to the original bytes is disabled.
    #[error("patch failed: {0}")]
    Patch(#[from] PatchError),

    /// The patched hook does not take `(tag, ptr, len)`.
    #[error("hook signature {0} cannot carry a packet; expected (i32, i32, i32) -> i32")]
    IncompatibleHook(Signature),

    /// Compiling, linking or instantiating the module failed.
    #[error("wasm runtime error: {0}")]
    Wasmi(String),

    #[error("module has no export `{0}`")]
    MissingExport(String),

    #[error("module has no linear memory")]
    MissingMemory,

    #[error("memory access out of bounds: {len} bytes at offset {offset}")]
    OutOfBounds { offset: u32, len: usize },

    /// The instance runs the unpatched module; the targets are not exported.
    #[error("instance is not patched")]
    NotPatched,

    /// A call into the module trapped.
    #[error("wasm trap: {0}")]
    Trap(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
