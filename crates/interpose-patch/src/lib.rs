//! Interpose patch engine: rewrites a `.wasm` module so that two of its
//! functions call an imported hook on entry.
//!
//! # Architecture
//!
//! ```text
//! raw bytes → WasmModule::parse → locate targets → add hook type + import
//!           → add target exports → schedule prologue injection → serialize
//!           → validate with wasmparser → patched bytes
//! ```
//!
//! ## What the patched module gains
//! - one imported function, `hook.mainHook(tag, args...) -> i32` by default
//! - two function exports, one per target (`sendPacket`, `recvPacket`)
//! - a prologue at the top of each target body:
//!
//! ```text
//! i32.const <tag>
//! local.get <forwarded params...>
//! call <hook>
//! if
//!   <zero value per declared result>
//!   return
//! end
//! <original body>
//! ```
//!
//! A non-zero hook result suppresses the original body.
//!
//! Appending an import shifts every locally defined function up by one in
//! the function index space; [`model::WasmModule`] renumbers every
//! reference when it re-encodes the module.

pub mod augment;
pub mod error;
pub mod inject;
pub mod locator;
pub mod model;
pub mod patcher;

pub use error::{PatchError, PatchResult};
pub use patcher::{patch, PatchReport, PatchedModule, PatchedTarget, Patcher};

pub use interpose_types::{HookTag, PatchConfig, Signature, ValueKind};
