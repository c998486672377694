//! Interpose patch engine as a WASM module for browser environments.
//!
//! Patches a module's bytes before the page hands them to
//! `WebAssembly.instantiate`; the page then supplies the hook under the
//! configured import name.
//!
//! # Usage (JavaScript)
//!
//! ```js
//! import init, { patch } from 'interpose-wasm';
//!
//! await init();
//!
//! const result = JSON.parse(patch(new Uint8Array(bytes), ""));
//! if (result.success) {
//!   imports.hook = { mainHook: (tag, ptr, len) => 0 };
//!   await WebAssembly.instantiate(new Uint8Array(result.wasm), imports);
//! }
//! ```

use interpose_patch::{PatchError, PatchReport, Patcher};
use interpose_types::PatchConfig;
use serde::Serialize;
use wasm_bindgen::prelude::*;

/// Machine-readable failure.
#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub kind: &'static str,
    pub message: String,
}

impl From<PatchError> for ErrorInfo {
    fn from(e: PatchError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// JSON shape returned by [`patch`].
#[derive(Debug, Serialize)]
pub struct PatchOutcome {
    pub success: bool,
    pub wasm: Option<Vec<u8>>,
    pub report: Option<PatchReport>,
    pub error: Option<ErrorInfo>,
}

/// Run the patch engine; an empty `config_json` selects the defaults.
pub fn patch_to_outcome(wasm: &[u8], config_json: &str) -> PatchOutcome {
    let result = parse_config(config_json)
        .and_then(Patcher::new)
        .and_then(|patcher| patcher.patch(wasm));
    match result {
        Ok(patched) => PatchOutcome {
            success: true,
            wasm: Some(patched.wasm),
            report: Some(patched.report),
            error: None,
        },
        Err(e) => PatchOutcome {
            success: false,
            wasm: None,
            report: None,
            error: Some(e.into()),
        },
    }
}

fn parse_config(config_json: &str) -> Result<PatchConfig, PatchError> {
    if config_json.trim().is_empty() {
        return Ok(PatchConfig::default());
    }
    PatchConfig::from_json(config_json).map_err(|e| PatchError::InvalidConfig(e.to_string()))
}

/// Patch a `.wasm` module.
///
/// Returns a JSON string containing a `PatchOutcome`:
/// ```json
/// {
///   "success": true,
///   "wasm": [0, 97, 115, 109, ...],
///   "report": { "hook_index": 3, "targets": [ ... ], ... },
///   "error": null
/// }
/// ```
///
/// On failure, `success` is `false`, `wasm` and `report` are `null`, and
/// `error` carries `{ "kind", "message" }`.
#[wasm_bindgen]
pub fn patch(wasm: &[u8], config_json: &str) -> String {
    let outcome = patch_to_outcome(wasm, config_json);
    serde_json::to_string(&outcome).unwrap_or_else(|e| {
        format!(
            r#"{{"success":false,"wasm":null,"report":null,"error":{{"kind":"internal","message":"Serialization error: {}"}}}}"#,
            e
        )
    })
}

/// Return the default patch configuration as JSON.
#[wasm_bindgen]
pub fn default_config() -> String {
    PatchConfig::default()
        .to_json()
        .unwrap_or_else(|e| format!(r#"{{"error":"{}"}}"#, e))
}

/// Return the patch engine version string.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
