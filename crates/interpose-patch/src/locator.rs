//! Function locator: ordinal index → handle + signature.

use interpose_types::Signature;
use thiserror::Error;

use crate::model::{FunctionRef, ModelError, WasmModule};

/// Why an ordinal could not be located.
#[derive(Debug, Error)]
pub enum LocateError {
    #[error("index {index} is past the end of the function index space ({count} functions)")]
    IndexOutOfRange { index: u32, count: u32 },

    /// The index names an imported function: there is no body to patch.
    #[error("index {index} names an imported function, not a local one")]
    NotAFunction { index: u32 },

    #[error("function {index} refers to type {type_index}, which is not a function type")]
    MissingType { index: u32, type_index: u32 },
}

/// A located function and its declared type.
#[derive(Debug, Clone)]
pub struct LocatedFunction {
    pub func: FunctionRef,
    pub signature: Signature,
}

/// Resolve `ordinal` to a locally defined function. No side effects.
pub fn locate(module: &WasmModule<'_>, ordinal: u32) -> Result<LocatedFunction, LocateError> {
    let func = module.function_by_index(ordinal).map_err(|e| match e {
        ModelError::IndexOutOfRange { index, count } => {
            LocateError::IndexOutOfRange { index, count }
        }
        _ => LocateError::NotAFunction { index: ordinal },
    })?;
    let signature = module
        .signature(func.type_index())
        .cloned()
        .ok_or(LocateError::MissingType {
            index: ordinal,
            type_index: func.type_index().0,
        })?;
    Ok(LocatedFunction { func, signature })
}
