//! Metadata augmenter: the hook's type and import, the target exports.

use interpose_types::{HookImport, Signature};
use log::debug;

use crate::error::{PatchError, PatchResult};
use crate::model::{FunctionIndex, FunctionRef, TypeIndex, WasmModule};

/// Function index of an added hook import.
///
/// Only [`Augmenter::add_import`] hands these out, so code that embeds a
/// hook index can only do so after the import exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookImportIndex(FunctionIndex);

impl HookImportIndex {
    pub(crate) fn new(index: FunctionIndex) -> Self {
        Self(index)
    }

    pub fn get(self) -> u32 {
        (self.0).0
    }
}

/// Adds entries to the type, import and export tables of a module.
pub struct Augmenter<'m, 'a> {
    module: &'m mut WasmModule<'a>,
}

impl<'m, 'a> Augmenter<'m, 'a> {
    pub fn new(module: &'m mut WasmModule<'a>) -> Self {
        Self { module }
    }

    /// Append a type entry; returns its index (the prior type count).
    pub fn register_type(&mut self, signature: Signature) -> TypeIndex {
        let index = self.module.add_type_entry(signature);
        debug!("registered hook type at index {}", index.0);
        index
    }

    /// Append the hook import. Must happen before any code is injected.
    pub fn add_import(&mut self, hook: &HookImport, ty: TypeIndex) -> PatchResult<HookImportIndex> {
        if self.module.has_import(&hook.module, &hook.field) {
            return Err(PatchError::AlreadyPatched {
                module: hook.module.clone(),
                field: hook.field.clone(),
            });
        }
        let index = self
            .module
            .add_import_entry(&hook.module, &hook.field, ty)
            .map_err(|e| PatchError::Internal(e.to_string()))?;
        debug!(
            "added import {}.{} at function index {}",
            hook.module, hook.field, index.0
        );
        Ok(HookImportIndex::new(index))
    }

    /// Export a located function. Does not change the function index space.
    pub fn add_export(&mut self, func: &FunctionRef, name: &str) -> PatchResult<()> {
        if self.module.has_export(name) {
            return Err(PatchError::DuplicateExport(name.to_string()));
        }
        self.module.add_export_entry(func, name);
        debug!(
            "exported function {} as `{name}`",
            self.module.resolve(func).0
        );
        Ok(())
    }
}
