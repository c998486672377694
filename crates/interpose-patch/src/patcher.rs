//! Patch orchestrator: runs the full pipeline against one module.

use interpose_types::{HookTag, PatchConfig, Signature, TargetConfig, ValueKind};
use log::{debug, info};
use serde::Serialize;

use crate::augment::Augmenter;
use crate::error::{PatchError, PatchResult};
use crate::inject::{forwarded_kinds, hook_signature, InjectError, Prologue};
use crate::locator::{locate, LocateError, LocatedFunction};
use crate::model::WasmModule;

/// One intercepted function in the patched module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchedTarget {
    pub tag: HookTag,
    /// Index in the original module.
    pub ordinal: u32,
    /// Index in the patched module.
    pub index: u32,
    pub export_name: String,
}

/// What a successful patch changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    /// Function index of the hook import.
    pub hook_index: u32,
    /// Type index of the hook's signature.
    pub hook_type_index: u32,
    pub hook_signature: Signature,
    /// Size of the function index space before and after patching.
    pub function_count_before: u32,
    pub function_count: u32,
    pub targets: Vec<PatchedTarget>,
}

impl PatchReport {
    pub fn target(&self, tag: HookTag) -> Option<&PatchedTarget> {
        self.targets.iter().find(|t| t.tag == tag)
    }
}

/// Patched module bytes plus the report.
#[derive(Debug, Clone)]
pub struct PatchedModule {
    pub wasm: Vec<u8>,
    pub report: PatchReport,
}

/// A target that passed every pre-mutation check.
struct Target<'c> {
    tag: HookTag,
    config: &'c TargetConfig,
    located: LocatedFunction,
    slots: Vec<u32>,
    kinds: Vec<ValueKind>,
}

/// Patch engine bound to one configuration.
#[derive(Debug, Clone, Default)]
pub struct Patcher {
    config: PatchConfig,
}

impl Patcher {
    pub fn new(config: PatchConfig) -> PatchResult<Self> {
        config
            .validate()
            .map_err(|e| PatchError::InvalidConfig(e.to_string()))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Patch a module. Either every edit lands or an error is returned and
    /// no bytes are produced.
    pub fn patch(&self, wasm: &[u8]) -> PatchResult<PatchedModule> {
        // 1. Parse
        let mut module =
            WasmModule::parse(wasm).map_err(|e| PatchError::MalformedModule(e.to_string()))?;
        let function_count_before = module.function_count();

        // 2. Locate, then reject everything that would fail later
        let targets = HookTag::ALL
            .into_iter()
            .map(|tag| self.check_target(&module, tag))
            .collect::<PatchResult<Vec<_>>>()?;
        let kinds = shared_kinds(&targets)?;

        let hook = &self.config.hook;
        if module.has_import(&hook.module, &hook.field) {
            return Err(PatchError::AlreadyPatched {
                module: hook.module.clone(),
                field: hook.field.clone(),
            });
        }
        if let Some(taken) = targets
            .iter()
            .find(|t| module.has_export(&t.config.export_name))
        {
            return Err(PatchError::DuplicateExport(taken.config.export_name.clone()));
        }

        // 3. Hook type + import, 4. exports
        let signature = hook_signature(&kinds);
        let (hook_type, hook_index) = {
            let mut augmenter = Augmenter::new(&mut module);
            let ty = augmenter.register_type(signature.clone());
            let index = augmenter.add_import(hook, ty)?;
            for target in &targets {
                augmenter.add_export(&target.located.func, &target.config.export_name)?;
            }
            (ty, index)
        };

        // 5. Prologues
        let mut report_targets = Vec::with_capacity(targets.len());
        for target in targets {
            let func = target.located.func;
            let prologue = Prologue::new(
                hook_index,
                target.tag,
                &target.slots,
                &target.located.signature,
            )
            .map_err(|e| unsupported(&target.located, e))?;
            module
                .set_code_transform(&func, move |code| prologue.inject(code.instructions))
                .map_err(|e| PatchError::Internal(e.to_string()))?;

            let index = module.resolve(&func).0;
            debug!(
                "{} target {} (now {index}) forwards slots {:?}",
                target.tag,
                func.ordinal(),
                target.slots
            );
            report_targets.push(PatchedTarget {
                tag: target.tag,
                ordinal: func.ordinal(),
                index,
                export_name: target.config.export_name.clone(),
            });
        }

        // 6. Serialize and check the result
        let function_count = module.function_count();
        let wasm = module
            .serialize()
            .map_err(|e| PatchError::SerializationFailure(e.to_string()))?;
        wasmparser::validate(&wasm)
            .map_err(|e| PatchError::SerializationFailure(format!("output is invalid: {e}")))?;

        info!(
            "patched module: hook {}.{} at index {}, {} -> {} functions, {} bytes",
            hook.module,
            hook.field,
            hook_index.get(),
            function_count_before,
            function_count,
            wasm.len()
        );

        Ok(PatchedModule {
            wasm,
            report: PatchReport {
                hook_index: hook_index.get(),
                hook_type_index: hook_type.0,
                hook_signature: signature,
                function_count_before,
                function_count,
                targets: report_targets,
            },
        })
    }

    fn check_target<'c>(
        &'c self,
        module: &WasmModule<'_>,
        tag: HookTag,
    ) -> PatchResult<Target<'c>> {
        let config = self.config.target(tag);
        let located = locate(module, config.ordinal).map_err(|e| not_found(tag, config, e))?;
        let slots = config.forward.slots(located.signature.params.len() as u32);
        let kinds =
            forwarded_kinds(&located.signature, &slots).map_err(|e| unsupported(&located, e))?;
        debug!(
            "located {tag} target {} with signature {}",
            config.ordinal, located.signature
        );
        Ok(Target {
            tag,
            config,
            located,
            slots,
            kinds,
        })
    }
}

/// Both targets call the same import, so they must forward the same kinds.
fn shared_kinds(targets: &[Target<'_>]) -> PatchResult<Vec<ValueKind>> {
    let Some((first, rest)) = targets.split_first() else {
        return Ok(Vec::new());
    };
    if let Some(other) = rest.iter().find(|t| t.kinds != first.kinds) {
        return Err(PatchError::UnsupportedSignature {
            ordinal: other.located.func.ordinal(),
            signature: other.located.signature.clone(),
            reason: format!(
                "forwards ({}) but the {} target forwards ({})",
                join_kinds(&other.kinds),
                first.tag,
                join_kinds(&first.kinds)
            ),
        });
    }
    Ok(first.kinds.clone())
}

fn join_kinds(kinds: &[ValueKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn not_found(tag: HookTag, config: &TargetConfig, e: LocateError) -> PatchError {
    PatchError::TargetFunctionNotFound {
        tag,
        ordinal: config.ordinal,
        reason: e.to_string(),
    }
}

fn unsupported(located: &LocatedFunction, e: InjectError) -> PatchError {
    PatchError::UnsupportedSignature {
        ordinal: located.func.ordinal(),
        signature: located.signature.clone(),
        reason: e.to_string(),
    }
}

/// Patch `wasm` with `config`.
pub fn patch(wasm: &[u8], config: &PatchConfig) -> PatchResult<PatchedModule> {
    Patcher::new(config.clone())?.patch(wasm)
}
