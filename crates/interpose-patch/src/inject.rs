//! Code injector: the hook-call prologue spliced in front of a target body.
//!
//! ```text
//! i32.const <tag>
//! local.get <slot>        ;; once per forwarded parameter
//! call <hook>
//! if
//!   <zero value>          ;; once per declared result
//!   return
//! end
//! <original instructions>
//! ```
//!
//! The early return is a structured `if` block; the hook's `i32` result is
//! the condition. Results of the enclosing function are satisfied with
//! zero values: `0` for integers, `0.0` for floats, an all-zero `v128`,
//! `ref.null` for nullable `funcref` / `externref`.

use interpose_types::{HookTag, Signature, ValueKind};
use thiserror::Error;
use wasm_encoder::{AbstractHeapType, BlockType, Encode, HeapType, Instruction};

use crate::augment::HookImportIndex;
use crate::model::encoder_val_type;

/// Why a target's signature does not fit the prologue template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectError {
    #[error("parameter slot {slot} does not exist (function has {count} parameters)")]
    ParamOutOfRange { slot: u32, count: u32 },

    #[error("parameter of kind {0} cannot be forwarded to the hook")]
    UnforwardableParam(ValueKind),

    #[error("result of kind {0} has no zero value for the early return")]
    NoPlaceholder(ValueKind),
}

/// Kinds of the parameters a target forwards, checking that the template
/// can be applied: every slot exists, every forwarded kind can appear in
/// the hook's signature, and every result has a zero value.
pub fn forwarded_kinds(
    signature: &Signature,
    slots: &[u32],
) -> Result<Vec<ValueKind>, InjectError> {
    let count = signature.params.len() as u32;
    let kinds = slots
        .iter()
        .map(|&slot| {
            let kind = *signature
                .params
                .get(slot as usize)
                .ok_or(InjectError::ParamOutOfRange { slot, count })?;
            if encoder_val_type(kind).is_none() {
                return Err(InjectError::UnforwardableParam(kind));
            }
            Ok(kind)
        })
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(&kind) = signature.results.iter().find(|k| !k.has_zero_value()) {
        return Err(InjectError::NoPlaceholder(kind));
    }
    Ok(kinds)
}

/// Signature of the hook import: `(i32 tag, forwarded...) -> i32`.
pub fn hook_signature(forwarded: &[ValueKind]) -> Signature {
    Signature::new(
        std::iter::once(ValueKind::I32).chain(forwarded.iter().copied()),
        [ValueKind::I32],
    )
}

/// A validated prologue for one target function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prologue {
    hook: HookImportIndex,
    tag: HookTag,
    slots: Vec<u32>,
    /// Encoded zero value per declared result, pushed before `return`.
    placeholders: Vec<u8>,
}

impl Prologue {
    pub fn new(
        hook: HookImportIndex,
        tag: HookTag,
        slots: &[u32],
        signature: &Signature,
    ) -> Result<Self, InjectError> {
        forwarded_kinds(signature, slots)?;
        let mut placeholders = Vec::new();
        for &kind in &signature.results {
            zero_value(kind)
                .ok_or(InjectError::NoPlaceholder(kind))?
                .encode(&mut placeholders);
        }
        Ok(Self {
            hook,
            tag,
            slots: slots.to_vec(),
            placeholders,
        })
    }

    pub fn tag(&self) -> HookTag {
        self.tag
    }

    /// The prologue's instruction bytes. Deterministic for a given hook
    /// index, tag, slot list and result list.
    pub fn encode(&self) -> Vec<u8> {
        let mut sink = Vec::new();
        Instruction::I32Const(self.tag.wire_value()).encode(&mut sink);
        for &slot in &self.slots {
            Instruction::LocalGet(slot).encode(&mut sink);
        }
        Instruction::Call(self.hook.get()).encode(&mut sink);
        Instruction::If(BlockType::Empty).encode(&mut sink);
        sink.extend_from_slice(&self.placeholders);
        Instruction::Return.encode(&mut sink);
        Instruction::End.encode(&mut sink);
        sink
    }

    /// Prologue followed by the unchanged original instructions.
    pub fn inject(&self, original: &[u8]) -> Vec<u8> {
        let mut body = self.encode();
        body.extend_from_slice(original);
        body
    }
}

/// Zero value of a kind; `None` for references with no constant null.
fn zero_value(kind: ValueKind) -> Option<Instruction<'static>> {
    match kind {
        ValueKind::I32 => Some(Instruction::I32Const(0)),
        ValueKind::I64 => Some(Instruction::I64Const(0)),
        ValueKind::F32 => Some(Instruction::F32Const(0.0f32.into())),
        ValueKind::F64 => Some(Instruction::F64Const(0.0f64.into())),
        ValueKind::V128 => Some(Instruction::V128Const(0)),
        ValueKind::FuncRef => Some(ref_null(AbstractHeapType::Func)),
        ValueKind::ExternRef => Some(ref_null(AbstractHeapType::Extern)),
        ValueKind::OtherRef => None,
    }
}

fn ref_null(ty: AbstractHeapType) -> Instruction<'static> {
    Instruction::RefNull(HeapType::Abstract { shared: false, ty })
}
