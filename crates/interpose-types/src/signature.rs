use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a single parameter or result value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    I32,
    I64,
    F32,
    F64,
    V128,
    /// Nullable `funcref`.
    FuncRef,
    /// Nullable `externref`.
    ExternRef,
    /// Any other reference type (typed, non-nullable, GC...).
    OtherRef,
}

impl ValueKind {
    /// Whether a zero / null value of this kind can be materialised with a
    /// single constant instruction.
    pub fn has_zero_value(self) -> bool {
        !matches!(self, ValueKind::OtherRef)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::V128 => "v128",
            ValueKind::FuncRef => "funcref",
            ValueKind::ExternRef => "externref",
            ValueKind::OtherRef => "ref",
        };
        f.write_str(s)
    }
}

/// A function type: ordered parameter kinds plus result kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<ValueKind>,
    pub results: Vec<ValueKind>,
}

impl Signature {
    pub fn new(
        params: impl IntoIterator<Item = ValueKind>,
        results: impl IntoIterator<Item = ValueKind>,
    ) -> Self {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ")")?;
        match self.results.as_slice() {
            [] => Ok(()),
            [single] => write!(f, " -> {single}"),
            many => {
                write!(f, " -> (")?;
                for (i, r) in many.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{r}")?;
                }
                write!(f, ")")
            }
        }
    }
}
