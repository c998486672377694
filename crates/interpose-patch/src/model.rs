//! In-memory view of a `.wasm` module with pending edits.
//!
//! [`WasmModule::parse`] reads the metadata the patch engine needs (type
//! signatures, imports, exports, which functions are defined locally) and
//! keeps a borrow of the original bytes. Edits are recorded, not applied:
//! [`WasmModule::serialize`] consumes the handle and re-encodes the whole
//! module in a single pass with `wasm_encoder::reencode`.
//!
//! # Index space
//!
//! Function imports come first in the function index space, so appending
//! an import moves every locally defined function up by one. The
//! re-encoder applies that shift to every function reference it meets:
//! call operands, `ref.func`, exports, the start function, element
//! segments, constant expressions and the name section.

use std::collections::BTreeMap;

use interpose_types::{Signature, ValueKind};
use thiserror::Error;
use wasm_encoder::reencode::{self, Reencode};
use wasm_encoder::{
    CodeSection, Encode, EntityType, ExportKind, ExportSection, ImportSection, SectionId,
    TypeSection, ValType,
};
use wasmparser::{Encoding, Parser, Payload, RefType, TypeRef};

/// Errors raised by the module model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The bytes are not a valid core module.
    #[error("malformed module: {0}")]
    Malformed(String),

    /// An ordinal past the end of the function index space.
    #[error("function index {index} out of range (module has {count} functions)")]
    IndexOutOfRange { index: u32, count: u32 },

    /// An ordinal naming an imported function, which has no body.
    #[error("function {index} is imported and has no body")]
    ImportedFunction { index: u32 },

    /// An import was added after a code transform was registered. The
    /// transform may already have captured a function index that the new
    /// import invalidates.
    #[error("cannot add import `{module}.{field}` after a code transform was registered")]
    ImportAfterTransform { module: String, field: String },

    /// A second code transform for the same function.
    #[error("function {index} already has a code transform")]
    TransformExists { index: u32 },

    /// Re-encoding the module failed.
    #[error("re-encoding failed: {0}")]
    Reencode(String),
}

/// Index of an entry in the type section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeIndex(pub u32);

/// Index in the function index space (imports first, then local functions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionIndex(pub u32);

/// Stable handle to a locally defined function.
///
/// The handle records the function's position in the *original* module;
/// [`WasmModule::resolve`] maps it to the current index space, so a handle
/// taken before an import was added keeps pointing at the same function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionRef {
    ordinal: u32,
    defined_index: u32,
    type_index: u32,
}

impl FunctionRef {
    /// Position in the original function index space.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Position in the code section.
    pub fn defined_index(&self) -> u32 {
        self.defined_index
    }

    pub fn type_index(&self) -> TypeIndex {
        TypeIndex(self.type_index)
    }
}

/// One function body as handed to a code transform.
#[derive(Debug, Clone, Copy)]
pub struct CodeElement<'b> {
    /// The function's index in the patched module.
    pub index: u32,
    /// Instruction bytes, renumbered, without the locals declaration.
    /// Ends with the function's closing `end`.
    pub instructions: &'b [u8],
}

type CodeTransform<'a> = Box<dyn FnOnce(CodeElement<'_>) -> Vec<u8> + 'a>;

struct AddedImport {
    module: String,
    field: String,
    type_index: u32,
}

struct AddedExport {
    name: String,
    func: FunctionRef,
}

/// A parsed module plus the edits queued against it.
pub struct WasmModule<'a> {
    bytes: &'a [u8],
    types: Vec<Signature>,
    imports: Vec<(&'a str, &'a str)>,
    imported_funcs: Vec<u32>,
    defined_funcs: Vec<u32>,
    exports: Vec<&'a str>,
    added_types: Vec<Signature>,
    added_imports: Vec<AddedImport>,
    added_exports: Vec<AddedExport>,
    transforms: BTreeMap<u32, CodeTransform<'a>>,
}

impl<'a> WasmModule<'a> {
    /// Validate and read a core module.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ModelError> {
        wasmparser::validate(bytes).map_err(|e| ModelError::Malformed(e.to_string()))?;

        let mut module = WasmModule {
            bytes,
            types: Vec::new(),
            imports: Vec::new(),
            imported_funcs: Vec::new(),
            defined_funcs: Vec::new(),
            exports: Vec::new(),
            added_types: Vec::new(),
            added_imports: Vec::new(),
            added_exports: Vec::new(),
            transforms: BTreeMap::new(),
        };

        for payload in Parser::new(0).parse_all(bytes) {
            match payload.map_err(malformed)? {
                Payload::Version { encoding, .. } => {
                    if matches!(encoding, Encoding::Component) {
                        return Err(ModelError::Malformed(
                            "expected a core module, found a component".to_string(),
                        ));
                    }
                }
                Payload::TypeSection(reader) => {
                    for ty in reader.into_iter_err_on_gc_types() {
                        let ty = ty.map_err(malformed)?;
                        module.types.push(Signature::new(
                            ty.params().iter().copied().map(value_kind),
                            ty.results().iter().copied().map(value_kind),
                        ));
                    }
                }
                Payload::ImportSection(reader) => {
                    for import in reader {
                        let import = import.map_err(malformed)?;
                        if let TypeRef::Func(type_index) = import.ty {
                            module.imported_funcs.push(type_index);
                        }
                        module.imports.push((import.module, import.name));
                    }
                }
                Payload::FunctionSection(reader) => {
                    for type_index in reader {
                        module.defined_funcs.push(type_index.map_err(malformed)?);
                    }
                }
                Payload::ExportSection(reader) => {
                    for export in reader {
                        module.exports.push(export.map_err(malformed)?.name);
                    }
                }
                _ => {}
            }
        }

        Ok(module)
    }

    /// Number of function imports, including added ones.
    pub fn imported_function_count(&self) -> u32 {
        (self.imported_funcs.len() + self.added_imports.len()) as u32
    }

    /// Number of locally defined functions.
    pub fn defined_function_count(&self) -> u32 {
        self.defined_funcs.len() as u32
    }

    /// Size of the function index space, including added imports.
    pub fn function_count(&self) -> u32 {
        self.imported_function_count() + self.defined_function_count()
    }

    /// Number of type entries, including added ones.
    pub fn type_count(&self) -> u32 {
        (self.types.len() + self.added_types.len()) as u32
    }

    /// Look up a function by its ordinal in the original index space.
    pub fn function_by_index(&self, ordinal: u32) -> Result<FunctionRef, ModelError> {
        let imported = self.imported_funcs.len() as u32;
        let count = imported + self.defined_function_count();
        if ordinal >= count {
            return Err(ModelError::IndexOutOfRange {
                index: ordinal,
                count,
            });
        }
        if ordinal < imported {
            return Err(ModelError::ImportedFunction { index: ordinal });
        }
        let defined_index = ordinal - imported;
        Ok(FunctionRef {
            ordinal,
            defined_index,
            type_index: self.defined_funcs[defined_index as usize],
        })
    }

    /// The signature of a type entry, original or added.
    pub fn signature(&self, index: TypeIndex) -> Option<&Signature> {
        let index = index.0 as usize;
        match index.checked_sub(self.types.len()) {
            None => self.types.get(index),
            Some(added) => self.added_types.get(added),
        }
    }

    /// Current index of a function handle.
    pub fn resolve(&self, func: &FunctionRef) -> FunctionIndex {
        FunctionIndex(func.ordinal + self.added_imports.len() as u32)
    }

    pub fn has_import(&self, module: &str, field: &str) -> bool {
        self.imports
            .iter()
            .any(|(m, f)| *m == module && *f == field)
            || self
                .added_imports
                .iter()
                .any(|i| i.module == module && i.field == field)
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.exports.contains(&name) || self.added_exports.iter().any(|e| e.name == name)
    }

    /// Append a function type. Duplicates of existing entries are allowed.
    pub fn add_type_entry(&mut self, signature: Signature) -> TypeIndex {
        let index = TypeIndex(self.type_count());
        self.added_types.push(signature);
        index
    }

    /// Append a function import after all existing imports.
    ///
    /// Returns the import's function index, which equals the number of
    /// function imports before the call. Every locally defined function
    /// moves up by one.
    pub fn add_import_entry(
        &mut self,
        module: &str,
        field: &str,
        ty: TypeIndex,
    ) -> Result<FunctionIndex, ModelError> {
        if !self.transforms.is_empty() {
            return Err(ModelError::ImportAfterTransform {
                module: module.to_string(),
                field: field.to_string(),
            });
        }
        let index = FunctionIndex(self.imported_function_count());
        self.added_imports.push(AddedImport {
            module: module.to_string(),
            field: field.to_string(),
            type_index: ty.0,
        });
        Ok(index)
    }

    /// Export a function under `name`.
    pub fn add_export_entry(&mut self, func: &FunctionRef, name: &str) {
        self.added_exports.push(AddedExport {
            name: name.to_string(),
            func: *func,
        });
    }

    /// Replace a function's instructions during serialization.
    ///
    /// `transform` runs exactly once, receiving the function's renumbered
    /// instruction bytes, and returns the bytes to emit instead. The locals
    /// declaration is kept as is.
    pub fn set_code_transform<F>(
        &mut self,
        func: &FunctionRef,
        transform: F,
    ) -> Result<(), ModelError>
    where
        F: FnOnce(CodeElement<'_>) -> Vec<u8> + 'a,
    {
        if self.transforms.contains_key(&func.defined_index) {
            return Err(ModelError::TransformExists {
                index: func.ordinal,
            });
        }
        self.transforms.insert(func.defined_index, Box::new(transform));
        Ok(())
    }

    /// Re-encode the module with every queued edit applied.
    pub fn serialize(self) -> Result<Vec<u8>, ModelError> {
        let WasmModule {
            bytes,
            imported_funcs,
            added_types,
            added_imports,
            added_exports,
            transforms,
            ..
        } = self;

        let shift = IndexShift {
            from: imported_funcs.len() as u32,
            by: added_imports.len() as u32,
        };
        let mut rewriter = Rewriter {
            shift,
            added_types,
            added_imports,
            added_exports,
            transforms,
            next_defined: 0,
            types_written: false,
            imports_written: false,
            exports_written: false,
        };

        let mut encoded = wasm_encoder::Module::new();
        rewriter
            .parse_core_module(&mut encoded, Parser::new(0), bytes)
            .map_err(|e| ModelError::Reencode(e.to_string()))?;
        rewriter
            .write_pending_sections(&mut encoded, None)
            .map_err(|e| ModelError::Reencode(e.to_string()))?;

        if let Some(defined_index) = rewriter.transforms.keys().next() {
            return Err(ModelError::Reencode(format!(
                "code transform for local function {defined_index} never ran"
            )));
        }

        Ok(encoded.finish())
    }
}

fn malformed(e: wasmparser::BinaryReaderError) -> ModelError {
    ModelError::Malformed(e.to_string())
}

/// Map a parsed value type to its kind.
pub fn value_kind(ty: wasmparser::ValType) -> ValueKind {
    match ty {
        wasmparser::ValType::I32 => ValueKind::I32,
        wasmparser::ValType::I64 => ValueKind::I64,
        wasmparser::ValType::F32 => ValueKind::F32,
        wasmparser::ValType::F64 => ValueKind::F64,
        wasmparser::ValType::V128 => ValueKind::V128,
        wasmparser::ValType::Ref(r) if r == RefType::FUNCREF => ValueKind::FuncRef,
        wasmparser::ValType::Ref(r) if r == RefType::EXTERNREF => ValueKind::ExternRef,
        wasmparser::ValType::Ref(_) => ValueKind::OtherRef,
    }
}

/// Map a value kind to the encoder's value type. `None` for kinds that
/// carry no concrete heap type.
pub fn encoder_val_type(kind: ValueKind) -> Option<ValType> {
    match kind {
        ValueKind::I32 => Some(ValType::I32),
        ValueKind::I64 => Some(ValType::I64),
        ValueKind::F32 => Some(ValType::F32),
        ValueKind::F64 => Some(ValType::F64),
        ValueKind::V128 => Some(ValType::V128),
        ValueKind::FuncRef => Some(ValType::FUNCREF),
        ValueKind::ExternRef => Some(ValType::EXTERNREF),
        ValueKind::OtherRef => None,
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Re-encoding
// ══════════════════════════════════════════════════════════════════════════════

/// Shift applied to function indices when imports are appended.
#[derive(Debug, Clone, Copy)]
struct IndexShift {
    /// Original number of function imports.
    from: u32,
    /// Number of appended function imports.
    by: u32,
}

impl IndexShift {
    fn apply(self, index: u32) -> Result<u32, RewriteError> {
        if index < self.from {
            return Ok(index);
        }
        index
            .checked_add(self.by)
            .ok_or(RewriteError::IndexOverflow(index))
    }
}

#[derive(Debug, Error)]
enum RewriteError {
    #[error("function index {0} overflows after renumbering")]
    IndexOverflow(u32),
    #[error("type {0} cannot be encoded")]
    UnencodableType(Signature),
}

impl From<RewriteError> for reencode::Error<RewriteError> {
    fn from(e: RewriteError) -> Self {
        reencode::Error::UserError(e)
    }
}

type ReencodeResult<T> = Result<T, reencode::Error<RewriteError>>;

/// Canonical position of a section, with `Tag` and `DataCount` in their
/// binary-order slots rather than their id order.
fn section_rank(id: SectionId) -> u8 {
    match id {
        SectionId::Custom => 0,
        SectionId::Type => 1,
        SectionId::Import => 2,
        SectionId::Function => 3,
        SectionId::Table => 4,
        SectionId::Memory => 5,
        SectionId::Tag => 6,
        SectionId::Global => 7,
        SectionId::Export => 8,
        SectionId::Start => 9,
        SectionId::Element => 10,
        SectionId::DataCount => 11,
        SectionId::Code => 12,
        SectionId::Data => 13,
        #[allow(unreachable_patterns)]
        _ => u8::MAX,
    }
}

const RANK_TYPE: u8 = 1;
const RANK_IMPORT: u8 = 2;
const RANK_EXPORT: u8 = 8;

struct Rewriter<'a> {
    shift: IndexShift,
    added_types: Vec<Signature>,
    added_imports: Vec<AddedImport>,
    added_exports: Vec<AddedExport>,
    transforms: BTreeMap<u32, CodeTransform<'a>>,
    next_defined: u32,
    types_written: bool,
    imports_written: bool,
    exports_written: bool,
}

impl Rewriter<'_> {
    fn append_types(&mut self, types: &mut TypeSection) -> ReencodeResult<()> {
        for signature in &self.added_types {
            let params = encoder_types(signature, &signature.params)?;
            let results = encoder_types(signature, &signature.results)?;
            types.ty().function(params, results);
        }
        self.types_written = true;
        Ok(())
    }

    fn append_imports(&mut self, imports: &mut ImportSection) {
        for import in &self.added_imports {
            imports.import(
                &import.module,
                &import.field,
                EntityType::Function(import.type_index),
            );
        }
        self.imports_written = true;
    }

    fn append_exports(&mut self, exports: &mut ExportSection) -> ReencodeResult<()> {
        for export in &self.added_exports {
            let index = self.shift.apply(export.func.ordinal)?;
            exports.export(&export.name, ExportKind::Func, index);
        }
        self.exports_written = true;
        Ok(())
    }

    /// Emit the type, import or export section for added entries when the
    /// input module has no such section and `before` is the first section
    /// that must follow it (`None` at the end of the module).
    fn write_pending_sections(
        &mut self,
        module: &mut wasm_encoder::Module,
        before: Option<SectionId>,
    ) -> ReencodeResult<()> {
        let rank = match before {
            Some(SectionId::Custom) => return Ok(()),
            Some(id) => section_rank(id),
            None => u8::MAX,
        };

        if !self.types_written && !self.added_types.is_empty() && rank > RANK_TYPE {
            let mut types = TypeSection::new();
            self.append_types(&mut types)?;
            module.section(&types);
        }
        if !self.imports_written && !self.added_imports.is_empty() && rank > RANK_IMPORT {
            let mut imports = ImportSection::new();
            self.append_imports(&mut imports);
            module.section(&imports);
        }
        if !self.exports_written && !self.added_exports.is_empty() && rank > RANK_EXPORT {
            let mut exports = ExportSection::new();
            self.append_exports(&mut exports)?;
            module.section(&exports);
        }
        Ok(())
    }
}

fn encoder_types(signature: &Signature, kinds: &[ValueKind]) -> ReencodeResult<Vec<ValType>> {
    let mut types = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        let Some(ty) = encoder_val_type(kind) else {
            return Err(RewriteError::UnencodableType(signature.clone()).into());
        };
        types.push(ty);
    }
    Ok(types)
}

impl Reencode for Rewriter<'_> {
    type Error = RewriteError;

    fn function_index(&mut self, func: u32) -> ReencodeResult<u32> {
        Ok(self.shift.apply(func)?)
    }

    fn intersperse_section_hook(
        &mut self,
        module: &mut wasm_encoder::Module,
        _after: Option<SectionId>,
        before: Option<SectionId>,
    ) -> ReencodeResult<()> {
        self.write_pending_sections(module, before)
    }

    fn parse_type_section(
        &mut self,
        types: &mut TypeSection,
        section: wasmparser::TypeSectionReader<'_>,
    ) -> ReencodeResult<()> {
        reencode::utils::parse_type_section(self, types, section)?;
        self.append_types(types)
    }

    fn parse_import_section(
        &mut self,
        imports: &mut ImportSection,
        section: wasmparser::ImportSectionReader<'_>,
    ) -> ReencodeResult<()> {
        reencode::utils::parse_import_section(self, imports, section)?;
        self.append_imports(imports);
        Ok(())
    }

    fn parse_export_section(
        &mut self,
        exports: &mut ExportSection,
        section: wasmparser::ExportSectionReader<'_>,
    ) -> ReencodeResult<()> {
        reencode::utils::parse_export_section(self, exports, section)?;
        self.append_exports(exports)
    }

    fn parse_function_body(
        &mut self,
        code: &mut CodeSection,
        func: wasmparser::FunctionBody<'_>,
    ) -> ReencodeResult<()> {
        let defined_index = self.next_defined;
        self.next_defined += 1;

        let mut function = self.new_function_with_parsed_locals(&func)?;
        let mut instructions = Vec::new();
        let mut reader = func.get_operators_reader()?;
        while !reader.eof() {
            let op = reader.read()?;
            self.instruction(op)?.encode(&mut instructions);
        }

        if let Some(transform) = self.transforms.remove(&defined_index) {
            let index = self.shift.from + self.shift.by + defined_index;
            instructions = transform(CodeElement {
                index,
                instructions: &instructions,
            });
        }

        function.raw(instructions);
        code.function(&function);
        Ok(())
    }
}
