//! Shared fixture: a 500-function module laid out like the build the
//! default configuration targets.
//!
//! ```text
//! imports   0 env.tick  () -> ()
//!           1 env.sink  (ptr, len) -> ()
//!           2 env.log   (i32) -> ()
//! local     4 start     sets global `ready`
//!           5 malloc    bump allocator, exported as `R`
//!           6 free      no-op, exported as `t`
//!          10 drive     (ptr, len) -> i32, calls send with socket 0
//!          11 dispatch  (ptr, len) -> i32, call_indirect through table slot 1
//!         105 send      (socket, ptr, len) -> len
//!         406 recv      (ptr, len) -> len
//!     others            `() -> ()`, each calls the next filler
//! table     [send, recv]
//! ```
//!
//! `send` and `recv` bump a counter global and pass `(ptr, len)` to
//! `env.sink`, so a suppressed call is visible as "no sink call, counter
//! unchanged". No function body declares locals.

#![allow(dead_code)]

use std::collections::BTreeMap;

use wasm_encoder::{
    CodeSection, ConstExpr, DataSection, Elements, EntityType, ExportKind, ExportSection,
    Function, FunctionSection, GlobalSection, GlobalType, ImportSection, Instruction, MemorySection,
    MemoryType, Module, RefType, StartSection, TableSection, TableType, TypeSection, ValType,
};
use wasmparser::{ExternalKind, Parser, Payload};

pub const FUNCTION_COUNT: u32 = 500;
pub const IMPORT_COUNT: u32 = 3;

pub const SINK: u32 = 1;
pub const START: u32 = 4;
pub const MALLOC: u32 = 5;
pub const FREE: u32 = 6;
pub const DRIVE: u32 = 10;
pub const DISPATCH: u32 = 11;
pub const SEND: u32 = 105;
pub const RECV: u32 = 406;

pub const GLOBAL_SENT: u32 = 0;
pub const GLOBAL_RECEIVED: u32 = 1;
pub const GLOBAL_READY: u32 = 2;
pub const GLOBAL_HEAP: u32 = 3;

pub const HEAP_START: i32 = 1024;
pub const SOCKET_PTR: u32 = 103_360;
pub const SOCKET_VALUE: i32 = 42;

const TY_VOID: u32 = 0;
const TY_SEND: u32 = 1;
const TY_RECV: u32 = 2;
const TY_MALLOC: u32 = 3;
const TY_I32_VOID: u32 = 4;
const TY_SINK: u32 = 5;

fn is_filler(ordinal: u32) -> bool {
    ordinal >= IMPORT_COUNT
        && ordinal < FUNCTION_COUNT
        && ![START, MALLOC, FREE, DRIVE, DISPATCH, SEND, RECV].contains(&ordinal)
}

fn type_of(ordinal: u32) -> u32 {
    match ordinal {
        MALLOC => TY_MALLOC,
        FREE => TY_I32_VOID,
        DRIVE | DISPATCH | RECV => TY_RECV,
        SEND => TY_SEND,
        _ => TY_VOID,
    }
}

fn mutable_i32(globals: &mut GlobalSection, init: i32) {
    globals.global(
        GlobalType {
            val_type: ValType::I32,
            mutable: true,
            shared: false,
        },
        &ConstExpr::i32_const(init),
    );
}

fn counted_sink(f: &mut Function, counter: u32, ptr: u32, len: u32) {
    f.instruction(&Instruction::GlobalGet(counter));
    f.instruction(&Instruction::I32Const(1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::GlobalSet(counter));
    f.instruction(&Instruction::LocalGet(ptr));
    f.instruction(&Instruction::LocalGet(len));
    f.instruction(&Instruction::Call(SINK));
    f.instruction(&Instruction::LocalGet(len));
    f.instruction(&Instruction::End);
}

fn body(ordinal: u32) -> Function {
    let mut f = Function::new(vec![]);
    match ordinal {
        START => {
            f.instruction(&Instruction::I32Const(1));
            f.instruction(&Instruction::GlobalSet(GLOBAL_READY));
            f.instruction(&Instruction::End);
        }
        MALLOC => {
            f.instruction(&Instruction::GlobalGet(GLOBAL_HEAP));
            f.instruction(&Instruction::GlobalGet(GLOBAL_HEAP));
            f.instruction(&Instruction::LocalGet(0));
            f.instruction(&Instruction::I32Add);
            f.instruction(&Instruction::GlobalSet(GLOBAL_HEAP));
            f.instruction(&Instruction::End);
        }
        FREE => {
            f.instruction(&Instruction::End);
        }
        DRIVE => {
            f.instruction(&Instruction::I32Const(0));
            f.instruction(&Instruction::LocalGet(0));
            f.instruction(&Instruction::LocalGet(1));
            f.instruction(&Instruction::Call(SEND));
            f.instruction(&Instruction::End);
        }
        DISPATCH => {
            f.instruction(&Instruction::LocalGet(0));
            f.instruction(&Instruction::LocalGet(1));
            f.instruction(&Instruction::I32Const(1));
            f.instruction(&Instruction::CallIndirect {
                type_index: TY_RECV,
                table_index: 0,
            });
            f.instruction(&Instruction::End);
        }
        SEND => counted_sink(&mut f, GLOBAL_SENT, 1, 2),
        RECV => counted_sink(&mut f, GLOBAL_RECEIVED, 0, 1),
        _ => {
            if is_filler(ordinal + 1) {
                f.instruction(&Instruction::Call(ordinal + 1));
            }
            f.instruction(&Instruction::End);
        }
    }
    f
}

/// Build the fixture module.
pub fn game_module() -> Vec<u8> {
    let mut module = Module::new();

    let mut types = TypeSection::new();
    types.ty().function(vec![], vec![]);
    types
        .ty()
        .function(vec![ValType::I32; 3], vec![ValType::I32]);
    types
        .ty()
        .function(vec![ValType::I32; 2], vec![ValType::I32]);
    types.ty().function(vec![ValType::I32], vec![ValType::I32]);
    types.ty().function(vec![ValType::I32], vec![]);
    types.ty().function(vec![ValType::I32; 2], vec![]);
    module.section(&types);

    let mut imports = ImportSection::new();
    imports.import("env", "tick", EntityType::Function(TY_VOID));
    imports.import("env", "sink", EntityType::Function(TY_SINK));
    imports.import("env", "log", EntityType::Function(TY_I32_VOID));
    module.section(&imports);

    let mut funcs = FunctionSection::new();
    for ordinal in IMPORT_COUNT..FUNCTION_COUNT {
        funcs.function(type_of(ordinal));
    }
    module.section(&funcs);

    let mut tables = TableSection::new();
    tables.table(TableType {
        element_type: RefType::FUNCREF,
        table64: false,
        minimum: 2,
        maximum: None,
        shared: false,
    });
    module.section(&tables);

    let mut memories = MemorySection::new();
    memories.memory(MemoryType {
        minimum: 2,
        maximum: None,
        memory64: false,
        shared: false,
        page_size_log2: None,
    });
    module.section(&memories);

    let mut globals = GlobalSection::new();
    mutable_i32(&mut globals, 0);
    mutable_i32(&mut globals, 0);
    mutable_i32(&mut globals, 0);
    mutable_i32(&mut globals, HEAP_START);
    module.section(&globals);

    let mut exports = ExportSection::new();
    exports.export("memory", ExportKind::Memory, 0);
    exports.export("R", ExportKind::Func, MALLOC);
    exports.export("t", ExportKind::Func, FREE);
    exports.export("drive", ExportKind::Func, DRIVE);
    exports.export("dispatch", ExportKind::Func, DISPATCH);
    exports.export("sent", ExportKind::Global, GLOBAL_SENT);
    exports.export("received", ExportKind::Global, GLOBAL_RECEIVED);
    exports.export("ready", ExportKind::Global, GLOBAL_READY);
    module.section(&exports);

    module.section(&StartSection {
        function_index: START,
    });

    let mut elements = wasm_encoder::ElementSection::new();
    let table_funcs = [SEND, RECV];
    elements.active(
        Some(0),
        &ConstExpr::i32_const(0),
        Elements::Functions(table_funcs[..].into()),
    );
    module.section(&elements);

    let mut code = CodeSection::new();
    for ordinal in IMPORT_COUNT..FUNCTION_COUNT {
        code.function(&body(ordinal));
    }
    module.section(&code);

    let mut data = DataSection::new();
    data.active(
        0,
        &ConstExpr::i32_const(SOCKET_PTR as i32),
        SOCKET_VALUE.to_le_bytes(),
    );
    module.section(&data);

    module.finish()
}

// ── Inspection helpers ─────────────────────────────────────────────────────

/// Instruction bytes of every local function, keyed by function index.
/// Relies on the fixture's bodies declaring no locals.
pub fn code_bodies(wasm: &[u8]) -> BTreeMap<u32, Vec<u8>> {
    let mut imported = 0;
    let mut next = None;
    let mut bodies = BTreeMap::new();
    for payload in Parser::new(0).parse_all(wasm) {
        match payload.expect("valid payload") {
            Payload::ImportSection(reader) => {
                for import in reader {
                    if let wasmparser::TypeRef::Func(_) = import.expect("valid import").ty {
                        imported += 1;
                    }
                }
            }
            Payload::CodeSectionEntry(body) => {
                let index = *next.get_or_insert(imported);
                let range = body.range();
                let bytes = &wasm[range.start..range.end];
                assert_eq!(bytes[0], 0, "fixture bodies declare no locals");
                bodies.insert(index, bytes[1..].to_vec());
                next = Some(index + 1);
            }
            _ => {}
        }
    }
    bodies
}

/// Function exports as `(name, index)`.
pub fn function_exports(wasm: &[u8]) -> Vec<(String, u32)> {
    let mut exports = Vec::new();
    for payload in Parser::new(0).parse_all(wasm) {
        if let Ok(Payload::ExportSection(reader)) = payload {
            for export in reader {
                let export = export.expect("valid export");
                if export.kind == ExternalKind::Func {
                    exports.push((export.name.to_string(), export.index));
                }
            }
        }
    }
    exports
}

/// Every `(module, field)` pair in the import section.
pub fn imports(wasm: &[u8]) -> Vec<(String, String)> {
    let mut imports = Vec::new();
    for payload in Parser::new(0).parse_all(wasm) {
        if let Ok(Payload::ImportSection(reader)) = payload {
            for import in reader {
                let import = import.expect("valid import");
                imports.push((import.module.to_string(), import.name.to_string()));
            }
        }
    }
    imports
}

/// The start function index, if any.
pub fn start_function(wasm: &[u8]) -> Option<u32> {
    Parser::new(0)
        .parse_all(wasm)
        .find_map(|payload| match payload {
            Ok(Payload::StartSection { func, .. }) => Some(func),
            _ => None,
        })
}

/// Function indices listed by active element segments.
pub fn element_functions(wasm: &[u8]) -> Vec<u32> {
    let mut funcs = Vec::new();
    for payload in Parser::new(0).parse_all(wasm) {
        if let Ok(Payload::ElementSection(reader)) = payload {
            for element in reader {
                let element = element.expect("valid element");
                if let wasmparser::ElementItems::Functions(items) = element.items {
                    for func in items {
                        funcs.push(func.expect("valid function index"));
                    }
                }
            }
        }
    }
    funcs
}

/// First `call` target in a local function's body.
pub fn leading_call_target(wasm: &[u8], index: u32) -> Option<u32> {
    let mut imported = 0;
    let mut next = None;
    for payload in Parser::new(0).parse_all(wasm) {
        match payload.expect("valid payload") {
            Payload::ImportSection(reader) => {
                for import in reader {
                    if let wasmparser::TypeRef::Func(_) = import.expect("valid import").ty {
                        imported += 1;
                    }
                }
            }
            Payload::CodeSectionEntry(body) => {
                let current = *next.get_or_insert(imported);
                next = Some(current + 1);
                if current != index {
                    continue;
                }
                let mut reader = body.get_operators_reader().expect("operators");
                while !reader.eof() {
                    if let wasmparser::Operator::Call { function_index } =
                        reader.read().expect("valid operator")
                    {
                        return Some(function_index);
                    }
                }
                return None;
            }
            _ => {}
        }
    }
    None
}
