//! Execution tests: patched modules run under wasmi with a test hook.
//!
//! A hook returning non-zero suppresses the original body; a hook
//! returning zero leaves the original behaviour intact.

mod common;

use common::*;
use interpose_patch::{patch, PatchConfig};
use wasmi::{Caller, Engine, Instance, Linker, Module, Store};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct HostState {
    /// Value the hook returns.
    verdict: i32,
    /// `(tag, ptr, len)` per hook call.
    hook_calls: Vec<(i32, i32, i32)>,
    /// `(ptr, len)` per `env.sink` call.
    sunk: Vec<(i32, i32)>,
}

fn instantiate(wasm: &[u8], verdict: i32, with_hook: bool) -> (Store<HostState>, Instance) {
    let engine = Engine::default();
    let module = Module::new(&engine, wasm).expect("failed to parse wasm module");
    let mut store = Store::new(
        &engine,
        HostState {
            verdict,
            ..HostState::default()
        },
    );
    let mut linker = Linker::<HostState>::new(&engine);

    linker
        .func_wrap("env", "tick", |_: Caller<'_, HostState>| {})
        .unwrap();
    linker
        .func_wrap(
            "env",
            "sink",
            |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
                caller.data_mut().sunk.push((ptr, len));
            },
        )
        .unwrap();
    linker
        .func_wrap("env", "log", |_: Caller<'_, HostState>, _: i32| {})
        .unwrap();
    if with_hook {
        linker
            .func_wrap(
                "hook",
                "mainHook",
                |mut caller: Caller<'_, HostState>, tag: i32, ptr: i32, len: i32| -> i32 {
                    caller.data_mut().hook_calls.push((tag, ptr, len));
                    caller.data().verdict
                },
            )
            .unwrap();
    }

    let instance = linker
        .instantiate(&mut store, &module)
        .expect("failed to instantiate")
        .start(&mut store)
        .expect("failed to start instance");
    (store, instance)
}

fn global(store: &Store<HostState>, instance: &Instance, name: &str) -> i32 {
    instance
        .get_global(store, name)
        .unwrap_or_else(|| panic!("global `{name}` missing"))
        .get(store)
        .i32()
        .expect("i32 global")
}

fn patched() -> Vec<u8> {
    patch(&game_module(), &PatchConfig::default())
        .expect("patch succeeds")
        .wasm
}

// ══════════════════════════════════════════════════════════════════════════════
// Tests
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_original_runs_without_hook() {
    let (mut store, instance) = instantiate(&game_module(), 0, false);
    assert_eq!(global(&store, &instance, "ready"), 1);
    let drive = instance
        .get_typed_func::<(i32, i32), i32>(&store, "drive")
        .expect("drive export");
    assert_eq!(drive.call(&mut store, (64, 10)).unwrap(), 10);
    assert_eq!(store.data().sunk, vec![(64, 10)]);
}

#[test]
fn test_start_function_still_runs() {
    let (store, instance) = instantiate(&patched(), 0, true);
    assert_eq!(global(&store, &instance, "ready"), 1);
    assert!(store.data().hook_calls.is_empty());
}

#[test]
fn test_suppressing_hook_skips_send_body() {
    let (mut store, instance) = instantiate(&patched(), 1, true);
    let send = instance
        .get_typed_func::<(i32, i32, i32), i32>(&store, "sendPacket")
        .expect("sendPacket export");

    let result = send.call(&mut store, (SOCKET_VALUE, 64, 10)).unwrap();
    assert_eq!(result, 0, "early return yields the zero placeholder");
    assert_eq!(store.data().hook_calls, vec![(1, 64, 10)]);
    assert!(store.data().sunk.is_empty());
    assert_eq!(global(&store, &instance, "sent"), 0);
}

#[test]
fn test_suppressing_hook_skips_recv_body() {
    let (mut store, instance) = instantiate(&patched(), 1, true);
    let recv = instance
        .get_typed_func::<(i32, i32), i32>(&store, "recvPacket")
        .expect("recvPacket export");

    assert_eq!(recv.call(&mut store, (128, 4)).unwrap(), 0);
    assert_eq!(store.data().hook_calls, vec![(0, 128, 4)]);
    assert!(store.data().sunk.is_empty());
    assert_eq!(global(&store, &instance, "received"), 0);
}

#[test]
fn test_passing_hook_runs_original_body() {
    let (mut store, instance) = instantiate(&patched(), 0, true);
    let send = instance
        .get_typed_func::<(i32, i32, i32), i32>(&store, "sendPacket")
        .expect("sendPacket export");
    let recv = instance
        .get_typed_func::<(i32, i32), i32>(&store, "recvPacket")
        .expect("recvPacket export");

    assert_eq!(send.call(&mut store, (SOCKET_VALUE, 64, 10)).unwrap(), 10);
    assert_eq!(recv.call(&mut store, (128, 4)).unwrap(), 4);
    assert_eq!(store.data().hook_calls, vec![(1, 64, 10), (0, 128, 4)]);
    assert_eq!(store.data().sunk, vec![(64, 10), (128, 4)]);
    assert_eq!(global(&store, &instance, "sent"), 1);
    assert_eq!(global(&store, &instance, "received"), 1);
}

#[test]
fn test_internal_callers_reach_patched_target() {
    let (mut store, instance) = instantiate(&patched(), 1, true);

    // Direct call through a renumbered `call`.
    let drive = instance
        .get_typed_func::<(i32, i32), i32>(&store, "drive")
        .expect("drive export");
    assert_eq!(drive.call(&mut store, (64, 10)).unwrap(), 0);

    // Indirect call through a renumbered element segment.
    let dispatch = instance
        .get_typed_func::<(i32, i32), i32>(&store, "dispatch")
        .expect("dispatch export");
    assert_eq!(dispatch.call(&mut store, (128, 4)).unwrap(), 0);

    assert_eq!(store.data().hook_calls, vec![(1, 64, 10), (0, 128, 4)]);
    assert!(store.data().sunk.is_empty());
}
