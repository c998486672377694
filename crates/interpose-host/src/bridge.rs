//! The instantiation interception point and the live hooked instance.

use interpose_patch::{PatchReport, Patcher};
use interpose_types::{BridgeConfig, HookTag, Signature, ValueKind};
use log::{debug, info, warn};
use wasmi::{
    Caller, Engine, Extern, ExternType, Func, Instance, Linker, Memory, Module, Store, TypedFunc,
    Val,
};

use crate::error::{BridgeError, BridgeResult};
use crate::events::{EventFilter, ListenerId, Listeners, PacketEvent, Verdict};
use crate::memory;

/// Store data seen by the hook while the module runs.
pub struct HookState {
    listeners: Listeners,
    memory: Option<Memory>,
    memory_export: String,
    dispatched: u64,
}

impl HookState {
    fn new(memory_export: String) -> Self {
        Self {
            listeners: Listeners::default(),
            memory: None,
            memory_export,
            dispatched: 0,
        }
    }

    /// Number of events delivered to listeners so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

type ReadyCallback = Box<dyn FnOnce(&HookedInstance)>;

fn wasmi_err(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Wasmi(e.to_string())
}

fn trap(e: wasmi::Error) -> BridgeError {
    BridgeError::Trap(e.to_string())
}

/// The hook body: copy the packet out of linear memory and hand it to the
/// listeners. Anything unexpected is logged and treated as pass-through.
fn main_hook(mut caller: Caller<'_, HookState>, tag: i32, ptr: i32, len: i32) -> i32 {
    let Some(tag) = HookTag::from_wire(tag) else {
        warn!("hook called with unknown tag {tag}");
        return Verdict::Pass.code();
    };
    let memory = caller.data().memory.or_else(|| {
        let name = caller.data().memory_export.clone();
        caller.get_export(&name).and_then(Extern::into_memory)
    });
    let Some(memory) = memory else {
        warn!("{tag} hook fired before any memory was available");
        return Verdict::Pass.code();
    };
    let payload = match memory::read_bytes(
        memory.data(&caller),
        memory::offset(ptr),
        memory::offset(len) as usize,
    ) {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            warn!("{tag} hook: {e}");
            return Verdict::Pass.code();
        }
    };

    let event = PacketEvent { tag, payload };
    let state = caller.data_mut();
    state.dispatched += 1;
    let verdict = state.listeners.dispatch(&event);
    debug!(
        "{} event, {} bytes, {:?}",
        event.name(),
        event.payload.len(),
        verdict
    );
    verdict.code()
}

/// Intercepts one module instantiation: patches the bytes, binds the hook
/// and hands back a [`HookedInstance`].
pub struct HostBridge {
    config: BridgeConfig,
    store: Store<HookState>,
    linker: Linker<HookState>,
    imported_memory: Option<(String, String)>,
    ready: Vec<ReadyCallback>,
}

impl HostBridge {
    pub fn new(engine: &Engine, config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let store = Store::new(engine, HookState::new(config.memory_export.clone()));
        Ok(Self {
            config,
            store,
            linker: Linker::new(engine),
            imported_memory: None,
            ready: Vec::new(),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Define the module's other imports here before instantiating.
    pub fn linker_mut(&mut self) -> &mut Linker<HookState> {
        &mut self.linker
    }

    pub fn store_mut(&mut self) -> &mut Store<HookState> {
        &mut self.store
    }

    /// Provide the linear memory as the `module.field` import instead of
    /// reading the memory export. The memory is created at instantiation
    /// with the limits the module declares for that import.
    pub fn use_imported_memory(&mut self, module: &str, field: &str) {
        self.imported_memory = Some((module.to_string(), field.to_string()));
    }

    pub fn add_listener<F>(&mut self, filter: impl Into<EventFilter>, listener: F) -> ListenerId
    where
        F: FnMut(&PacketEvent) -> Verdict + 'static,
    {
        self.store
            .data_mut()
            .listeners
            .add(filter.into(), Box::new(listener))
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.store.data_mut().listeners.remove(id)
    }

    /// Run `callback` once the instance, its memory and its exports are
    /// available.
    pub fn on_ready<F>(&mut self, callback: F)
    where
        F: FnOnce(&HookedInstance) + 'static,
    {
        self.ready.push(Box::new(callback));
    }

    /// Patch `wasm`, bind the hook and instantiate it.
    pub fn instantiate(mut self, wasm: &[u8]) -> BridgeResult<HookedInstance> {
        let patched = Patcher::new(self.config.patch.clone()).and_then(|p| p.patch(wasm));
        let (bytes, report) = match patched {
            Ok(patched) => {
                let expected = Signature::new([ValueKind::I32; 3], [ValueKind::I32]);
                if patched.report.hook_signature != expected {
                    return Err(BridgeError::IncompatibleHook(patched.report.hook_signature));
                }
                (patched.wasm, Some(patched.report))
            }
            Err(e) if self.config.fallback_to_original => {
                warn!("patch failed, instantiating the original module: {e}");
                (wasm.to_vec(), None)
            }
            Err(e) => return Err(e.into()),
        };

        if report.is_some() {
            let hook = &self.config.patch.hook;
            self.linker
                .func_wrap(&hook.module, &hook.field, main_hook)
                .map_err(wasmi_err)?;
        }

        let module = Module::new(self.store.engine(), &bytes[..]).map_err(wasmi_err)?;
        if let Some((import_module, field)) = &self.imported_memory {
            let ty = module
                .imports()
                .find(|i| i.module() == import_module.as_str() && i.name() == field.as_str())
                .and_then(|i| match i.ty() {
                    ExternType::Memory(ty) => Some(ty.clone()),
                    _ => None,
                })
                .ok_or(BridgeError::MissingMemory)?;
            let memory = Memory::new(&mut self.store, ty).map_err(wasmi_err)?;
            self.linker
                .define(import_module, field, memory)
                .map_err(wasmi_err)?;
            self.store.data_mut().memory = Some(memory);
        }
        let instance = self
            .linker
            .instantiate(&mut self.store, &module)
            .map_err(wasmi_err)?
            .start(&mut self.store)
            .map_err(trap)?;

        let memory = self
            .store
            .data()
            .memory
            .or_else(|| instance.get_memory(&self.store, &self.config.memory_export))
            .ok_or(BridgeError::MissingMemory)?;
        self.store.data_mut().memory = Some(memory);

        let malloc = instance
            .get_typed_func::<i32, i32>(&self.store, &self.config.malloc_export)
            .ok();
        let free = instance
            .get_typed_func::<i32, ()>(&self.store, &self.config.free_export)
            .ok();
        if malloc.is_none() || free.is_none() {
            debug!(
                "allocator exports `{}` / `{}` not found; send and recv unavailable",
                self.config.malloc_export, self.config.free_export
            );
        }

        let targets = match &report {
            Some(report) => Some(Targets {
                send: export_func(&instance, &self.store, report, HookTag::Send)?,
                recv: export_func(&instance, &self.store, report, HookTag::Receive)?,
            }),
            None => None,
        };

        match &report {
            Some(report) => info!(
                "instantiated patched module, hook at function {}",
                report.hook_index
            ),
            None => info!("instantiated unpatched module"),
        }

        let HostBridge {
            config,
            store,
            ready,
            ..
        } = self;
        let hooked = HookedInstance {
            config,
            store,
            instance,
            memory,
            malloc,
            free,
            targets,
            report,
        };
        for callback in ready {
            callback(&hooked);
        }
        Ok(hooked)
    }
}

fn export_func(
    instance: &Instance,
    store: &Store<HookState>,
    report: &PatchReport,
    tag: HookTag,
) -> BridgeResult<Func> {
    let name = report
        .target(tag)
        .map(|t| t.export_name.clone())
        .ok_or(BridgeError::NotPatched)?;
    instance
        .get_func(store, &name)
        .ok_or(BridgeError::MissingExport(name))
}

struct Targets {
    send: Func,
    recv: Func,
}

/// A live instance whose target functions report to the bridge's
/// listeners.
///
/// Owns its store, so calls are serialised through `&mut self`.
pub struct HookedInstance {
    config: BridgeConfig,
    store: Store<HookState>,
    instance: Instance,
    memory: Memory,
    malloc: Option<TypedFunc<i32, i32>>,
    free: Option<TypedFunc<i32, ()>>,
    targets: Option<Targets>,
    report: Option<PatchReport>,
}

impl HookedInstance {
    /// Whether the running module is the patched one.
    pub fn is_patched(&self) -> bool {
        self.targets.is_some()
    }

    pub fn report(&self) -> Option<&PatchReport> {
        self.report.as_ref()
    }

    pub fn instance(&self) -> Instance {
        self.instance
    }

    pub fn memory(&self) -> Memory {
        self.memory
    }

    pub fn store(&self) -> &Store<HookState> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<HookState> {
        &mut self.store
    }

    pub fn add_listener<F>(&mut self, filter: impl Into<EventFilter>, listener: F) -> ListenerId
    where
        F: FnMut(&PacketEvent) -> Verdict + 'static,
    {
        self.store
            .data_mut()
            .listeners
            .add(filter.into(), Box::new(listener))
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.store.data_mut().listeners.remove(id)
    }

    /// The `i32` stored at a fixed offset in linear memory.
    pub fn read_i32(&self, offset: u32) -> BridgeResult<i32> {
        memory::read_i32(self.memory.data(&self.store), offset)
    }

    pub fn read_bytes(&self, offset: u32, len: usize) -> BridgeResult<Vec<u8>> {
        memory::read_bytes(self.memory.data(&self.store), offset, len).map(<[u8]>::to_vec)
    }

    /// Feed `buf` to the exported send routine as if the module sent it.
    pub fn send(&mut self, buf: &[u8]) -> BridgeResult<()> {
        self.call_target(HookTag::Send, buf)
    }

    /// Feed `buf` to the exported receive routine as if it had arrived.
    pub fn recv(&mut self, buf: &[u8]) -> BridgeResult<()> {
        self.call_target(HookTag::Receive, buf)
    }

    fn call_target(&mut self, tag: HookTag, buf: &[u8]) -> BridgeResult<()> {
        let func = match (&self.targets, tag) {
            (None, _) => return Err(BridgeError::NotPatched),
            (Some(t), HookTag::Send) => t.send,
            (Some(t), HookTag::Receive) => t.recv,
        };
        let (Some(malloc), Some(free)) = (self.malloc.clone(), self.free.clone()) else {
            let missing = if self.malloc.is_none() {
                &self.config.malloc_export
            } else {
                &self.config.free_export
            };
            return Err(BridgeError::MissingExport(missing.clone()));
        };
        let len = i32::try_from(buf.len()).map_err(|_| BridgeError::OutOfBounds {
            offset: 0,
            len: buf.len(),
        })?;

        let ptr = malloc.call(&mut self.store, len).map_err(trap)?;
        let result = self.copy_and_call(func, tag, ptr, len, buf);
        let freed = free.call(&mut self.store, ptr).map_err(trap);
        debug!("{tag} of {} bytes through allocation at {ptr}", buf.len());
        result.and(freed)
    }

    fn copy_and_call(
        &mut self,
        func: Func,
        tag: HookTag,
        ptr: i32,
        len: i32,
        buf: &[u8],
    ) -> BridgeResult<()> {
        memory::write_bytes(
            self.memory.data_mut(&mut self.store),
            memory::offset(ptr),
            buf,
        )?;

        let mut args = Vec::with_capacity(3);
        if let (HookTag::Send, Some(offset)) = (tag, self.config.socket_ptr_offset) {
            args.push(Val::I32(self.read_i32(offset)?));
        }
        args.push(Val::I32(ptr));
        args.push(Val::I32(len));

        let results = func.ty(&self.store).results().len();
        let mut out = vec![Val::I32(0); results];
        func.call(&mut self.store, &args, &mut out).map_err(trap)
    }
}
