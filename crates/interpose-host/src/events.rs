//! Intercepted-call events and the listeners that receive them.

use interpose_types::HookTag;

/// One intercepted call: its direction and a copy of the bytes involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketEvent {
    pub tag: HookTag,
    pub payload: Vec<u8>,
}

impl PacketEvent {
    /// `clientbound` or `serverbound`.
    pub fn name(&self) -> &'static str {
        self.tag.event_name()
    }
}

/// A listener's decision about the intercepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verdict {
    /// Let the original function body run.
    #[default]
    Pass,
    /// Return early from the patched function.
    Suppress,
}

impl Verdict {
    /// Value handed back to the injected prologue.
    pub fn code(self) -> i32 {
        match self {
            Verdict::Pass => 0,
            Verdict::Suppress => 1,
        }
    }
}

/// Which events a listener receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Only(HookTag),
}

impl EventFilter {
    pub fn matches(self, tag: HookTag) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(only) => only == tag,
        }
    }
}

impl From<HookTag> for EventFilter {
    fn from(tag: HookTag) -> Self {
        EventFilter::Only(tag)
    }
}

/// Handle returned by `add_listener`, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Box<dyn FnMut(&PacketEvent) -> Verdict>;

struct Listener {
    id: ListenerId,
    filter: EventFilter,
    callback: Callback,
}

/// Registered listeners, in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<Listener>,
}

impl Listeners {
    pub(crate) fn add(&mut self, filter: EventFilter, callback: Callback) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push(Listener {
            id,
            filter,
            callback,
        });
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|l| l.id != id);
        self.entries.len() != before
    }

    /// Deliver `event` to every matching listener. Every listener sees the
    /// event even after one has asked for suppression.
    pub(crate) fn dispatch(&mut self, event: &PacketEvent) -> Verdict {
        let mut verdict = Verdict::Pass;
        for listener in &mut self.entries {
            if !listener.filter.matches(event.tag) {
                continue;
            }
            if (listener.callback)(event) == Verdict::Suppress {
                verdict = Verdict::Suppress;
            }
        }
        verdict
    }
}
