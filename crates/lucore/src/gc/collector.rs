//! Incremental tri-color mark-and-sweep, with an optional generational mode.
//!
//! The collector runs as a state machine (`Phase`) driven one slice at a time
//! by `step`, so a long collection never stalls the interpreter loop for more
//! than one GC "unit" of work — callers drive it from the allocation path,
//! charging debt proportional to bytes/objects allocated since the last step,
//! the same pacing knob (`pause`/`step_multiplier`) stock Lua exposes via
//! `collectgarbage`.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::gc::header::Age;
use crate::gc::ids::{FunctionId, GcRef, StringId, TableId, ThreadId, UpvalueId, UserdataId};
use crate::gc::pool::GcPool;
use crate::value::LuaValue;

/// Map a `LuaValue` to the GC object it refers to, if any — used to test
/// weakly-held entries and to find objects due for finalization.
fn value_gc_ref(value: &LuaValue) -> Option<GcRef> {
    if let Some(id) = value.as_table_id() {
        return Some(GcRef::Table(id));
    }
    if let Some(id) = value.as_closure_id() {
        return Some(GcRef::Function(id));
    }
    if let Some(id) = value.as_userdata_id() {
        return Some(GcRef::Userdata(id));
    }
    if let Some(id) = value.as_thread_id() {
        return Some(GcRef::Thread(id));
    }
    if let Some(id) = value.as_string_id() {
        return Some(GcRef::String(id));
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pause,
    Propagate,
    Atomic,
    Sweep,
}

#[derive(Debug, Clone, Copy)]
pub struct GcOptions {
    /// Percentage of current heap size the allocator may grow by before the
    /// next cycle starts (Lua default: 200, i.e. heap may double).
    pub pause: u32,
    /// How aggressively to step relative to allocation (Lua default: 100).
    pub step_multiplier: u32,
    pub generational: bool,
}

impl Default for GcOptions {
    fn default() -> Self {
        GcOptions { pause: 200, step_multiplier: 100, generational: false }
    }
}

pub struct Collector {
    pub phase: Phase,
    options: GcOptions,
    gray: Vec<GcRef>,
    /// Objects blackened during `Propagate` that turned out to reference a
    /// still-white object after the fact (a backward barrier firing) get
    /// requeued here instead of going gray again immediately.
    gray_again: Vec<GcRef>,
    /// Bytes/objects allocated since the debt counter was last paid down;
    /// negative means the collector is "ahead" and can coast.
    debt: i64,
    threshold: usize,
    /// Calls into allocation paths are inhibited (e.g. while a finalizer
    /// runs) to avoid the collector reentering mid-sweep.
    inhibited: bool,
    /// Interned `"__gc"`, needed to check a dying object's metatable during
    /// sweep. Set once via `set_gc_event` by whoever owns the string interner.
    gc_event: Option<StringId>,
    /// Objects found dead this sweep with a `__gc` handler, separated out so
    /// the VM can run their finalizers before the slot is actually freed.
    pending_finalizers: Vec<GcRef>,
}

impl Collector {
    pub fn new(options: GcOptions) -> Self {
        Collector {
            phase: Phase::Pause,
            options,
            gray: Vec::new(),
            gray_again: Vec::new(),
            debt: 0,
            threshold: 0,
            inhibited: false,
            gc_event: None,
            pending_finalizers: Vec::new(),
        }
    }

    pub fn options(&self) -> GcOptions {
        self.options
    }

    /// Must be called once with the interned `"__gc"` string id before the
    /// collector ever reaches `Phase::Sweep`, or finalizers are never queued.
    pub fn set_gc_event(&mut self, event: StringId) {
        self.gc_event = Some(event);
    }

    /// Drain objects queued for finalization this sweep. The caller (the VM)
    /// runs each one's `__gc` and then clears its `SEPARATED` bit once done.
    pub fn take_pending_finalizers(&mut self) -> Vec<GcRef> {
        std::mem::take(&mut self.pending_finalizers)
    }

    pub fn set_generational(&mut self, on: bool) {
        self.options.generational = on;
    }

    pub fn inhibit(&mut self) {
        self.inhibited = true;
    }

    pub fn allow(&mut self) {
        self.inhibited = false;
    }

    /// Charge allocation debt; callers invoke this after every pool
    /// allocation. Returns `true` once debt has accumulated enough to
    /// justify a `step`.
    pub fn charge(&mut self, amount: i64) -> bool {
        self.debt += amount;
        self.debt > 0
    }

    /// Mark a GC object as a root — used for the globals table, the
    /// registry, and every live thread's stack/open-upvalue set.
    pub fn add_root(&mut self, obj: GcRef, pool: &mut GcPool) {
        self.mark(obj, pool);
    }

    fn header_is_white(obj: GcRef, pool: &GcPool) -> bool {
        match obj {
            GcRef::String(id) => pool.strings.get(id.0).is_some_and(|o| o.header.is_white()),
            GcRef::Table(id) => pool.tables.get(id.0).is_some_and(|o| o.header.is_white()),
            GcRef::Function(id) => pool.closures.get(id.0).is_some_and(|o| o.header.is_white()),
            GcRef::Upvalue(id) => pool.upvalues.get(id.0).is_some_and(|o| o.header.is_white()),
            GcRef::Userdata(id) => pool.userdata.get(id.0).is_some_and(|o| o.header.is_white()),
            GcRef::Thread(id) => pool.threads.get(id.0).is_some_and(|o| o.header.is_white()),
        }
    }

    fn set_gray(obj: GcRef, pool: &mut GcPool) {
        match obj {
            GcRef::String(id) => {
                // Strings have no outgoing references; mark them straight to black.
                if let Some(o) = pool.strings.get_mut(id.0) {
                    o.header.set_black();
                }
            }
            GcRef::Table(id) => {
                if let Some(o) = pool.tables.get_mut(id.0) {
                    o.header.set_gray();
                }
            }
            GcRef::Function(id) => {
                if let Some(o) = pool.closures.get_mut(id.0) {
                    o.header.set_gray();
                }
            }
            GcRef::Upvalue(id) => {
                if let Some(o) = pool.upvalues.get_mut(id.0) {
                    o.header.set_gray();
                }
            }
            GcRef::Userdata(id) => {
                if let Some(o) = pool.userdata.get_mut(id.0) {
                    o.header.set_gray();
                }
            }
            GcRef::Thread(id) => {
                if let Some(o) = pool.threads.get_mut(id.0) {
                    o.header.set_gray();
                }
            }
        }
    }

    /// Mark `obj` reachable: white -> gray, queued for the propagate phase.
    /// A no-op once the object is already gray or black.
    pub fn mark(&mut self, obj: GcRef, pool: &mut GcPool) {
        if !Self::header_is_white(obj, pool) {
            return;
        }
        Self::set_gray(obj, pool);
        self.gray.push(obj);
    }

    /// Forward barrier: fired when a black object is about to store a
    /// reference to a white one (e.g. `table[k] = new_closure`). Re-grays
    /// the black object's *target*, the cheaper of the two standard barrier
    /// directions, since the container is likely to be written to again.
    pub fn barrier_forward(&mut self, target: GcRef, pool: &mut GcPool) {
        if self.phase == Phase::Propagate || self.phase == Phase::Atomic {
            self.mark(target, pool);
        }
    }

    /// Backward barrier: re-grays the *container* so it gets rescanned,
    /// used for objects (tables in particular) that mutate often enough
    /// that re-marking every write's target would be more expensive than
    /// one rescan.
    pub fn barrier_back(&mut self, container: GcRef, pool: &mut GcPool) {
        if self.phase != Phase::Propagate {
            return;
        }
        Self::set_gray(container, pool);
        self.gray_again.push(container);
    }

    /// Advance the collector by one unit of work. Returns the phase reached.
    pub fn step(&mut self, pool: &mut GcPool, children_of: impl Fn(GcRef, &GcPool) -> Vec<GcRef>) -> Phase {
        if self.inhibited {
            return self.phase;
        }
        match self.phase {
            Phase::Pause => {
                trace!("gc: pause -> propagate");
                self.phase = Phase::Propagate;
            }
            Phase::Propagate => {
                if let Some(obj) = self.gray.pop() {
                    Self::set_black(obj, pool);
                    for child in children_of(obj, pool) {
                        self.mark(child, pool);
                    }
                } else {
                    trace!("gc: propagate -> atomic");
                    self.phase = Phase::Atomic;
                }
            }
            Phase::Atomic => {
                // Rescan anything re-grayed by a backward barrier during propagation.
                while let Some(obj) = self.gray_again.pop() {
                    self.mark(obj, pool);
                    while let Some(o) = self.gray.pop() {
                        Self::set_black(o, pool);
                        for child in children_of(o, pool) {
                            self.mark(child, pool);
                        }
                    }
                }
                debug!("gc: atomic -> sweep");
                self.phase = Phase::Sweep;
            }
            Phase::Sweep => {
                self.sweep(pool);
                debug!(live = pool.live_count(), "gc: sweep -> pause");
                self.threshold = pool.live_count() * self.options.pause as usize / 100;
                self.debt = -(self.threshold as i64);
                pool.current_white = !pool.current_white;
                self.phase = Phase::Pause;
            }
        }
        self.phase
    }

    fn set_black(obj: GcRef, pool: &mut GcPool) {
        match obj {
            GcRef::String(id) => {
                if let Some(o) = pool.strings.get_mut(id.0) {
                    o.header.set_black();
                }
            }
            GcRef::Table(id) => {
                if let Some(o) = pool.tables.get_mut(id.0) {
                    o.header.set_black();
                }
            }
            GcRef::Function(id) => {
                if let Some(o) = pool.closures.get_mut(id.0) {
                    o.header.set_black();
                }
            }
            GcRef::Upvalue(id) => {
                if let Some(o) = pool.upvalues.get_mut(id.0) {
                    o.header.set_black();
                }
            }
            GcRef::Userdata(id) => {
                if let Some(o) = pool.userdata.get_mut(id.0) {
                    o.header.set_black();
                }
            }
            GcRef::Thread(id) => {
                if let Some(o) = pool.threads.get_mut(id.0) {
                    o.header.set_black();
                }
            }
        }
    }

    /// Find white tables/userdata whose metatable declares `__gc` and hasn't
    /// already run one, and pull them out of this sweep: `set_black` keeps
    /// `sweep_one` from reclaiming them immediately, `set_separated` marks
    /// them as owned by the to-be-finalized list instead of their arena, and
    /// `set_finalized` ensures a second `__gc` never fires for the same
    /// object. Two passes (collect then mutate) since the lookup needs the
    /// metatable's own arena slot read immutably while other slots in the
    /// same arena get mutated.
    fn queue_pending_finalizers(&mut self, pool: &mut GcPool) {
        let Some(gc_event) = self.gc_event else { return };
        let key = LuaValue::string(gc_event);
        let mut found = Vec::new();
        for (id, t) in pool.tables.iter() {
            if t.header.is_white() && !t.header.is_finalized() {
                if let Some(mt) = t.data.metatable {
                    if pool.tables.get(mt.0).is_some_and(|m| !m.data.get(&key).is_nil()) {
                        found.push(GcRef::Table(TableId(id)));
                    }
                }
            }
        }
        for (id, u) in pool.userdata.iter() {
            if u.header.is_white() && !u.header.is_finalized() {
                if let Some(mt) = u.data.metatable {
                    if pool.tables.get(mt.0).is_some_and(|m| !m.data.get(&key).is_nil()) {
                        found.push(GcRef::Userdata(UserdataId(id)));
                    }
                }
            }
        }
        for r in found {
            match r {
                GcRef::Table(id) => {
                    if let Some(o) = pool.tables.get_mut(id.0) {
                        o.header.set_finalized();
                        o.header.set_separated();
                        o.header.set_black();
                    }
                }
                GcRef::Userdata(id) => {
                    if let Some(o) = pool.userdata.get_mut(id.0) {
                        o.header.set_finalized();
                        o.header.set_separated();
                        o.header.set_black();
                    }
                }
                _ => {}
            }
            self.pending_finalizers.push(r);
        }
    }

    fn collect_dead_set(pool: &GcPool) -> HashSet<GcRef> {
        let mut dead = HashSet::new();
        for (id, t) in pool.tables.iter() {
            if t.header.is_white() {
                dead.insert(GcRef::Table(TableId(id)));
            }
        }
        for (id, c) in pool.closures.iter() {
            if c.header.is_white() {
                dead.insert(GcRef::Function(FunctionId(id)));
            }
        }
        for (id, u) in pool.upvalues.iter() {
            if u.header.is_white() {
                dead.insert(GcRef::Upvalue(UpvalueId(id)));
            }
        }
        for (id, u) in pool.userdata.iter() {
            if u.header.is_white() {
                dead.insert(GcRef::Userdata(UserdataId(id)));
            }
        }
        for (id, t) in pool.threads.iter() {
            if t.header.is_white() {
                dead.insert(GcRef::Thread(ThreadId(id)));
            }
        }
        for (id, s) in pool.strings.iter() {
            if s.header.is_white() {
                dead.insert(GcRef::String(StringId(id)));
            }
        }
        dead
    }

    /// Clear weakly-held entries before the arenas themselves get swept, so
    /// "is this value dead" can still be answered from the pre-sweep color.
    fn clear_weak_tables(pool: &mut GcPool) {
        let dead = Self::collect_dead_set(pool);
        for (_, t) in pool.tables.iter_mut() {
            if t.data.weak_keys || t.data.weak_values {
                let (weak_keys, weak_values) = (t.data.weak_keys, t.data.weak_values);
                t.data.remove_weak_entries(weak_keys, weak_values, |v| value_gc_ref(v).is_some_and(|r| dead.contains(&r)));
            }
        }
    }

    /// Drop every still-white object: nothing marked it reachable this cycle.
    /// In generational mode, survivors are promoted instead of reset to
    /// white so the next (minor) cycle can skip rescanning them.
    fn sweep(&mut self, pool: &mut GcPool) {
        self.queue_pending_finalizers(pool);
        Self::clear_weak_tables(pool);
        let generational = self.options.generational;
        let current_white = pool.current_white;
        pool.tables.retain_mut(|t| Self::sweep_one(&mut t.header, generational, current_white));
        pool.closures.retain_mut(|c| Self::sweep_one(&mut c.header, generational, current_white));
        pool.upvalues.retain_mut(|u| Self::sweep_one(&mut u.header, generational, current_white));
        pool.userdata.retain_mut(|u| Self::sweep_one(&mut u.header, generational, current_white));
        pool.threads.retain_mut(|t| Self::sweep_one(&mut t.header, generational, current_white));
        pool.strings.retain_mut(|s| Self::sweep_one(&mut s.header, generational, current_white));
    }

    fn sweep_one(header: &mut crate::gc::header::GcHeader, generational: bool, current_white: bool) -> bool {
        if header.is_white() {
            return false;
        }
        if generational {
            header.set_age(match header.age() {
                Age::New => Age::Survival,
                Age::Survival => Age::Old,
                other => other,
            });
        }
        header.set_white(!current_white);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_value::LuaTable;

    #[test]
    fn unreachable_table_is_collected() {
        let mut pool = GcPool::new();
        let mut gc = Collector::new(GcOptions::default());
        let _root = pool.alloc_table(LuaTable::new());
        let garbage = pool.alloc_table(LuaTable::new());

        gc.mark(GcRef::Table(_root), &mut pool);
        // run a full cycle
        while gc.step(&mut pool, |_, _| Vec::new()) != Phase::Pause {}
        assert!(pool.get_table(_root).is_some());
        assert!(pool.get_table(garbage).is_none());
    }

    #[test]
    fn reachable_chain_survives() {
        let mut pool = GcPool::new();
        let mut gc = Collector::new(GcOptions::default());
        let child = pool.alloc_table(LuaTable::new());
        let parent = pool.alloc_table(LuaTable::new());

        gc.mark(GcRef::Table(parent), &mut pool);
        let child_ref = GcRef::Table(child);
        while gc.step(&mut pool, move |obj, _| {
            if obj == GcRef::Table(parent) { vec![child_ref] } else { Vec::new() }
        }) != Phase::Pause
        {}
        assert!(pool.get_table(child).is_some());
    }
}
