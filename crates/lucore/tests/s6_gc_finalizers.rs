//! S6: a table whose metatable defines `__gc` survives the sweep that finds
//! it dead (queued for finalization instead of freed immediately), runs its
//! finalizer exactly once via `LuaVM::run_pending_finalizers`, and is only
//! then reclaimed by a later cycle.

use std::sync::Mutex;

use lucore::gc::Phase;
use lucore::{new_vm, LuaResult, LuaState, LuaTable, LuaValue, VmOptions};

static GC_LOG: Mutex<Vec<i64>> = Mutex::new(Vec::new());

fn gc_cb(l: &mut LuaState) -> LuaResult<usize> {
    let tbl = l.arg(0).as_table_id().expect("__gc receives the dying table as its first argument");
    let tag_key = LuaValue::string(l.vm.pool.intern_string("tag"));
    let tag = l.vm.pool.get_table(tbl).unwrap().get(&tag_key).as_integer().unwrap();
    GC_LOG.lock().unwrap().push(tag);
    Ok(0)
}

#[test]
fn gc_finalizer_runs_once_then_the_object_is_reclaimed() {
    GC_LOG.lock().unwrap().clear();
    let mut vm = new_vm(VmOptions::default()).unwrap();

    let mt = vm.pool.alloc_table(LuaTable::new());
    let gc_key = LuaValue::string(vm.metamethod_names().gc);
    vm.pool.get_table_mut(mt).unwrap().set(gc_key, LuaValue::native_function(gc_cb));

    let tag_key = LuaValue::string(vm.pool.intern_string("tag"));
    let dying = vm.pool.alloc_table(LuaTable::new());
    vm.pool.get_table_mut(dying).unwrap().set(tag_key, LuaValue::integer(7));
    vm.pool.get_table_mut(dying).unwrap().metatable = Some(mt);

    // Nothing roots `dying` (or `mt`): both start white and this cycle finds
    // them dead, but `__gc` must get a chance to run before either is freed.
    while vm.gc.step(&mut vm.pool, |_, _| Vec::new()) != Phase::Pause {}
    assert!(vm.pool.get_table(dying).is_some(), "finalizer-pending table must survive its first sweep");
    assert!(GC_LOG.lock().unwrap().is_empty(), "the handler only runs via run_pending_finalizers, not during sweep itself");

    vm.run_pending_finalizers().unwrap();
    assert_eq!(*GC_LOG.lock().unwrap(), vec![7]);

    // A second full cycle reclaims it now that FINALIZED is set and nothing
    // re-marked it reachable.
    while vm.gc.step(&mut vm.pool, |_, _| Vec::new()) != Phase::Pause {}
    assert!(vm.pool.get_table(dying).is_none());
}
