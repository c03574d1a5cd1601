//! S5: a weak-valued table drops entries whose value the collector finds
//! unreachable during its sweep, instead of keeping them alive forever.

use lucore::gc::{GcRef, Phase};
use lucore::{new_vm, LuaTable, LuaValue, VmOptions};

#[test]
fn weak_value_table_drops_entries_whose_value_becomes_unreachable() {
    let mut vm = new_vm(VmOptions::default()).unwrap();

    let root = vm.pool.alloc_table(LuaTable::new());
    vm.pool.get_table_mut(root).unwrap().weak_values = true;

    let garbage = vm.pool.alloc_table(LuaTable::new());
    let survivor = vm.pool.alloc_table(LuaTable::new());
    vm.pool.get_table_mut(root).unwrap().set(LuaValue::integer(1), LuaValue::table(garbage));
    vm.pool.get_table_mut(root).unwrap().set(LuaValue::integer(2), LuaValue::table(survivor));

    // Only `root` and `survivor` are rooted; `garbage` stays white and gets
    // cleared from the weak slot mid-sweep, then reclaimed outright.
    vm.gc.mark(GcRef::Table(root), &mut vm.pool);
    vm.gc.mark(GcRef::Table(survivor), &mut vm.pool);
    while vm.gc.step(&mut vm.pool, |_, _| Vec::new()) != Phase::Pause {}

    let root_ref = vm.pool.get_table(root).unwrap();
    assert!(root_ref.get(&LuaValue::integer(1)).is_nil());
    assert!(root_ref.get(&LuaValue::integer(2)).raw_equal(&LuaValue::table(survivor)));
    assert!(vm.pool.get_table(garbage).is_none());
    assert!(vm.pool.get_table(survivor).is_some());
}

#[test]
fn weak_key_table_drops_entries_whose_key_becomes_unreachable() {
    let mut vm = new_vm(VmOptions::default()).unwrap();

    let root = vm.pool.alloc_table(LuaTable::new());
    vm.pool.get_table_mut(root).unwrap().weak_keys = true;

    let garbage_key = vm.pool.alloc_table(LuaTable::new());
    let surviving_key = vm.pool.alloc_table(LuaTable::new());
    vm.pool.get_table_mut(root).unwrap().set(LuaValue::table(garbage_key), LuaValue::integer(1));
    vm.pool.get_table_mut(root).unwrap().set(LuaValue::table(surviving_key), LuaValue::integer(2));

    vm.gc.mark(GcRef::Table(root), &mut vm.pool);
    vm.gc.mark(GcRef::Table(surviving_key), &mut vm.pool);
    while vm.gc.step(&mut vm.pool, |_, _| Vec::new()) != Phase::Pause {}

    let root_ref = vm.pool.get_table(root).unwrap();
    assert!(root_ref.get(&LuaValue::table(surviving_key)).raw_equal(&LuaValue::integer(2)));
    assert!(vm.pool.get_table(garbage_key).is_none());
}
