//! S7: three related metamethod/coroutine behaviors that don't need a whole
//! file to themselves:
//!  - `__metatable` makes `setmetatable` refuse to touch a table and makes
//!    `getmetatable` hand back the guard value instead of the real metatable;
//!  - `__eq` fires for userdata operands, not just tables;
//!  - `coroutine.close` on a coroutine that is closing itself returns
//!    `(false, "cannot close a running coroutine")` instead of raising.

use std::rc::Rc;

use lucore::builder::ProtoBuilder;
use lucore::vm::call::call_value;
use lucore::vm::opcode::{Instruction, OpCode};
use lucore::{new_vm, Closure, LuaTable, LuaUserdata, LuaValue, LuaVM, VmOptions};

fn global_field(vm: &mut LuaVM, module: &str, field: &str) -> LuaValue {
    let table = vm.get_global(module).as_table_id().expect("module installed as a table");
    let key = LuaValue::string(vm.pool.intern_string(field));
    vm.pool.get_table(table).unwrap().get(&key)
}

#[test]
fn protected_metatable_blocks_setmetatable_and_getmetatable_sees_the_guard() {
    let mut vm = new_vm(VmOptions::default()).unwrap();
    let setmetatable_fn = vm.get_global("setmetatable");
    let getmetatable_fn = vm.get_global("getmetatable");

    let t = vm.pool.alloc_table(LuaTable::new());
    let mt = vm.pool.alloc_table(LuaTable::new());
    let metatable_key = LuaValue::string(vm.metamethod_names().metatable);
    let guard = LuaValue::string(vm.pool.intern_string("locked"));
    vm.pool.get_table_mut(mt).unwrap().set(metatable_key, guard);
    vm.pool.get_table_mut(t).unwrap().metatable = Some(mt);

    let other_mt = vm.pool.alloc_table(LuaTable::new());
    let err = call_value(&mut vm, setmetatable_fn, vec![LuaValue::table(t), LuaValue::table(other_mt)]).unwrap_err();
    assert!(err.message.contains("protected"));

    let seen = call_value(&mut vm, getmetatable_fn, vec![LuaValue::table(t)]).unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].raw_equal(&guard));
}

#[test]
fn eq_metamethod_fires_for_userdata_operands() {
    let mut vm = new_vm(VmOptions::default()).unwrap();

    let mt = vm.pool.alloc_table(LuaTable::new());
    let eq_key = LuaValue::string(vm.metamethod_names().eq);
    vm.pool.get_table_mut(mt).unwrap().set(eq_key, LuaValue::native_function(eq_by_payload));

    let a = vm.pool.alloc_userdata(LuaUserdata::new(42i64, "box"));
    vm.pool.get_userdata_mut(a).unwrap().metatable = Some(mt);
    let b = vm.pool.alloc_userdata(LuaUserdata::new(42i64, "box"));
    vm.pool.get_userdata_mut(b).unwrap().metatable = Some(mt);

    // R0 := EQ(Ua, Ub) via the skip-then-LoadBool idiom; return R0.
    let mut bld = ProtoBuilder::new("cmp", 0, false, 1);
    let k_a = bld.add_constant(LuaValue::userdata(a));
    let k_b = bld.add_constant(LuaValue::userdata(b));
    bld.emit(Instruction::new(OpCode::Eq, 1, k_a as i32, k_b as i32).with_const_flags(true, true));
    bld.emit(Instruction::new(OpCode::LoadBool, 0, 1, 1));
    bld.emit(Instruction::new(OpCode::LoadBool, 0, 0, 0));
    bld.emit(Instruction::new(OpCode::Return, 0, 2, 0));
    let proto = Rc::new(bld.build(&mut vm.pool));
    let entry = vm.pool.alloc_closure(Closure::lua(proto, Vec::new()));

    let result = call_value(&mut vm, LuaValue::closure(entry), Vec::new()).unwrap();
    assert_eq!(result.len(), 1);
    assert!(result[0].raw_equal(&LuaValue::boolean(true)), "distinct userdata with equal payloads must compare equal via __eq");
    assert!(!LuaValue::userdata(a).raw_equal(&LuaValue::userdata(b)), "raw identity must still differ");
}

fn eq_by_payload(l: &mut lucore::LuaState) -> lucore::LuaResult<usize> {
    let ua = l.arg(0).as_userdata_id().unwrap();
    let ub = l.arg(1).as_userdata_id().unwrap();
    let va = *l.vm.pool.get_userdata(ua).unwrap().downcast_ref::<i64>().unwrap();
    let vb = *l.vm.pool.get_userdata(ub).unwrap().downcast_ref::<i64>().unwrap();
    l.push(LuaValue::boolean(va == vb));
    Ok(1)
}

#[test]
fn coroutine_close_on_itself_returns_a_false_pair_instead_of_raising() {
    let mut vm = new_vm(VmOptions::default()).unwrap();
    let running_fn = global_field(&mut vm, "coroutine", "running");
    let close_fn = global_field(&mut vm, "coroutine", "close");

    // R1,R2 := coroutine.running(); R0,R1 := coroutine.close(R1); return R0,R1
    let mut b = ProtoBuilder::new("self_closer", 0, false, 3);
    let k_running = b.add_constant(running_fn);
    let k_close = b.add_constant(close_fn);
    b.emit(Instruction::new(OpCode::LoadK, 1, k_running as i32, 0));
    b.emit(Instruction::new(OpCode::Call, 1, 1, 3));
    b.emit(Instruction::new(OpCode::LoadK, 0, k_close as i32, 0));
    b.emit(Instruction::new(OpCode::Call, 0, 2, 3));
    b.emit(Instruction::new(OpCode::Return, 0, 3, 0));
    let proto = Rc::new(b.build(&mut vm.pool));
    let entry = vm.pool.alloc_closure(Closure::lua(proto, Vec::new()));

    let thread_id = vm.new_coroutine(entry);
    let result = vm.resume(thread_id, Vec::new()).unwrap();
    assert_eq!(result.len(), 2);
    assert!(result[0].raw_equal(&LuaValue::boolean(false)));
    let msg = vm.pool.get_string(result[1].as_string_id().unwrap()).unwrap();
    assert_eq!(msg, "cannot close a running coroutine");
}
