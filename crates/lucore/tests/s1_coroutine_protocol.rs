//! S1: a coroutine body that yields, suspends, and resumes across two
//! separate `resume` calls, driven by hand-assembled bytecode (no compiler
//! in this crate to turn source text into a body).

use std::rc::Rc;

use lucore::builder::ProtoBuilder;
use lucore::vm::opcode::{Instruction, OpCode};
use lucore::{new_vm, Closure, CoroutineStatus, LuaValue, LuaVM, VmOptions};

fn global_field(vm: &mut LuaVM, module: &str, field: &str) -> LuaValue {
    let table = vm.get_global(module).as_table_id().expect("module installed as a table");
    let key = LuaValue::string(vm.pool.intern_string(field));
    vm.pool.get_table(table).unwrap().get(&key)
}

#[test]
fn coroutine_yields_and_resumes_values_across_suspension() {
    let mut vm = new_vm(VmOptions::default()).unwrap();
    let yield_fn = global_field(&mut vm, "coroutine", "yield");

    // R0 := coroutine.yield; R1 := 10; R0 := R0(R1) [1 result]; return R0
    let mut b = ProtoBuilder::new("body", 0, false, 2);
    let k_fn = b.add_constant(yield_fn);
    let k_arg = b.add_constant(LuaValue::integer(10));
    b.emit(Instruction::new(OpCode::LoadK, 0, k_fn as i32, 0));
    b.emit(Instruction::new(OpCode::LoadK, 1, k_arg as i32, 0));
    b.emit(Instruction::new(OpCode::Call, 0, 2, 2));
    b.emit(Instruction::new(OpCode::Return, 0, 2, 0));
    let proto = Rc::new(b.build(&mut vm.pool));
    let entry = vm.pool.alloc_closure(Closure::lua(proto, Vec::new()));

    let thread_id = vm.new_coroutine(entry);
    assert_eq!(vm.pool.get_thread(thread_id).unwrap().status, CoroutineStatus::Suspended);

    let first = vm.resume(thread_id, Vec::new()).unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].raw_equal(&LuaValue::integer(10)));
    assert_eq!(vm.pool.get_thread(thread_id).unwrap().status, CoroutineStatus::Suspended);

    let second = vm.resume(thread_id, vec![LuaValue::integer(99)]).unwrap();
    assert_eq!(second.len(), 1);
    assert!(second[0].raw_equal(&LuaValue::integer(99)));
    assert_eq!(vm.pool.get_thread(thread_id).unwrap().status, CoroutineStatus::Dead);

    let err = vm.resume(thread_id, Vec::new()).unwrap_err();
    assert!(err.message.contains("dead"));
}
