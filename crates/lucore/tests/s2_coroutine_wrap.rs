//! S2: `coroutine.wrap` hands back a plain callable that drives its own
//! coroutine — no leading success boolean on the happy path, and a real
//! raise (not a `(false, err)` pair) once the wrapped thread is dead.

use std::rc::Rc;

use lucore::builder::ProtoBuilder;
use lucore::vm::call::call_value;
use lucore::vm::opcode::{Instruction, OpCode};
use lucore::{new_vm, Closure, LuaValue, LuaVM, VmOptions};

fn global_field(vm: &mut LuaVM, module: &str, field: &str) -> LuaValue {
    let table = vm.get_global(module).as_table_id().expect("module installed as a table");
    let key = LuaValue::string(vm.pool.intern_string(field));
    vm.pool.get_table(table).unwrap().get(&key)
}

#[test]
fn wrapped_coroutine_yields_directly_and_raises_once_dead() {
    let mut vm = new_vm(VmOptions::default()).unwrap();
    let yield_fn = global_field(&mut vm, "coroutine", "yield");
    let wrap_fn = global_field(&mut vm, "coroutine", "wrap");

    let mut b = ProtoBuilder::new("body", 0, false, 2);
    let k_fn = b.add_constant(yield_fn);
    let k_arg = b.add_constant(LuaValue::integer(7));
    b.emit(Instruction::new(OpCode::LoadK, 0, k_fn as i32, 0));
    b.emit(Instruction::new(OpCode::LoadK, 1, k_arg as i32, 0));
    b.emit(Instruction::new(OpCode::Call, 0, 2, 2));
    b.emit(Instruction::new(OpCode::Return, 0, 2, 0));
    let proto = Rc::new(b.build(&mut vm.pool));
    let entry = vm.pool.alloc_closure(Closure::lua(proto, Vec::new()));

    let wrapped = call_value(&mut vm, wrap_fn, vec![LuaValue::closure(entry)]).unwrap();
    assert_eq!(wrapped.len(), 1);
    let wrapped_fn = wrapped[0];
    assert!(wrapped_fn.is_function());

    let first = call_value(&mut vm, wrapped_fn, vec![LuaValue::nil()]).unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].raw_equal(&LuaValue::integer(7)));

    let second = call_value(&mut vm, wrapped_fn, vec![LuaValue::integer(123)]).unwrap();
    assert_eq!(second.len(), 1);
    assert!(second[0].raw_equal(&LuaValue::integer(123)));

    // The wrapped thread is dead now: calling it again must raise, not
    // return a `(false, err)` pair the way `coroutine.resume` would.
    let err = call_value(&mut vm, wrapped_fn, vec![]).unwrap_err();
    assert_eq!(err.kind, lucore::LuaError::RuntimeError);
}
