//! S4: an error raised mid-scope still runs pending `__close` handlers,
//! passing the raised value as `__close`'s second argument, before
//! `pcall`'s frame/stack snapshot gets restored.

use std::rc::Rc;
use std::sync::Mutex;

use lucore::builder::ProtoBuilder;
use lucore::vm::call::protected_call;
use lucore::vm::opcode::{Instruction, OpCode};
use lucore::{new_vm, Closure, LuaResult, LuaState, LuaTable, LuaValue, VmOptions};

static CLOSE_LOG: Mutex<Vec<(i64, Option<String>)>> = Mutex::new(Vec::new());

fn close_cb(l: &mut LuaState) -> LuaResult<usize> {
    let tbl = l.arg(0).as_table_id().expect("__close receives the tbc value as its first argument");
    let tag_key = LuaValue::string(l.vm.pool.intern_string("tag"));
    let tag = l.vm.pool.get_table(tbl).unwrap().get(&tag_key).as_integer().unwrap();
    let err = l.arg(1);
    let err_str = err.as_string_id().and_then(|id| l.vm.pool.get_string(id)).map(|s| s.to_string());
    CLOSE_LOG.lock().unwrap().push((tag, err_str));
    Ok(0)
}

fn raise_boom(l: &mut LuaState) -> LuaResult<usize> {
    Err(l.vm.raise_string("boom"))
}

#[test]
fn to_be_closed_local_closes_with_the_error_value_when_the_scope_unwinds() {
    CLOSE_LOG.lock().unwrap().clear();
    let mut vm = new_vm(VmOptions::default()).unwrap();

    let mt = vm.pool.alloc_table(LuaTable::new());
    let close_key = LuaValue::string(vm.metamethod_names().close);
    vm.pool.get_table_mut(mt).unwrap().set(close_key, LuaValue::native_function(close_cb));

    let tag_key = LuaValue::string(vm.pool.intern_string("tag"));
    let tbc_value = {
        let t = vm.pool.alloc_table(LuaTable::new());
        vm.pool.get_table_mut(t).unwrap().set(tag_key, LuaValue::integer(1));
        vm.pool.get_table_mut(t).unwrap().metatable = Some(mt);
        LuaValue::table(t)
    };

    // R0 := tbc_value; mark R0 tbc; R1 := raise_boom; call R1() (0 results wanted).
    let mut b = ProtoBuilder::new("scope", 0, false, 2);
    let k_tbc = b.add_constant(tbc_value);
    let k_raise = b.add_constant(LuaValue::native_function(raise_boom));
    b.emit(Instruction::new(OpCode::LoadK, 0, k_tbc as i32, 0));
    b.emit(Instruction::new(OpCode::Tbc, 0, 0, 0));
    b.emit(Instruction::new(OpCode::LoadK, 1, k_raise as i32, 0));
    b.emit(Instruction::new(OpCode::Call, 1, 1, 1));
    b.emit(Instruction::new(OpCode::Return, 0, 1, 0));
    let proto = Rc::new(b.build(&mut vm.pool));
    let entry = vm.pool.alloc_closure(Closure::lua(proto, Vec::new()));

    let saved_frames = vm.current_thread_ref().frames.len();
    let saved_stack = vm.current_thread_ref().stack.len();

    let (ok, results) = protected_call(&mut vm, LuaValue::closure(entry), Vec::new());
    assert!(!ok);
    assert_eq!(results.len(), 2);
    assert!(results[0].raw_equal(&LuaValue::boolean(false)));
    let propagated = vm.pool.get_string(results[1].as_string_id().unwrap()).unwrap();
    assert_eq!(propagated, "boom");

    assert_eq!(*CLOSE_LOG.lock().unwrap(), vec![(1, Some("boom".to_string()))]);

    // protected_call must leave the thread exactly as it found it.
    assert_eq!(vm.current_thread_ref().frames.len(), saved_frames);
    assert_eq!(vm.current_thread_ref().stack.len(), saved_stack);
}
