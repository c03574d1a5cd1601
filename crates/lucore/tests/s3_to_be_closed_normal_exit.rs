//! S3: `<close>` locals run `__close` in reverse declaration order when the
//! `CLOSE` opcode ends their scope normally (no error in flight).

use std::rc::Rc;
use std::sync::Mutex;

use lucore::builder::ProtoBuilder;
use lucore::vm::opcode::{Instruction, OpCode};
use lucore::{new_vm, run_chunk, Chunk, LuaResult, LuaState, LuaTable, LuaValue, VmOptions};

static CLOSE_LOG: Mutex<Vec<i64>> = Mutex::new(Vec::new());

fn close_cb(l: &mut LuaState) -> LuaResult<usize> {
    let tbl = l.arg(0).as_table_id().expect("__close receives the tbc value as its first argument");
    let tag_key = LuaValue::string(l.vm.pool.intern_string("tag"));
    let tag = l.vm.pool.get_table(tbl).unwrap().get(&tag_key).as_integer().unwrap();
    CLOSE_LOG.lock().unwrap().push(tag);
    Ok(0)
}

#[test]
fn to_be_closed_locals_close_in_lifo_order_on_normal_scope_exit() {
    CLOSE_LOG.lock().unwrap().clear();
    let mut vm = new_vm(VmOptions::default()).unwrap();

    let mt = vm.pool.alloc_table(LuaTable::new());
    let close_key = LuaValue::string(vm.metamethod_names().close);
    vm.pool.get_table_mut(mt).unwrap().set(close_key, LuaValue::native_function(close_cb));

    let tag_key = LuaValue::string(vm.pool.intern_string("tag"));
    let make_tbc_value = |vm: &mut lucore::LuaVM, tag: i64| {
        let t = vm.pool.alloc_table(LuaTable::new());
        vm.pool.get_table_mut(t).unwrap().set(tag_key, LuaValue::integer(tag));
        vm.pool.get_table_mut(t).unwrap().metatable = Some(mt);
        LuaValue::table(t)
    };
    let v1 = make_tbc_value(&mut vm, 1);
    let v2 = make_tbc_value(&mut vm, 2);

    // R0 := v1; mark R0 tbc; R1 := v2; mark R1 tbc; close from R0; return nothing.
    let mut b = ProtoBuilder::new("scope", 0, false, 2);
    let k1 = b.add_constant(v1);
    let k2 = b.add_constant(v2);
    b.emit(Instruction::new(OpCode::LoadK, 0, k1 as i32, 0));
    b.emit(Instruction::new(OpCode::Tbc, 0, 0, 0));
    b.emit(Instruction::new(OpCode::LoadK, 1, k2 as i32, 0));
    b.emit(Instruction::new(OpCode::Tbc, 1, 0, 0));
    b.emit(Instruction::new(OpCode::Close, 0, 0, 0));
    b.emit(Instruction::new(OpCode::Return, 0, 1, 0));
    let proto = Rc::new(b.build(&mut vm.pool));
    let chunk = Chunk { main: proto, name: "scope".to_string() };

    run_chunk(&mut vm, chunk).unwrap();

    assert_eq!(*CLOSE_LOG.lock().unwrap(), vec![2, 1]);
}
