//! Runtime core for a Lua 5.4 implementation: tagged values, an arena-based
//! incremental garbage collector, a register-windowed bytecode interpreter,
//! coroutines, metamethod dispatch, and a thin standard library.
//!
//! What this crate deliberately doesn't do: compile source to bytecode
//! (`builder` exists for hand-assembling a [`Prototype`] instead), parse
//! Lua's string-pattern dialect, or expose a CLI/REPL. Those sit upstream or
//! downstream of the runtime this crate implements.

pub mod builder;
pub mod closure;
pub mod frame;
pub mod gc;
pub mod lib_registry;
pub mod lua_value;
pub mod proto;
pub mod stdlib;
pub mod thread;
pub mod value;
pub mod vm;

pub use closure::{Closure, FunctionBody, Upvalue};
pub use lib_registry::{create_standard_registry, LibraryEntry, LibraryModule, LibraryRegistry};
pub use lua_value::{LuaString, LuaTable, LuaUserdata};
pub use proto::{Chunk, Prototype, UpvalueDesc};
pub use thread::{CoroutineStatus, LuaThread};
pub use value::LuaValue;
pub use vm::error::{LuaError, LuaFullError, LuaResult};
pub use vm::{CFunction, LuaState, LuaVM, VmOptions};

use std::rc::Rc;

/// Build a fresh VM with every standard library module installed and
/// `coroutine.yield` wired up so the interpreter loop can recognize it by
/// function-pointer identity.
pub fn new_vm(options: VmOptions) -> LuaResult<LuaVM> {
    let mut vm = LuaVM::new(options);
    let registry = create_standard_registry();
    registry.load_all(&mut vm)?;
    vm.yield_function = Some(stdlib::coroutine::yield_function());
    Ok(vm)
}

/// Load a hand-assembled chunk as the VM's main function and run it to
/// completion, the entry point an embedder without a Lua compiler uses.
pub fn run_chunk(vm: &mut LuaVM, chunk: Chunk) -> Result<Vec<LuaValue>, LuaFullError> {
    let main = vm.load_main(chunk.main);
    vm.call_function(main, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProtoBuilder;
    use crate::vm::opcode::{Instruction, OpCode};

    #[test]
    fn fresh_vm_has_globals_installed() {
        let mut vm = new_vm(VmOptions::default()).unwrap();
        let print = vm.get_global("print");
        assert!(print.is_native_function());
    }

    #[test]
    fn running_a_hand_built_return_chunk_yields_its_constant() {
        let mut vm = new_vm(VmOptions::default()).unwrap();
        let mut b = ProtoBuilder::new("t", 0, false, 2);
        let k = b.add_constant(LuaValue::integer(42));
        b.emit(Instruction::new(OpCode::LoadK, 0, k as i32, 0));
        b.emit(Instruction::new(OpCode::Return, 0, 2, 0));
        let proto = Rc::new(b.build(&mut vm.pool));
        let chunk = Chunk { main: proto, name: "t".to_string() };
        let results = run_chunk(&mut vm, chunk).unwrap();
        assert_eq!(results, vec![LuaValue::integer(42)]);
    }
}
