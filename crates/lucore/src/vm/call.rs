//! Calling any Lua value: resolves closures directly and falls back to the
//! `__call` metamethod for anything else that declares one.

use crate::value::LuaValue;
use crate::vm::error::{LuaError, LuaFullError};
use crate::vm::interp::close_to_be_closed;
use crate::vm::metamethod;
use crate::vm::LuaVM;

/// Call `callee` with `args`, dispatching through `__call` if `callee` isn't
/// itself a function. This is what `pcall`, `coroutine.wrap`, and the
/// `CALL`/`TAILCALL` opcodes all funnel through.
pub fn call_value(vm: &mut LuaVM, callee: LuaValue, mut args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaFullError> {
    if let Some(id) = callee.as_closure_id() {
        return vm.call_function(id, &args);
    }
    if let Some(f) = callee.as_native_function() {
        let id = vm.pool.alloc_closure(crate::closure::Closure::native(f));
        return vm.call_function(id, &args);
    }
    let event = vm.metamethod_names().call;
    if let Some(handler) = metamethod::lookup(callee, event, &vm.pool, &vm.primitive_metatables) {
        args.insert(0, callee);
        return call_value(vm, handler, args);
    }
    Err(LuaFullError::new(
        LuaError::TypeError,
        LuaValue::nil(),
        format!("attempt to call a {} value", callee.type_name()),
    ))
}

/// `pcall`'s core: run `f(args)`, turning any raised error into `Ok` of a
/// tagged result instead of propagating it, so the caller's own call stack
/// is left intact on failure.
///
/// A failed call can leave extra frames and stack slots behind — nothing
/// along the error path pops them, mirroring how a raised error unwinds past
/// ordinary returns in the reference implementation too. This is the one
/// recovery point that must restore the pre-call depth before the caller's
/// own frame resumes executing.
pub fn protected_call(vm: &mut LuaVM, callee: LuaValue, args: Vec<LuaValue>) -> (bool, Vec<LuaValue>) {
    let thread_id = vm.current_thread;
    let (saved_frames, saved_stack) = {
        let thread = vm.current_thread_ref();
        (thread.frames.len(), thread.stack.len())
    };
    match call_value(vm, callee, args) {
        Ok(mut results) => {
            results.insert(0, LuaValue::boolean(true));
            (true, results)
        }
        Err(err) => {
            let close_result = close_to_be_closed(vm, thread_id, saved_stack, err.value);
            if let Some(thread) = vm.pool.get_thread_mut(thread_id) {
                thread.frames.truncate(saved_frames);
                thread.stack.truncate(saved_stack);
            }
            let propagated = match close_result {
                Ok(()) => err.value,
                Err(close_err) => vm.into_full_error(close_err).value,
            };
            (false, vec![LuaValue::boolean(false), propagated])
        }
    }
}
