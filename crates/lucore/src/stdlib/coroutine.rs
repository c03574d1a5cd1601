//! `coroutine.*`. `yield` is special: the `CALL`/`TAILCALL` opcode handlers
//! recognize it by comparing the callee's function pointer against
//! [`crate::vm::LuaVM::yield_function`] and suspend the interpreter loop
//! in-place rather than invoking this module's `yield_` body — whoever wires
//! up a fresh [`crate::vm::LuaVM`] must set `vm.yield_function =
//! Some(yield_)` after installing this module, or a yield across the
//! boundary of a call made through [`crate::vm::call::call_value`] (instead
//! of the opcode loop) falls through to the body below, which always errors.

use crate::closure::{Closure, Upvalue};
use crate::gc::FunctionId;
use crate::lib_module;
use crate::lib_registry::LibraryModule;
use crate::thread::CoroutineStatus;
use crate::value::LuaValue;
use crate::vm::error::LuaResult;
use crate::vm::interp::close_to_be_closed;
use crate::vm::LuaState;

pub fn module() -> LibraryModule {
    lib_module!("coroutine", {
        "create" => create,
        "wrap" => wrap,
        "resume" => resume,
        "yield" => yield_,
        "status" => status,
        "running" => running,
        "isyieldable" => isyieldable,
        "close" => close,
    })
}

fn function_id_of(l: &mut LuaState, v: LuaValue) -> LuaResult<FunctionId> {
    if let Some(id) = v.as_closure_id() {
        return Ok(id);
    }
    if let Some(f) = v.as_native_function() {
        return Ok(l.vm.pool.alloc_closure(Closure::native(f)));
    }
    Err(l.vm.raise_string(format!("bad argument #1 (function expected, got {})", v.type_name())))
}

fn create(l: &mut LuaState) -> LuaResult<usize> {
    let entry = function_id_of(l, l.arg(0))?;
    let thread_id = l.vm.new_coroutine(entry);
    l.push(LuaValue::thread(thread_id));
    Ok(1)
}

/// Build a fresh coroutine and hand back a plain function that resumes it:
/// the wrapped thread lives as a closed-over upvalue on a native closure
/// (the only current user of [`Closure::native_with_upvalues`]), since a
/// bare `CFunction` pointer has nowhere else to stash per-instance state.
fn wrap(l: &mut LuaState) -> LuaResult<usize> {
    let entry = function_id_of(l, l.arg(0))?;
    let thread_id = l.vm.new_coroutine(entry);
    let thread_upvalue = l.vm.pool.alloc_upvalue(Upvalue::Closed(LuaValue::thread(thread_id)));
    let wrapped = l.vm.pool.alloc_closure(Closure::native_with_upvalues(wrap_call, vec![thread_upvalue]));
    l.push(LuaValue::closure(wrapped));
    Ok(1)
}

/// Unlike `coroutine.resume`, a wrapped call never returns a leading success
/// boolean: on error it re-raises in the caller's context instead.
fn wrap_call(l: &mut LuaState) -> LuaResult<usize> {
    let thread_id = l.upvalue(0).as_thread_id().expect("coroutine.wrap closure missing its thread upvalue");
    let args = l.args().to_vec();
    match l.vm.resume(thread_id, args) {
        Ok(values) => {
            let n = values.len();
            for v in values {
                l.push(v);
            }
            Ok(n)
        }
        Err(err) => Err(l.vm.raise_value(err.value)),
    }
}

fn resume(l: &mut LuaState) -> LuaResult<usize> {
    let thread_id = l
        .arg(0)
        .as_thread_id()
        .ok_or_else(|| l.vm.raise_string(format!("bad argument #1 (coroutine expected, got {})", l.arg(0).type_name())))?;
    let args = l.args()[1.min(l.arg_count())..].to_vec();
    match l.vm.resume(thread_id, args) {
        Ok(values) => {
            let n = values.len();
            l.push(LuaValue::boolean(true));
            for v in values {
                l.push(v);
            }
            Ok(1 + n)
        }
        Err(err) => {
            l.push(LuaValue::boolean(false));
            l.push(err.value);
            Ok(2)
        }
    }
}

fn yield_(l: &mut LuaState) -> LuaResult<usize> {
    Err(l.vm.raise_string("attempt to yield from outside a coroutine.resume-driven call"))
}

/// The function-pointer identity `vm.yield_function` must hold for the
/// `CALL`/`TAILCALL` opcodes to recognize a real `coroutine.yield` call.
pub fn yield_function() -> crate::vm::CFunction {
    yield_
}

fn status(l: &mut LuaState) -> LuaResult<usize> {
    let thread_id = l
        .arg(0)
        .as_thread_id()
        .ok_or_else(|| l.vm.raise_string(format!("bad argument #1 (coroutine expected, got {})", l.arg(0).type_name())))?;
    let status = l.vm.pool.get_thread(thread_id).map(|t| t.status).unwrap_or(CoroutineStatus::Dead);
    let name = match status {
        CoroutineStatus::Suspended => "suspended",
        CoroutineStatus::Running => {
            if thread_id == l.vm.current_thread { "running" } else { "normal" }
        }
        CoroutineStatus::Normal => "normal",
        CoroutineStatus::Dead => "dead",
    };
    let id = l.vm.pool.intern_string(name);
    l.push(LuaValue::string(id));
    Ok(1)
}

fn running(l: &mut LuaState) -> LuaResult<usize> {
    let current = l.vm.current_thread;
    let is_main = l.vm.main_thread == current;
    l.push(LuaValue::thread(current));
    l.push(LuaValue::boolean(is_main));
    Ok(2)
}

fn isyieldable(l: &mut LuaState) -> LuaResult<usize> {
    let thread_id = if l.arg_count() > 0 {
        l.arg(0)
            .as_thread_id()
            .ok_or_else(|| l.vm.raise_string("bad argument #1 (coroutine expected)"))?
    } else {
        l.vm.current_thread
    };
    let yieldable = l.vm.pool.get_thread(thread_id).is_some_and(|t| t.is_yieldable());
    l.push(LuaValue::boolean(yieldable));
    Ok(1)
}

fn close(l: &mut LuaState) -> LuaResult<usize> {
    let thread_id = l
        .arg(0)
        .as_thread_id()
        .ok_or_else(|| l.vm.raise_string(format!("bad argument #1 (coroutine expected, got {})", l.arg(0).type_name())))?;
    let status = l
        .vm
        .pool
        .get_thread(thread_id)
        .ok_or_else(|| l.vm.raise_string("coroutine no longer exists"))?
        .status;
    match status {
        CoroutineStatus::Suspended | CoroutineStatus::Dead => {
            let close_result = close_to_be_closed(l.vm, thread_id, 0, LuaValue::nil());
            let thread = l.vm.pool.get_thread_mut(thread_id).unwrap();
            thread.status = CoroutineStatus::Dead;
            thread.frames.clear();
            thread.stack.clear();
            match close_result {
                Ok(()) => {
                    l.push(LuaValue::boolean(true));
                    Ok(1)
                }
                Err(err) => {
                    let full = l.vm.into_full_error(err);
                    l.push(LuaValue::boolean(false));
                    l.push(full.value);
                    Ok(2)
                }
            }
        }
        CoroutineStatus::Running | CoroutineStatus::Normal => {
            l.push(LuaValue::boolean(false));
            let id = l.vm.pool.intern_string("cannot close a running coroutine");
            l.push(LuaValue::string(id));
            Ok(2)
        }
    }
}
