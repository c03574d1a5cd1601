//! The fetch-decode-execute loop. Runs on the VM's `current_thread` until
//! that thread's topmost "fresh" frame (the one `call_function` pushed)
//! returns, the thread runs out of frames entirely, or it yields.

use std::rc::Rc;

use crate::closure::{Closure, FunctionBody, Upvalue};
use crate::frame::{CallStatus, LuaCallFrame};
use crate::gc::ThreadId;
use crate::proto::{Prototype, UpvalueDesc};
use crate::value::LuaValue;
use crate::vm::call::call_value;
use crate::vm::error::LuaError;
use crate::vm::metamethod;
use crate::vm::opcode::OpCode;
use crate::vm::LuaVM;

pub enum RunOutcome {
    Returned(Vec<LuaValue>),
    Yielded,
}

type StepResult = Result<Option<RunOutcome>, LuaError>;

pub fn run(vm: &mut LuaVM) -> Result<RunOutcome, LuaError> {
    loop {
        let thread_id = vm.current_thread;
        match step(vm, thread_id)? {
            Some(outcome) => return Ok(outcome),
            None => continue,
        }
    }
}

fn get_reg(vm: &LuaVM, thread_id: ThreadId, base: usize, idx: u16) -> LuaValue {
    vm.pool.get_thread(thread_id).unwrap().stack[base + idx as usize]
}

fn set_reg(vm: &mut LuaVM, thread_id: ThreadId, base: usize, idx: u16, value: LuaValue) {
    vm.pool.get_thread_mut(thread_id).unwrap().stack[base + idx as usize] = value;
}

fn rk(vm: &LuaVM, thread_id: ThreadId, base: usize, proto: &Prototype, operand: i32, is_const: bool) -> LuaValue {
    if is_const {
        proto.constants[operand as usize]
    } else {
        get_reg(vm, thread_id, base, operand as u16)
    }
}

/// Execute exactly one instruction of the thread's topmost frame. Returns
/// `Ok(None)` to keep looping, `Ok(Some(outcome))` when the run should stop
/// (the entry frame returned, or the thread yielded).
fn step(vm: &mut LuaVM, thread_id: ThreadId) -> StepResult {
    let (proto, base, pc, is_entry_frame) = {
        let thread = vm.pool.get_thread(thread_id).unwrap();
        let frame = match thread.frames.last() {
            Some(f) => f,
            None => return Ok(Some(RunOutcome::Returned(Vec::new()))),
        };
        (frame.proto.clone(), frame.base, frame.pc, frame.status.contains(CallStatus::FRESH))
    };

    if pc >= proto.code.len() {
        return finish_return(vm, thread_id, Vec::new(), is_entry_frame);
    }

    let instr = proto.code[pc];
    let mut next_pc = pc + 1;

    macro_rules! arith {
        ($op:tt, $event:ident, $name:expr) => {{
            let b = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const);
            let c = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
            match (b.is_integer(), c.is_integer(), b.as_integer(), c.as_integer(), b.as_float(), c.as_float()) {
                (true, true, Some(x), Some(y), _, _) => {
                    set_reg(vm, thread_id, base, instr.a, LuaValue::integer(x $op y));
                }
                (_, _, _, _, Some(x), Some(y)) => {
                    set_reg(vm, thread_id, base, instr.a, LuaValue::float(x $op y));
                }
                _ => {
                    let event = vm.metamethod_names().$event;
                    let result = dispatch_binary_metamethod(vm, b, c, event, $name)?;
                    set_reg(vm, thread_id, base, instr.a, result);
                }
            }
        }};
    }

    // Bitwise ops: Lua 5.4 requires both operands to have an exact integer
    // representation (an integer, or a float with no fractional part); no
    // float fallback, only the metamethod path for anything else.
    macro_rules! bitwise {
        ($op:tt, $event:ident, $name:expr) => {{
            let b = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const);
            let c = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
            match (b.as_integer(), c.as_integer()) {
                (Some(x), Some(y)) => {
                    set_reg(vm, thread_id, base, instr.a, LuaValue::integer(x $op y));
                }
                _ => {
                    let event = vm.metamethod_names().$event;
                    let result = dispatch_binary_metamethod(vm, b, c, event, $name)?;
                    set_reg(vm, thread_id, base, instr.a, result);
                }
            }
        }};
    }

    match instr.op {
        OpCode::Move => {
            let v = get_reg(vm, thread_id, base, instr.b as u16);
            set_reg(vm, thread_id, base, instr.a, v);
        }
        OpCode::LoadK => {
            let v = proto.constants[instr.b as usize];
            set_reg(vm, thread_id, base, instr.a, v);
        }
        OpCode::LoadBool => {
            set_reg(vm, thread_id, base, instr.a, LuaValue::boolean(instr.b != 0));
            if instr.c != 0 {
                next_pc += 1;
            }
        }
        OpCode::LoadNil => {
            for i in 0..=instr.b as u16 {
                set_reg(vm, thread_id, base, instr.a + i, LuaValue::nil());
            }
        }
        OpCode::GetUpval => {
            let upval_id = current_closure(vm, thread_id).upvalues[instr.b as usize];
            let v = resolve_upvalue(vm, thread_id, upval_id);
            set_reg(vm, thread_id, base, instr.a, v);
        }
        OpCode::SetUpval => {
            let upval_id = current_closure(vm, thread_id).upvalues[instr.b as usize];
            let v = get_reg(vm, thread_id, base, instr.a);
            assign_upvalue(vm, thread_id, upval_id, v);
        }
        OpCode::GetTable => {
            let t = get_reg(vm, thread_id, base, instr.b as u16);
            let k = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
            let v = index_get(vm, t, k)?;
            set_reg(vm, thread_id, base, instr.a, v);
        }
        OpCode::SetTable => {
            let t = get_reg(vm, thread_id, base, instr.a);
            let k = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const);
            let v = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
            index_set(vm, t, k, v)?;
        }
        OpCode::NewTable => {
            let id = vm.pool.alloc_table(crate::lua_value::LuaTable::with_capacity(
                instr.b.max(0) as usize,
                instr.c.max(0) as usize,
            ));
            set_reg(vm, thread_id, base, instr.a, LuaValue::table(id));
        }
        OpCode::Self_ => {
            let obj = get_reg(vm, thread_id, base, instr.b as u16);
            let k = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
            let method = index_get(vm, obj, k)?;
            set_reg(vm, thread_id, base, instr.a + 1, obj);
            set_reg(vm, thread_id, base, instr.a, method);
        }
        OpCode::Add => arith!(+, add, "add"),
        OpCode::Sub => arith!(-, sub, "sub"),
        OpCode::Mul => arith!(*, mul, "mul"),
        OpCode::Mod => arith!(%, mod_, "mod"),
        OpCode::BAnd => bitwise!(&, band, "band"),
        OpCode::BOr => bitwise!(|, bor, "bor"),
        OpCode::BXor => bitwise!(^, bxor, "bxor"),
        OpCode::Shl => {
            let b = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const);
            let c = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
            match (b.as_integer(), c.as_integer()) {
                (Some(x), Some(y)) => set_reg(vm, thread_id, base, instr.a, LuaValue::integer(shift_left(x, y))),
                _ => {
                    let event = vm.metamethod_names().shl;
                    let result = dispatch_binary_metamethod(vm, b, c, event, "shl")?;
                    set_reg(vm, thread_id, base, instr.a, result);
                }
            }
        }
        OpCode::Shr => {
            let b = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const);
            let c = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
            match (b.as_integer(), c.as_integer()) {
                (Some(x), Some(y)) => set_reg(vm, thread_id, base, instr.a, LuaValue::integer(shift_left(x, -y))),
                _ => {
                    let event = vm.metamethod_names().shr;
                    let result = dispatch_binary_metamethod(vm, b, c, event, "shr")?;
                    set_reg(vm, thread_id, base, instr.a, result);
                }
            }
        }
        OpCode::Div => {
            let b = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const).as_float();
            let c = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const).as_float();
            match (b, c) {
                (Some(x), Some(y)) => set_reg(vm, thread_id, base, instr.a, LuaValue::float(x / y)),
                _ => {
                    let bv = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const);
                    let cv = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
                    let event = vm.metamethod_names().div;
                    let result = dispatch_binary_metamethod(vm, bv, cv, event, "div")?;
                    set_reg(vm, thread_id, base, instr.a, result);
                }
            }
        }
        OpCode::IDiv => {
            let bv = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const);
            let cv = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
            match (bv.as_integer(), cv.as_integer(), bv.is_integer() && cv.is_integer()) {
                (Some(x), Some(y), true) => set_reg(vm, thread_id, base, instr.a, LuaValue::integer(x.div_euclid(y))),
                _ => match (bv.as_float(), cv.as_float()) {
                    (Some(x), Some(y)) => set_reg(vm, thread_id, base, instr.a, LuaValue::float((x / y).floor())),
                    _ => {
                        let event = vm.metamethod_names().idiv;
                        let result = dispatch_binary_metamethod(vm, bv, cv, event, "idiv")?;
                        set_reg(vm, thread_id, base, instr.a, result);
                    }
                },
            }
        }
        OpCode::Pow => {
            let b = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const).as_float();
            let c = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const).as_float();
            match (b, c) {
                (Some(x), Some(y)) => set_reg(vm, thread_id, base, instr.a, LuaValue::float(x.powf(y))),
                _ => {
                    let bv = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const);
                    let cv = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
                    let event = vm.metamethod_names().pow;
                    let result = dispatch_binary_metamethod(vm, bv, cv, event, "pow")?;
                    set_reg(vm, thread_id, base, instr.a, result);
                }
            }
        }
        OpCode::Unm => {
            let b = get_reg(vm, thread_id, base, instr.b as u16);
            if let Some(i) = b.as_integer().filter(|_| b.is_integer()) {
                set_reg(vm, thread_id, base, instr.a, LuaValue::integer(i.wrapping_neg()));
            } else if let Some(f) = b.as_float() {
                set_reg(vm, thread_id, base, instr.a, LuaValue::float(-f));
            } else {
                let event = vm.metamethod_names().unm;
                let result = dispatch_binary_metamethod(vm, b, b, event, "unm")?;
                set_reg(vm, thread_id, base, instr.a, result);
            }
        }
        OpCode::BNot => {
            let b = get_reg(vm, thread_id, base, instr.b as u16);
            if let Some(i) = b.as_integer() {
                set_reg(vm, thread_id, base, instr.a, LuaValue::integer(!i));
            } else {
                let event = vm.metamethod_names().bnot;
                let result = dispatch_binary_metamethod(vm, b, b, event, "bnot")?;
                set_reg(vm, thread_id, base, instr.a, result);
            }
        }
        OpCode::Not => {
            let b = get_reg(vm, thread_id, base, instr.b as u16);
            set_reg(vm, thread_id, base, instr.a, LuaValue::boolean(!b.is_truthy()));
        }
        OpCode::Len => {
            let b = get_reg(vm, thread_id, base, instr.b as u16);
            let v = length_of(vm, b)?;
            set_reg(vm, thread_id, base, instr.a, v);
        }
        OpCode::Concat => {
            let mut acc = String::new();
            for i in instr.b as u16..=instr.c as u16 {
                let v = get_reg(vm, thread_id, base, i);
                acc.push_str(&tostring(vm, v)?);
            }
            let id = vm.pool.intern_string(&acc);
            set_reg(vm, thread_id, base, instr.a, LuaValue::string(id));
        }
        OpCode::Jmp => {
            next_pc = (pc as i64 + instr.b as i64 + 1) as usize;
        }
        OpCode::Eq => {
            let b = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const);
            let c = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
            let equal = values_equal(vm, b, c)?;
            if equal != (instr.a != 0) {
                next_pc += 1;
            }
        }
        OpCode::Lt | OpCode::Le => {
            let b = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const);
            let c = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
            let result = compare(vm, b, c, instr.op == OpCode::Le)?;
            if result != (instr.a != 0) {
                next_pc += 1;
            }
        }
        OpCode::Test => {
            let v = get_reg(vm, thread_id, base, instr.a);
            if v.is_truthy() != (instr.c != 0) {
                next_pc += 1;
            }
        }
        OpCode::TestSet => {
            let v = get_reg(vm, thread_id, base, instr.b as u16);
            if v.is_truthy() == (instr.c != 0) {
                set_reg(vm, thread_id, base, instr.a, v);
            } else {
                next_pc += 1;
            }
        }
        OpCode::NotEq => {
            let b = rk(vm, thread_id, base, &proto, instr.b, instr.b_is_const);
            let c = rk(vm, thread_id, base, &proto, instr.c, instr.c_is_const);
            let equal = values_equal(vm, b, c)?;
            if equal == (instr.a != 0) {
                next_pc += 1;
            }
        }
        OpCode::Closure => {
            let nested = proto.nested[instr.b as usize].clone();
            let id = instantiate_closure(vm, thread_id, base, nested);
            set_reg(vm, thread_id, base, instr.a, LuaValue::closure(id));
        }
        OpCode::Vararg => {
            // Varargs live just below `base`, `num_extra_args` of them.
            let (extra, varbase) = {
                let frame = vm.pool.get_thread(thread_id).unwrap().frames.last().unwrap();
                (frame.num_extra_args, frame.base - frame.num_extra_args)
            };
            let want = if instr.b == 0 { extra } else { (instr.b - 1) as usize };
            for i in 0..want {
                let v = if i < extra { vm.pool.get_thread(thread_id).unwrap().stack[varbase + i] } else { LuaValue::nil() };
                set_reg(vm, thread_id, base, instr.a + i as u16, v);
            }
        }
        OpCode::Tbc => {
            let idx = base + instr.a as usize;
            let value = get_reg(vm, thread_id, base, instr.a);
            if !value.is_nil() && value.as_boolean() != Some(false) {
                let event = vm.metamethod_names().close;
                if metamethod::lookup(value, event, &vm.pool, &vm.primitive_metatables).is_none() {
                    return Err(vm.raise_string(format!("variable has a non-closable value ({})", value.type_name())));
                }
            }
            vm.pool.get_thread_mut(thread_id).unwrap().to_be_closed.push(idx);
        }
        OpCode::Close => {
            let idx = base + instr.a as usize;
            close_upvalues_from(vm, thread_id, idx);
            close_to_be_closed(vm, thread_id, idx, LuaValue::nil())?;
        }
        OpCode::ForPrep => {
            let start = get_reg(vm, thread_id, base, instr.a).as_float().unwrap_or(0.0);
            let limit = get_reg(vm, thread_id, base, instr.a + 1).as_float().unwrap_or(0.0);
            let step = get_reg(vm, thread_id, base, instr.a + 2).as_float().unwrap_or(1.0);
            set_reg(vm, thread_id, base, instr.a, LuaValue::float(start - step));
            let _ = limit;
            next_pc = (pc as i64 + instr.b as i64 + 1) as usize;
        }
        OpCode::ForLoop => {
            let step = get_reg(vm, thread_id, base, instr.a + 2).as_float().unwrap();
            let cur = get_reg(vm, thread_id, base, instr.a).as_float().unwrap() + step;
            let limit = get_reg(vm, thread_id, base, instr.a + 1).as_float().unwrap();
            let continues = if step >= 0.0 { cur <= limit } else { cur >= limit };
            if continues {
                set_reg(vm, thread_id, base, instr.a, LuaValue::float(cur));
                set_reg(vm, thread_id, base, instr.a + 3, LuaValue::float(cur));
                next_pc = (pc as i64 + instr.b as i64 + 1) as usize;
            }
        }
        OpCode::TForCall => {
            let f = get_reg(vm, thread_id, base, instr.a);
            let state = get_reg(vm, thread_id, base, instr.a + 1);
            let ctrl = get_reg(vm, thread_id, base, instr.a + 2);
            let results = call_value(vm, f, vec![state, ctrl]).map_err(|e| {
                vm.raise_value(e.value)
            })?;
            for i in 0..instr.c as u16 {
                let v = results.get(i as usize).copied().unwrap_or(LuaValue::nil());
                set_reg(vm, thread_id, base, instr.a + 3 + i, v);
            }
        }
        OpCode::TForLoop => {
            let first = get_reg(vm, thread_id, base, instr.a + 2);
            if !first.is_nil() {
                set_reg(vm, thread_id, base, instr.a + 1, first);
                next_pc = (pc as i64 + instr.b as i64 + 1) as usize;
            }
        }
        OpCode::SetList => {
            let table_id = get_reg(vm, thread_id, base, instr.a).as_table_id().unwrap();
            let count = if instr.b == 0 {
                vm.pool.get_thread(thread_id).unwrap().stack.len() - (base + instr.a as usize + 1)
            } else {
                instr.b as usize
            };
            for i in 1..=count {
                let v = get_reg(vm, thread_id, base, instr.a + i as u16);
                let key = LuaValue::integer(instr.c as i64 + i as i64);
                vm.pool.get_table_mut(table_id).unwrap().set(key, v);
            }
        }
        OpCode::Call | OpCode::TailCall => {
            let nargs = if instr.b == 0 {
                vm.pool.get_thread(thread_id).unwrap().stack.len() - (base + instr.a as usize + 1)
            } else {
                (instr.b - 1) as usize
            };
            let callee = get_reg(vm, thread_id, base, instr.a);
            let mut args = Vec::with_capacity(nargs);
            for i in 0..nargs {
                args.push(get_reg(vm, thread_id, base, instr.a + 1 + i as u16));
            }

            let num_wanted = if instr.c == 0 { None } else { Some((instr.c - 1) as usize) };

            if vm.yield_function.is_some() && callee.as_native_function() == vm.yield_function {
                if !vm.current_thread_ref().is_yieldable() {
                    return Err(vm.raise_string("attempt to yield from outside a coroutine"));
                }
                {
                    let thread = vm.pool.get_thread_mut(thread_id).unwrap();
                    thread.pending_yield = args;
                    thread.yield_result_base = Some((base + instr.a as usize, num_wanted));
                    thread.frames.last_mut().unwrap().pc = next_pc;
                }
                return Ok(Some(RunOutcome::Yielded));
            }

            if instr.op == OpCode::TailCall {
                let (was_fresh, result_base, old_base) = {
                    let frame = vm.pool.get_thread_mut(thread_id).unwrap().frames.pop().unwrap();
                    (frame.status.contains(CallStatus::FRESH), frame.result_base, frame.base)
                };
                // Reuse the outgoing frame's register window: close whatever it
                // left open, then drop the stack back to its base so the callee
                // we're tail-calling into starts exactly where it did.
                close_upvalues_from(vm, thread_id, old_base);
                close_to_be_closed(vm, thread_id, old_base, LuaValue::nil())?;
                vm.pool.get_thread_mut(thread_id).unwrap().stack.truncate(old_base);
                return call_and_continue(vm, thread_id, callee, args, was_fresh, result_base, None, true);
            }

            vm.pool.get_thread_mut(thread_id).unwrap().frames.last_mut().unwrap().pc = next_pc;
            let result_base = base + instr.a as usize;
            return call_and_continue(vm, thread_id, callee, args, false, result_base, num_wanted, false);
        }
        OpCode::Return => {
            let count = if instr.b == 0 {
                vm.pool.get_thread(thread_id).unwrap().stack.len() - (base + instr.a as usize)
            } else {
                (instr.b - 1) as usize
            };
            let mut results = Vec::with_capacity(count);
            for i in 0..count {
                results.push(get_reg(vm, thread_id, base, instr.a + i as u16));
            }
            return finish_return(vm, thread_id, results, is_entry_frame);
        }
    }

    vm.pool.get_thread_mut(thread_id).unwrap().frames.last_mut().unwrap().pc = next_pc;
    Ok(None)
}

/// Either invoke `callee` (native, or push a Lua frame and keep looping) and
/// route its results to `result_base`, or — if this was the last frame in a
/// fresh entry — hand them back to the Rust caller.
#[allow(clippy::too_many_arguments)]
fn call_and_continue(
    vm: &mut LuaVM,
    thread_id: ThreadId,
    callee: LuaValue,
    args: Vec<LuaValue>,
    was_fresh: bool,
    result_base: usize,
    num_wanted: Option<usize>,
    is_tail: bool,
) -> StepResult {
    if let Some(closure_id) = callee.as_closure_id() {
        let closure = vm.pool.get_closure(closure_id).expect("dangling closure id");
        if let FunctionBody::Lua(proto) = &closure.body {
            let proto = proto.clone();
            push_lua_frame(vm, thread_id, closure_id, proto, &args, result_base, num_wanted, was_fresh, is_tail);
            return Ok(None);
        }
    }
    match call_value(vm, callee, args) {
        Ok(results) => {
            if vm.pool.get_thread(thread_id).unwrap().frames.is_empty() {
                return Ok(Some(RunOutcome::Returned(results)));
            }
            store_results(vm, thread_id, result_base, &results, num_wanted);
            Ok(None)
        }
        Err(full) => Err(vm.raise_value(full.value)),
    }
}

#[allow(clippy::too_many_arguments)]
fn push_lua_frame(
    vm: &mut LuaVM,
    thread_id: ThreadId,
    function: crate::gc::FunctionId,
    proto: Rc<Prototype>,
    args: &[LuaValue],
    result_base: usize,
    num_wanted: Option<usize>,
    was_fresh: bool,
    is_tail: bool,
) {
    let thread = vm.pool.get_thread_mut(thread_id).unwrap();
    let base = thread.stack.len();
    let num_extra_args = args.len().saturating_sub(proto.num_params as usize);
    thread.stack.extend_from_slice(args);
    thread.stack.resize(base + proto.max_stack_size as usize + num_extra_args, LuaValue::nil());
    let reg_base = base + num_extra_args;
    for i in 0..proto.num_params as usize {
        let v = args.get(num_extra_args + i).copied().unwrap_or(LuaValue::nil());
        thread.stack[reg_base + i] = v;
    }

    let mut frame = LuaCallFrame::new(function, proto, reg_base);
    frame.num_extra_args = num_extra_args;
    frame.num_results_wanted = num_wanted;
    frame.result_base = result_base;
    if was_fresh {
        frame.status.insert(CallStatus::FRESH);
    }
    if is_tail {
        frame.status.insert(CallStatus::TAIL);
    }
    thread.frames.push(frame);
}

pub fn store_results(vm: &mut LuaVM, thread_id: ThreadId, result_base: usize, results: &[LuaValue], num_wanted: Option<usize>) {
    let want = num_wanted.unwrap_or(results.len());
    let thread = vm.pool.get_thread_mut(thread_id).unwrap();
    if result_base + want > thread.stack.len() {
        thread.stack.resize(result_base + want, LuaValue::nil());
    }
    for i in 0..want {
        thread.stack[result_base + i] = results.get(i).copied().unwrap_or(LuaValue::nil());
    }
}

fn finish_return(vm: &mut LuaVM, thread_id: ThreadId, results: Vec<LuaValue>, is_entry_frame: bool) -> StepResult {
    let (frame_base, result_base, num_wanted) = {
        let frame = vm.pool.get_thread_mut(thread_id).unwrap().frames.pop().unwrap();
        (frame.base, frame.result_base, frame.num_results_wanted)
    };
    close_upvalues_from(vm, thread_id, frame_base);
    close_to_be_closed(vm, thread_id, frame_base, LuaValue::nil())?;
    vm.pool.get_thread_mut(thread_id).unwrap().stack.truncate(frame_base);

    if is_entry_frame || vm.pool.get_thread(thread_id).unwrap().frames.is_empty() {
        return Ok(Some(RunOutcome::Returned(results)));
    }
    store_results(vm, thread_id, result_base, &results, num_wanted);
    Ok(None)
}

fn current_closure<'a>(vm: &'a LuaVM, thread_id: ThreadId) -> &'a Closure {
    let function = vm.pool.get_thread(thread_id).unwrap().frames.last().unwrap().function;
    vm.pool.get_closure(function).unwrap()
}

fn resolve_upvalue(vm: &LuaVM, thread_id: ThreadId, id: crate::gc::UpvalueId) -> LuaValue {
    match vm.pool.get_upvalue(id).unwrap() {
        Upvalue::Open { stack_index } => vm.pool.get_thread(thread_id).unwrap().stack[*stack_index],
        Upvalue::Closed(v) => *v,
    }
}

fn assign_upvalue(vm: &mut LuaVM, thread_id: ThreadId, id: crate::gc::UpvalueId, value: LuaValue) {
    let open_index = match vm.pool.get_upvalue(id).unwrap() {
        Upvalue::Open { stack_index } => Some(*stack_index),
        Upvalue::Closed(_) => None,
    };
    match open_index {
        Some(idx) => vm.pool.get_thread_mut(thread_id).unwrap().stack[idx] = value,
        None => *vm.pool.get_upvalue_mut(id).unwrap() = Upvalue::Closed(value),
    }
}

/// Find (or create) the open upvalue for an absolute stack slot, so that two
/// closures capturing the same local share one `UpvalueId` and see each
/// other's writes until it's closed.
fn instantiate_closure(vm: &mut LuaVM, thread_id: ThreadId, base: usize, proto: Rc<Prototype>) -> crate::gc::FunctionId {
    let mut upvalues = Vec::with_capacity(proto.upvalues.len());
    for desc in &proto.upvalues {
        let id = match desc {
            UpvalueDesc::ParentLocal(reg) => {
                let stack_index = base + *reg as usize;
                find_or_open_upvalue(vm, stack_index)
            }
            UpvalueDesc::ParentUpvalue(idx) => current_closure(vm, thread_id).upvalues[*idx as usize],
        };
        upvalues.push(id);
    }
    vm.pool.alloc_closure(Closure::lua(proto, upvalues))
}

fn find_or_open_upvalue(vm: &mut LuaVM, stack_index: usize) -> crate::gc::UpvalueId {
    // Linear scan is fine: open upvalues per thread number in the dozens at most.
    for (id, up) in vm.pool.upvalues.iter() {
        if let Upvalue::Open { stack_index: si } = &up.data {
            if *si == stack_index {
                return crate::gc::UpvalueId(id);
            }
        }
    }
    vm.pool.alloc_upvalue(Upvalue::Open { stack_index })
}

fn close_upvalues_from(vm: &mut LuaVM, thread_id: ThreadId, from_index: usize) {
    let thread = vm.pool.get_thread(thread_id).unwrap();
    let values: Vec<(u32, LuaValue)> = vm
        .pool
        .upvalues
        .iter()
        .filter_map(|(id, up)| match &up.data {
            Upvalue::Open { stack_index } if *stack_index >= from_index => {
                Some((id, thread.stack[*stack_index]))
            }
            _ => None,
        })
        .collect();
    drop(thread);
    for (id, value) in values {
        vm.pool.upvalues.get_mut(id).unwrap().data.close(value);
    }
}

/// Run `__close` on every to-be-closed slot at or above `from_index`, most
/// recently marked first (Lua 5.4 closes in reverse declaration order). `err`
/// is the error value to pass as `__close`'s second argument, or `nil` on a
/// normal scope exit.
pub fn close_to_be_closed(vm: &mut LuaVM, thread_id: ThreadId, from_index: usize, err: LuaValue) -> Result<(), LuaError> {
    loop {
        let idx = {
            let thread = vm.pool.get_thread_mut(thread_id).unwrap();
            match thread.to_be_closed.last() {
                Some(&idx) if idx >= from_index => {
                    thread.to_be_closed.pop();
                    idx
                }
                _ => break,
            }
        };
        let value = vm.pool.get_thread(thread_id).unwrap().stack[idx];
        if value.is_nil() || value.as_boolean() == Some(false) {
            continue;
        }
        let event = vm.metamethod_names().close;
        if let Some(handler) = metamethod::lookup(value, event, &vm.pool, &vm.primitive_metatables) {
            call_value(vm, handler, vec![value, err]).map_err(|e| vm.raise_value(e.value))?;
        }
    }
    Ok(())
}

fn index_get(vm: &mut LuaVM, table: LuaValue, key: LuaValue) -> Result<LuaValue, LuaError> {
    if let Some(id) = table.as_table_id() {
        let raw = vm.pool.get_table(id).unwrap().get(&key);
        if !raw.is_nil() {
            return Ok(raw);
        }
        let event = vm.metamethod_names().index;
        if let Some(handler) = metamethod::lookup(table, event, &vm.pool, &vm.primitive_metatables) {
            if handler.is_function() {
                let results = call_value(vm, handler, vec![table, key]).map_err(|e| vm.raise_value(e.value))?;
                return Ok(results.first().copied().unwrap_or(LuaValue::nil()));
            }
            return index_get(vm, handler, key);
        }
        return Ok(LuaValue::nil());
    }
    let event = vm.metamethod_names().index;
    if let Some(handler) = metamethod::lookup(table, event, &vm.pool, &vm.primitive_metatables) {
        if handler.is_function() {
            let results = call_value(vm, handler, vec![table, key]).map_err(|e| vm.raise_value(e.value))?;
            return Ok(results.first().copied().unwrap_or(LuaValue::nil()));
        }
        return index_get(vm, handler, key);
    }
    Err(vm.raise_string(format!("attempt to index a {} value", table.type_name())))
}

fn index_set(vm: &mut LuaVM, table: LuaValue, key: LuaValue, value: LuaValue) -> Result<(), LuaError> {
    if let Some(id) = table.as_table_id() {
        let has_raw = !vm.pool.get_table(id).unwrap().get(&key).is_nil();
        if has_raw {
            vm.pool.get_table_mut(id).unwrap().set(key, value);
            return Ok(());
        }
        let event = vm.metamethod_names().newindex;
        if let Some(handler) = metamethod::lookup(table, event, &vm.pool, &vm.primitive_metatables) {
            if handler.is_function() {
                call_value(vm, handler, vec![table, key, value]).map_err(|e| vm.raise_value(e.value))?;
                return Ok(());
            }
            return index_set(vm, handler, key, value);
        }
        vm.pool.get_table_mut(id).unwrap().set(key, value);
        return Ok(());
    }
    Err(vm.raise_string(format!("attempt to index a {} value", table.type_name())))
}

fn length_of(vm: &mut LuaVM, v: LuaValue) -> Result<LuaValue, LuaError> {
    if let Some(id) = v.as_string_id() {
        let len = vm.pool.get_string(id).map(|s| s.len()).unwrap_or(0);
        return Ok(LuaValue::integer(len as i64));
    }
    if let Some(id) = v.as_table_id() {
        let event = vm.metamethod_names().len;
        if let Some(handler) = metamethod::lookup(v, event, &vm.pool, &vm.primitive_metatables) {
            let results = call_value(vm, handler, vec![v]).map_err(|e| vm.raise_value(e.value))?;
            return Ok(results.first().copied().unwrap_or(LuaValue::nil()));
        }
        return Ok(LuaValue::integer(vm.pool.get_table(id).unwrap().length()));
    }
    Err(vm.raise_string(format!("attempt to get length of a {} value", v.type_name())))
}

/// `tostring`'s core: strings pass through, numbers format plainly, anything
/// else must declare `__tostring`. Shared by the `CONCAT` opcode and the
/// `tostring`/`print` library functions.
pub fn tostring(vm: &mut LuaVM, v: LuaValue) -> Result<String, LuaError> {
    if let Some(id) = v.as_string_id() {
        return Ok(vm.pool.get_string(id).unwrap().to_string());
    }
    if v.is_number() {
        return Ok(format!("{v:?}"));
    }
    let event = vm.metamethod_names().tostring;
    if let Some(handler) = metamethod::lookup(v, event, &vm.pool, &vm.primitive_metatables) {
        let results = call_value(vm, handler, vec![v]).map_err(|e| vm.raise_value(e.value))?;
        if let Some(id) = results.first().and_then(|r| r.as_string_id()) {
            return Ok(vm.pool.get_string(id).unwrap().to_string());
        }
    }
    Err(vm.raise_string(format!("attempt to concatenate a {} value", v.type_name())))
}

fn values_equal(vm: &mut LuaVM, a: LuaValue, b: LuaValue) -> Result<bool, LuaError> {
    if a.raw_equal(&b) {
        return Ok(true);
    }
    if a.type_tag() == b.type_tag() && (a.is_table() || a.is_userdata()) {
        let event = vm.metamethod_names().eq;
        if let Some(handler) = metamethod::lookup(a, event, &vm.pool, &vm.primitive_metatables)
            .or_else(|| metamethod::lookup(b, event, &vm.pool, &vm.primitive_metatables))
        {
            let results = call_value(vm, handler, vec![a, b]).map_err(|e| vm.raise_value(e.value))?;
            return Ok(results.first().is_some_and(|r| r.is_truthy()));
        }
    }
    Ok(false)
}

fn compare(vm: &mut LuaVM, a: LuaValue, b: LuaValue, or_equal: bool) -> Result<bool, LuaError> {
    if let (Some(x), Some(y)) = (a.as_float(), b.as_float()) {
        return Ok(if or_equal { x <= y } else { x < y });
    }
    if let (Some(sa), Some(sb)) = (a.as_string_id(), b.as_string_id()) {
        let (sa, sb) = (vm.pool.get_string(sa).unwrap().to_string(), vm.pool.get_string(sb).unwrap().to_string());
        return Ok(if or_equal { sa <= sb } else { sa < sb });
    }
    let event = if or_equal { vm.metamethod_names().le } else { vm.metamethod_names().lt };
    if let Some(handler) = metamethod::lookup(a, event, &vm.pool, &vm.primitive_metatables)
        .or_else(|| metamethod::lookup(b, event, &vm.pool, &vm.primitive_metatables))
    {
        let results = call_value(vm, handler, vec![a, b]).map_err(|e| vm.raise_value(e.value))?;
        return Ok(results.first().is_some_and(|r| r.is_truthy()));
    }
    Err(vm.raise_string(format!("attempt to compare {} with {}", a.type_name(), b.type_name())))
}

/// Lua's `<<`: shifting left by a negative amount shifts right instead, and
/// any shift of 64 or more bits (either direction) yields zero rather than
/// wrapping, since the operand is treated as an unsigned 64-bit quantity.
fn shift_left(x: i64, shift: i64) -> i64 {
    if shift <= -64 || shift >= 64 {
        0
    } else if shift >= 0 {
        ((x as u64) << shift) as i64
    } else {
        ((x as u64) >> -shift) as i64
    }
}

fn dispatch_binary_metamethod(
    vm: &mut LuaVM,
    a: LuaValue,
    b: LuaValue,
    event: crate::gc::StringId,
    op_name: &str,
) -> Result<LuaValue, LuaError> {
    if let Some(handler) =
        metamethod::lookup(a, event, &vm.pool, &vm.primitive_metatables).or_else(|| metamethod::lookup(b, event, &vm.pool, &vm.primitive_metatables))
    {
        let results = call_value(vm, handler, vec![a, b]).map_err(|e| vm.raise_value(e.value))?;
        return Ok(results.first().copied().unwrap_or(LuaValue::nil()));
    }
    let bad = if a.is_number() { b } else { a };
    Err(vm.raise_string(format!("attempt to perform arithmetic ({op_name}) on a {} value", bad.type_name())))
}
