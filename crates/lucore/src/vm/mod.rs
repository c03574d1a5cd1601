//! The VM: global interpreter state shared by every thread — the object
//! pool, the collector, the globals table, the registry, and the
//! per-primitive-type shared metatables.

pub mod call;
pub mod error;
pub mod interp;
pub mod metamethod;
pub mod opcode;

use std::rc::Rc;

use tracing::{debug, warn};

use crate::closure::{Closure, FunctionBody, Upvalue};
use crate::frame::LuaCallFrame;
use crate::gc::{Collector, FunctionId, GcOptions, GcPool, StringId, TableId, ThreadId};
use crate::lua_value::LuaTable;
use crate::proto::Prototype;
use crate::thread::{CoroutineStatus, LuaThread};
use crate::value::LuaValue;
use error::{LuaError, LuaFullError, LuaResult};

/// Native (host-implemented) function signature: reads its arguments and
/// pushes its results through the `LuaState` handle, returns how many
/// results it pushed.
pub type CFunction = fn(&mut LuaState) -> LuaResult<usize>;

/// Runtime-wide configuration, supplied once at construction.
#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    pub initial_stack_capacity: usize,
    pub gc: GcOptions,
    /// Native-call re-entrancy ceiling: a host function that calls back into
    /// `LuaVM::call` more times than this without returning raises
    /// `StackOverflow` instead of overflowing the real C/Rust stack.
    pub c_stack_limit: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            initial_stack_capacity: 256,
            gc: GcOptions::default(),
            c_stack_limit: 200,
        }
    }
}

pub struct LuaVM {
    pub pool: GcPool,
    pub gc: Collector,
    pub options: VmOptions,
    pub globals: TableId,
    pub registry: TableId,
    /// Shared metatable per primitive type (string, boolean, number, ...).
    /// Tables/userdata instead carry their own `metatable` field.
    pub primitive_metatables: [Option<TableId>; 9],
    pub main_thread: ThreadId,
    pub current_thread: ThreadId,
    pub native_call_depth: usize,
    metamethod_names: metamethod::MetamethodNames,
    /// The native function identity `coroutine.yield` resolves to, so the
    /// `CALL` opcode can recognize it and suspend the interpreter loop
    /// in-place instead of recursing through `call_function`.
    pub yield_function: Option<CFunction>,
}

impl LuaVM {
    pub fn new(options: VmOptions) -> Self {
        let mut pool = GcPool::new();
        let globals = pool.alloc_table(LuaTable::new());
        let registry = pool.alloc_table(LuaTable::new());
        let main_thread = pool.alloc_thread(LuaThread::new_main());
        let metamethod_names = metamethod::MetamethodNames::intern(&mut pool);
        let mut gc = Collector::new(options.gc);
        gc.set_gc_event(metamethod_names.gc);

        LuaVM {
            pool,
            gc,
            options,
            globals,
            registry,
            primitive_metatables: Default::default(),
            main_thread,
            current_thread: main_thread,
            native_call_depth: 0,
            metamethod_names,
            yield_function: None,
        }
    }

    pub fn metamethod_names(&self) -> &metamethod::MetamethodNames {
        &self.metamethod_names
    }

    pub fn current_thread_mut(&mut self) -> &mut LuaThread {
        let id = self.current_thread;
        self.pool.get_thread_mut(id).expect("current thread must be live")
    }

    pub fn current_thread_ref(&self) -> &LuaThread {
        self.pool.get_thread(self.current_thread).expect("current thread must be live")
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        let key = self.pool.intern_string(name);
        let key = LuaValue::string(key);
        self.pool.get_table_mut(self.globals).unwrap().set(key, value);
    }

    pub fn get_global(&mut self, name: &str) -> LuaValue {
        let key = self.pool.intern_string(name);
        let key = LuaValue::string(key);
        self.pool.get_table(self.globals).unwrap().get(&key)
    }

    pub fn register_native(&mut self, name: &str, f: CFunction) {
        self.set_global(name, LuaValue::native_function(f));
    }

    /// Create a Lua closure over a prototype with no captured upvalues
    /// (suitable for the chunk's top-level main function, whose only
    /// upvalue is `_ENV`, bound separately by the caller).
    pub fn load_main(&mut self, proto: Rc<Prototype>) -> FunctionId {
        self.pool.alloc_closure(Closure::lua(proto, Vec::new()))
    }

    /// Push a fresh frame onto the current thread's call stack for `proto`,
    /// copying `args` into its register window, and run the interpreter
    /// loop to completion. This is the entry point for `execute`/`pcall`.
    pub fn call_function(&mut self, function: FunctionId, args: &[LuaValue]) -> Result<Vec<LuaValue>, LuaFullError> {
        let closure = self
            .pool
            .get_closure(function)
            .unwrap_or_else(|| panic!("call_function: dangling FunctionId"));

        match &closure.body {
            FunctionBody::Native(f) => {
                let f = *f;
                let upvalues = closure.upvalues.clone();
                let mut state = LuaState { vm: self, args: args.to_vec(), results: Vec::new(), upvalues };
                match f(&mut state) {
                    Ok(n) => {
                        let mut results = state.results;
                        results.truncate(n);
                        Ok(results)
                    }
                    Err(kind) => Err(self.into_full_error(kind)),
                }
            }
            FunctionBody::Lua(proto) => {
                let proto = proto.clone();
                self.native_call_depth += 1;
                if self.native_call_depth > self.options.c_stack_limit {
                    self.native_call_depth -= 1;
                    return Err(self.into_full_error(LuaError::StackOverflow));
                }
                let base = self.current_thread_ref().stack.len();
                {
                    let thread = self.current_thread_mut();
                    thread.stack.resize(base + proto.max_stack_size as usize, LuaValue::nil());
                    for (i, arg) in args.iter().enumerate().take(proto.num_params as usize) {
                        thread.stack[base + i] = *arg;
                    }
                    let mut frame = LuaCallFrame::new(function, proto, base);
                    frame.status.insert(crate::frame::CallStatus::FRESH);
                    thread.frames.push(frame);
                }
                let result = interp::run(self);
                self.native_call_depth -= 1;
                match result {
                    Ok(interp::RunOutcome::Returned(values)) => Ok(values),
                    Ok(interp::RunOutcome::Yielded) => {
                        let kind = self.raise_string("attempt to yield from outside a coroutine");
                        Err(self.into_full_error(kind))
                    }
                    Err(kind) => Err(self.into_full_error(kind)),
                }
            }
        }
    }

    pub fn into_full_error(&mut self, kind: LuaError) -> LuaFullError {
        let value = self.current_thread_mut().error_value.take().unwrap_or(LuaValue::nil());
        let message = match value.as_string_id().and_then(|id| self.pool.get_string(id)) {
            Some(s) => s.to_string(),
            None => format!("{kind}"),
        };
        if matches!(kind, LuaError::RuntimeError | LuaError::TypeError) {
            debug!(%message, "lua error raised");
        } else {
            warn!(%message, "vm error");
        }
        LuaFullError::new(kind, value, message)
    }

    pub fn raise_string(&mut self, message: impl Into<String>) -> LuaError {
        let s = self.pool.intern_string(&message.into());
        self.current_thread_mut().error_value = Some(LuaValue::string(s));
        LuaError::RuntimeError
    }

    pub fn raise_value(&mut self, value: LuaValue) -> LuaError {
        self.current_thread_mut().error_value = Some(value);
        LuaError::RuntimeError
    }

    pub fn new_coroutine(&mut self, entry: FunctionId) -> ThreadId {
        let mut thread = LuaThread::new_coroutine();
        let proto = self.pool.get_closure(entry).and_then(|c| c.proto().cloned()).unwrap_or_else(|| {
            Rc::new(Prototype {
                name: None,
                num_params: 0,
                is_vararg: true,
                max_stack_size: 0,
                code: Vec::new(),
                constants: Vec::new(),
                upvalues: Vec::new(),
                upvalue_names: Vec::new(),
                nested: Vec::new(),
                line_info: Vec::new(),
                source_name: None,
            })
        });
        // The entry frame's register window isn't sized until here — unlike
        // a direct `call_function`, there's no `args` yet to size around;
        // `resume` fills in the parameter registers once the thread actually
        // starts.
        thread.stack.resize(proto.max_stack_size as usize, LuaValue::nil());
        thread.frames.push(LuaCallFrame {
            function: entry,
            proto,
            base: 0,
            pc: 0,
            status: Default::default(),
            num_extra_args: 0,
            num_results_wanted: None,
            result_base: 0,
        });
        self.pool.alloc_thread(thread)
    }

    pub fn resume(&mut self, thread_id: ThreadId, args: Vec<LuaValue>) -> Result<Vec<LuaValue>, LuaFullError> {
        {
            let thread = self.pool.get_thread(thread_id).expect("resume: dangling ThreadId");
            if thread.status == CoroutineStatus::Dead {
                return Err(LuaFullError::new(
                    LuaError::RuntimeError,
                    LuaValue::nil(),
                    "cannot resume dead coroutine",
                ));
            }
            if thread.status != CoroutineStatus::Suspended {
                return Err(LuaFullError::new(
                    LuaError::RuntimeError,
                    LuaValue::nil(),
                    "cannot resume non-suspended coroutine",
                ));
            }
        }
        let previous = self.current_thread;
        self.pool.get_thread_mut(previous).unwrap().status = CoroutineStatus::Normal;

        let first_resume = !self.pool.get_thread(thread_id).unwrap().started;
        if first_resume {
            let (base, num_params) = {
                let thread = self.pool.get_thread(thread_id).unwrap();
                (thread.frames[0].base, thread.frames[0].proto.num_params as usize)
            };
            let thread = self.pool.get_thread_mut(thread_id).unwrap();
            for (i, slot) in thread.stack[base..base + num_params].iter_mut().enumerate() {
                *slot = args.get(i).copied().unwrap_or(LuaValue::nil());
            }
        } else if let Some((result_base, num_wanted)) = self.pool.get_thread_mut(thread_id).unwrap().yield_result_base.take() {
            interp::store_results(self, thread_id, result_base, &args, num_wanted);
        }
        {
            let thread = self.pool.get_thread_mut(thread_id).unwrap();
            thread.status = CoroutineStatus::Running;
            thread.resumer = Some(previous);
            thread.started = true;
            thread.pending_resume_args = args;
        }
        self.current_thread = thread_id;
        debug!(?thread_id, "coroutine resume");

        let result = interp::run(self);

        self.current_thread = previous;
        self.pool.get_thread_mut(previous).unwrap().status = CoroutineStatus::Running;

        match result {
            Ok(interp::RunOutcome::Returned(values)) => {
                let thread = self.pool.get_thread_mut(thread_id).unwrap();
                thread.status = CoroutineStatus::Dead;
                Ok(values)
            }
            Ok(interp::RunOutcome::Yielded) => {
                let thread = self.pool.get_thread_mut(thread_id).unwrap();
                thread.status = CoroutineStatus::Suspended;
                Ok(std::mem::take(&mut thread.pending_yield))
            }
            Err(kind) => {
                let full = self.into_full_error(kind);
                self.pool.get_thread_mut(thread_id).unwrap().status = CoroutineStatus::Dead;
                Err(full)
            }
        }
    }

    /// Run `__gc` for every object the collector separated out during its
    /// last sweep, then release them back to ordinary white/black bookkeeping
    /// now that finalization has happened. `collectgarbage` and whoever else
    /// drives `self.gc` to `Phase::Pause` should call this right after.
    pub fn run_pending_finalizers(&mut self) -> Result<(), LuaFullError> {
        let pending = self.gc.take_pending_finalizers();
        let event = self.metamethod_names().gc;
        for obj in pending {
            let value = match obj {
                crate::gc::GcRef::Table(id) => LuaValue::table(id),
                crate::gc::GcRef::Userdata(id) => LuaValue::userdata(id),
                _ => continue,
            };
            if let Some(handler) = metamethod::lookup(value, event, &self.pool, &self.primitive_metatables) {
                call::call_value(self, handler, vec![value])?;
            }
            match obj {
                crate::gc::GcRef::Table(id) => {
                    if let Some(t) = self.pool.tables.get_mut(id.0) {
                        t.header.clear_separated();
                    }
                }
                crate::gc::GcRef::Userdata(id) => {
                    if let Some(u) = self.pool.userdata.get_mut(id.0) {
                        u.header.clear_separated();
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// The context a native function receives: its arguments, a place to push
/// results, and a `&mut LuaVM` for calling back into Lua (`pcall`, metatable
/// lookups, allocating new objects) — the whole host ABI in one handle.
pub struct LuaState<'a> {
    pub vm: &'a mut LuaVM,
    args: Vec<LuaValue>,
    results: Vec<LuaValue>,
    /// Upvalues closed over by the closure this call is running as — empty
    /// for every native function except one built with
    /// [`Closure::native_with_upvalues`] (`coroutine.wrap`'s per-thread
    /// closure is the only current user).
    upvalues: Vec<crate::gc::UpvalueId>,
}

impl<'a> LuaState<'a> {
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, i: usize) -> LuaValue {
        self.args.get(i).copied().unwrap_or(LuaValue::nil())
    }

    pub fn args(&self) -> &[LuaValue] {
        &self.args
    }

    pub fn push(&mut self, value: LuaValue) {
        self.results.push(value);
    }

    pub fn check_string(&mut self, i: usize) -> LuaResult<String> {
        let v = self.arg(i);
        v.as_string_id()
            .and_then(|id| self.vm.pool.get_string(id))
            .map(|s| s.to_string())
            .ok_or_else(|| self.vm.raise_string(format!("bad argument #{} (string expected, got {})", i + 1, v.type_name())))
    }

    pub fn check_integer(&mut self, i: usize) -> LuaResult<i64> {
        let v = self.arg(i);
        v.as_integer()
            .ok_or_else(|| self.vm.raise_string(format!("bad argument #{} (number expected, got {})", i + 1, v.type_name())))
    }

    pub fn check_table(&mut self, i: usize) -> LuaResult<TableId> {
        let v = self.arg(i);
        v.as_table_id()
            .ok_or_else(|| self.vm.raise_string(format!("bad argument #{} (table expected, got {})", i + 1, v.type_name())))
    }

    pub fn opt_integer(&self, i: usize, default: i64) -> i64 {
        self.arg(i).as_integer().unwrap_or(default)
    }

    /// Read the `i`th upvalue closed over by the closure currently running.
    /// `Open` upvalues resolve against `current_thread`, mirroring how the
    /// interpreter reads them for Lua closures; every closure built through
    /// `Closure::native_with_upvalues` closes over its values immediately, so
    /// this path only matters if a future caller starts sharing open ones.
    pub fn upvalue(&self, i: usize) -> LuaValue {
        let Some(id) = self.upvalues.get(i).copied() else {
            return LuaValue::nil();
        };
        match self.vm.pool.get_upvalue(id) {
            Some(Upvalue::Closed(v)) => *v,
            Some(Upvalue::Open { stack_index }) => {
                self.vm.current_thread_ref().stack.get(*stack_index).copied().unwrap_or(LuaValue::nil())
            }
            None => LuaValue::nil(),
        }
    }
}
