//! Coroutines: a Lua thread is a separate value stack and call-frame chain
//! that can be suspended mid-execution and resumed later.

use crate::frame::LuaCallFrame;
use crate::value::LuaValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    /// Never resumed yet.
    Suspended,
    /// Currently executing (it is the thread the VM is running on).
    Running,
    /// Resumed another coroutine and is waiting for it to finish or yield back.
    Normal,
    /// Finished (returned or errored) and can only be resumed to observe that.
    Dead,
}

pub struct LuaThread {
    pub status: CoroutineStatus,
    pub stack: Vec<LuaValue>,
    pub frames: Vec<LuaCallFrame>,
    /// Values passed to the most recent `yield`, waiting to be returned from
    /// the `resume` call that wakes this thread back up.
    pub pending_yield: Vec<LuaValue>,
    /// Values passed to `resume`, waiting to be returned from this thread's
    /// own `coroutine.yield` call site once it resumes.
    pub pending_resume_args: Vec<LuaValue>,
    /// Set when the thread terminates with an error; `resume` surfaces this
    /// as its own `false, err` return instead of propagating it.
    pub error_value: Option<LuaValue>,
    /// The thread that resumed this one, so `yield` knows who to wake.
    pub resumer: Option<crate::gc::ThreadId>,
    pub is_main: bool,
    /// Absolute stack indices marked to-be-closed (`<close>` locals), most
    /// recently marked last. Popped and run through `__close` as control
    /// leaves the scope that marked them.
    pub to_be_closed: Vec<usize>,
    /// Becomes `true` on the first `resume`; distinguishes "write `resume`'s
    /// arguments into the entry frame's parameters" from "write them into
    /// the register window the pending `yield` call is waiting on".
    pub started: bool,
    /// Where the in-flight `coroutine.yield` call's results belong: the
    /// `CALL` opcode's result base and its wanted-result count, captured at
    /// the moment of yielding so the next `resume` can deliver its arguments
    /// there instead of at the (already-advanced) program counter.
    pub yield_result_base: Option<(usize, Option<usize>)>,
}

impl LuaThread {
    pub fn new_main() -> Self {
        LuaThread {
            status: CoroutineStatus::Running,
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            pending_yield: Vec::new(),
            pending_resume_args: Vec::new(),
            error_value: None,
            resumer: None,
            is_main: true,
            to_be_closed: Vec::new(),
            started: true,
            yield_result_base: None,
        }
    }

    pub fn new_coroutine() -> Self {
        LuaThread {
            status: CoroutineStatus::Suspended,
            stack: Vec::with_capacity(64),
            frames: Vec::new(),
            pending_yield: Vec::new(),
            pending_resume_args: Vec::new(),
            error_value: None,
            resumer: None,
            is_main: false,
            to_be_closed: Vec::new(),
            started: false,
            yield_result_base: None,
        }
    }

    pub fn is_yieldable(&self) -> bool {
        !self.is_main && self.status == CoroutineStatus::Running
    }

    pub fn is_dead(&self) -> bool {
        self.status == CoroutineStatus::Dead
    }
}
