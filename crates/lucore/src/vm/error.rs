//! Error taxonomy: a cheap tag for the hot path, a richer wrapper assembled
//! only once an error is about to leave the VM.

use crate::value::LuaValue;

/// A 1-byte error discriminant. Kept `Copy` so that `LuaResult<T>` never
/// costs more on the success path than the size of `T` itself — the actual
/// raised value (which may be any `LuaValue`, not just a string) lives on
/// whichever `LuaThread`/`LuaVM` raised it, fetched via `take_error_value`
/// only by the handler that needs it (`pcall`, the top-level driver, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaError {
    /// `error()` was called, or a runtime check failed; consult the VM's
    /// last raised value for the payload.
    RuntimeError,
    /// A metamethod lookup or arithmetic/comparison/concat/length operation
    /// found no applicable metamethod and no built-in behavior.
    TypeError,
    /// The register/C stack grew past its configured ceiling.
    StackOverflow,
    /// The collector could not satisfy an allocation even after a full cycle.
    OutOfMemory,
    /// A `yield` was attempted across a non-yieldable boundary (e.g. inside
    /// a metamethod call in stock Lua, or a native function not marked
    /// yieldable).
    AttemptToYield,
}

pub type LuaResult<T> = Result<T, LuaError>;

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            LuaError::RuntimeError => "runtime error",
            LuaError::TypeError => "type error",
            LuaError::StackOverflow => "stack overflow",
            LuaError::OutOfMemory => "out of memory",
            LuaError::AttemptToYield => "attempt to yield across a non-yieldable boundary",
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for LuaError {}

/// The host-facing error: the `LuaError` kind, the actual raised `LuaValue`
/// (often a string, but per Lua semantics may be any value — a table, for
/// instance), and a rendered message for `Display`/logging.
#[derive(Debug, Clone)]
pub struct LuaFullError {
    pub kind: LuaError,
    pub value: LuaValue,
    pub message: String,
}

impl LuaFullError {
    pub fn new(kind: LuaError, value: LuaValue, message: impl Into<String>) -> Self {
        LuaFullError { kind, value, message: message.into() }
    }
}

impl std::fmt::Display for LuaFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LuaFullError {}
