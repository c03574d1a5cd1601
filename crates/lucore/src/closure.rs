//! Closures and the upvalues that let nested functions share mutable locals.

use std::rc::Rc;

use crate::gc::UpvalueId;
use crate::proto::Prototype;
use crate::value::LuaValue;
use crate::vm::CFunction;

/// An upvalue is open while it still aliases a live stack slot in some frame,
/// and closed once that frame returns — at which point its value is copied
/// out so further reads/writes go through the `Closed` variant instead.
/// Two closures sharing an open upvalue over the same stack slot must see
/// each other's writes, which is why upvalues are heap objects addressed by
/// `UpvalueId` rather than embedded in the closure.
#[derive(Debug, Clone)]
pub enum Upvalue {
    Open { stack_index: usize },
    Closed(LuaValue),
}

impl Upvalue {
    pub fn is_open(&self) -> bool {
        matches!(self, Upvalue::Open { .. })
    }

    pub fn open_index(&self) -> Option<usize> {
        match self {
            Upvalue::Open { stack_index } => Some(*stack_index),
            Upvalue::Closed(_) => None,
        }
    }

    pub fn close(&mut self, value: LuaValue) {
        *self = Upvalue::Closed(value);
    }
}

/// What a closure actually runs: a compiled Lua prototype, or a native
/// (host-implemented) function identified by its Rust function pointer.
#[derive(Clone)]
pub enum FunctionBody {
    Lua(Rc<Prototype>),
    Native(CFunction),
}

/// A callable value: a function body plus the upvalues it closed over.
/// `upvalues` is empty for native functions.
pub struct Closure {
    pub body: FunctionBody,
    pub upvalues: Vec<UpvalueId>,
}

impl Closure {
    pub fn lua(proto: Rc<Prototype>, upvalues: Vec<UpvalueId>) -> Self {
        Closure { body: FunctionBody::Lua(proto), upvalues }
    }

    pub fn native(f: CFunction) -> Self {
        Closure { body: FunctionBody::Native(f), upvalues: Vec::new() }
    }

    /// A native closure carrying captured state (e.g. `coroutine.wrap`'s
    /// wrapped thread) via already-closed upvalues.
    pub fn native_with_upvalues(f: CFunction, upvalues: Vec<UpvalueId>) -> Self {
        Closure { body: FunctionBody::Native(f), upvalues }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.body, FunctionBody::Native(_))
    }

    pub fn proto(&self) -> Option<&Rc<Prototype>> {
        match &self.body {
            FunctionBody::Lua(p) => Some(p),
            FunctionBody::Native(_) => None,
        }
    }
}
