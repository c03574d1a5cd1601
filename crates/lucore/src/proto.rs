//! The external compiler-pipeline contract: a `Prototype` is what a
//! source-to-bytecode compiler (out of scope for this crate) hands the
//! runtime — a constant pool, an instruction stream, and upvalue descriptors.
//! `builder` (see `crate::builder`) assembles these by hand for embedders and
//! tests that have no compiler available.

use std::rc::Rc;

use crate::gc::StringId;
use crate::value::LuaValue;
use crate::vm::opcode::Instruction;

/// How a closure's upvalue is captured when the closure is instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueDesc {
    /// Captured from a register in the *enclosing* frame (becomes an open
    /// upvalue pointing at that stack slot).
    ParentLocal(u16),
    /// Captured from the enclosing closure's own upvalue list by index.
    ParentUpvalue(u16),
}

/// A compiled function body: everything the interpreter needs to run it,
/// independent of any particular activation.
#[derive(Debug)]
pub struct Prototype {
    pub name: Option<StringId>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u16,
    pub code: Vec<Instruction>,
    pub constants: Vec<LuaValue>,
    pub upvalues: Vec<UpvalueDesc>,
    /// Upvalue names, parallel to `upvalues`, for `debug.getupvalue`.
    pub upvalue_names: Vec<Option<StringId>>,
    pub nested: Vec<Rc<Prototype>>,
    /// Source line for each instruction, parallel to `code`; empty if the
    /// producer didn't keep line info (debug traces then show no line).
    pub line_info: Vec<u32>,
    pub source_name: Option<StringId>,
}

impl Prototype {
    pub fn line_for(&self, pc: usize) -> Option<u32> {
        self.line_info.get(pc).copied()
    }
}

/// The root prototype of a compiled chunk, plus the chunk-level metadata a
/// host needs to load and run it (`lua_load`'s output, morally).
#[derive(Debug)]
pub struct Chunk {
    pub main: Rc<Prototype>,
    pub name: String,
}
