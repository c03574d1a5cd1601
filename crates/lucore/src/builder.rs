//! Hand-assembly of [`Prototype`]s. Nothing in this crate compiles Lua
//! source to bytecode — a `ProtoBuilder` is how tests and embedders without
//! an external compiler construct one instruction at a time instead.

use std::rc::Rc;

use crate::gc::GcPool;
use crate::proto::{Prototype, UpvalueDesc};
use crate::value::LuaValue;
use crate::vm::opcode::Instruction;

pub struct ProtoBuilder {
    name: String,
    num_params: u8,
    is_vararg: bool,
    max_stack_size: u16,
    code: Vec<Instruction>,
    line_info: Vec<u32>,
    constants: Vec<LuaValue>,
    upvalues: Vec<UpvalueDesc>,
    upvalue_names: Vec<Option<String>>,
    nested: Vec<Rc<Prototype>>,
}

impl ProtoBuilder {
    pub fn new(name: impl Into<String>, num_params: u8, is_vararg: bool, max_stack_size: u16) -> Self {
        ProtoBuilder {
            name: name.into(),
            num_params,
            is_vararg,
            max_stack_size,
            code: Vec::new(),
            line_info: Vec::new(),
            constants: Vec::new(),
            upvalues: Vec::new(),
            upvalue_names: Vec::new(),
            nested: Vec::new(),
        }
    }

    /// Append an instruction at line 0 (no source mapping); returns its `pc`,
    /// handy for patching a forward jump's `b` operand once the target is known.
    pub fn emit(&mut self, instr: Instruction) -> usize {
        self.emit_at_line(instr, 0)
    }

    pub fn emit_at_line(&mut self, instr: Instruction, line: u32) -> usize {
        self.code.push(instr);
        self.line_info.push(line);
        self.code.len() - 1
    }

    /// Overwrite an already-emitted instruction, e.g. to patch a `Jmp`'s
    /// offset once the jump target's `pc` is known.
    pub fn patch(&mut self, pc: usize, instr: Instruction) {
        self.code[pc] = instr;
    }

    pub fn pc(&self) -> usize {
        self.code.len()
    }

    pub fn add_constant(&mut self, value: LuaValue) -> u16 {
        self.constants.push(value);
        (self.constants.len() - 1) as u16
    }

    pub fn add_upvalue(&mut self, desc: UpvalueDesc, name: Option<impl Into<String>>) {
        self.upvalues.push(desc);
        self.upvalue_names.push(name.map(Into::into));
    }

    pub fn add_nested(&mut self, proto: Rc<Prototype>) -> u16 {
        self.nested.push(proto);
        (self.nested.len() - 1) as u16
    }

    /// Intern the name/upvalue-name strings into `pool` and assemble the
    /// finished [`Prototype`].
    pub fn build(self, pool: &mut GcPool) -> Prototype {
        let name = pool.intern_string(&self.name);
        Prototype {
            name: Some(name),
            num_params: self.num_params,
            is_vararg: self.is_vararg,
            max_stack_size: self.max_stack_size,
            code: self.code,
            constants: self.constants,
            upvalues: self.upvalues,
            upvalue_names: self.upvalue_names.into_iter().map(|n| n.map(|s| pool.intern_string(&s))).collect(),
            nested: self.nested,
            line_info: self.line_info,
            source_name: Some(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::opcode::OpCode;

    #[test]
    fn builds_a_minimal_return_prototype() {
        let mut pool = GcPool::new();
        let mut b = ProtoBuilder::new("chunk", 0, false, 2);
        let k = b.add_constant(LuaValue::integer(7));
        b.emit(Instruction::new(OpCode::LoadK, 0, k as i32, 0));
        b.emit(Instruction::new(OpCode::Return, 0, 2, 0));
        let proto = b.build(&mut pool);
        assert_eq!(proto.code.len(), 2);
        assert_eq!(proto.constants[0].as_integer(), Some(7));
    }

    #[test]
    fn jump_target_can_be_patched_after_the_fact() {
        let mut pool = GcPool::new();
        let mut b = ProtoBuilder::new("chunk", 0, false, 1);
        let jmp_pc = b.emit(Instruction::new(OpCode::Jmp, 0, 0, 0));
        let target = b.pc();
        b.patch(jmp_pc, Instruction::new(OpCode::Jmp, 0, (target as i32) - (jmp_pc as i32) - 1, 0));
        let proto = b.build(&mut pool);
        assert_eq!(proto.code[0].b, 0);
    }
}
