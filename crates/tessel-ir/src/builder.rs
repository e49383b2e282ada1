//! Builder for instructions.

use smallvec::SmallVec;

use crate::context::IrContext;
use crate::refs::{TypeRef, ValueRef};
use crate::value::Opcode;

/// Collects an instruction's opcode, type, operands and name, then creates
/// it floating or directly inside a block.
pub struct InstructionBuilder {
    opcode: Opcode,
    ty: TypeRef,
    operands: SmallVec<[Option<ValueRef>; 4]>,
    name: Option<String>,
}

impl InstructionBuilder {
    pub fn new(opcode: Opcode, ty: TypeRef) -> Self {
        Self {
            opcode,
            ty,
            operands: SmallVec::new(),
            name: None,
        }
    }

    pub fn operand(mut self, v: ValueRef) -> Self {
        self.operands.push(Some(v));
        self
    }

    pub fn operands(mut self, vs: impl IntoIterator<Item = ValueRef>) -> Self {
        self.operands.extend(vs.into_iter().map(Some));
        self
    }

    /// Reserve an operand slot that points at nothing yet.
    pub fn empty_operand(mut self) -> Self {
        self.operands.push(None);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Create the instruction outside of any block. Its name is registered
    /// once it is inserted.
    pub fn build(self, ctx: &mut IrContext) -> ValueRef {
        let inst = ctx.create_instruction(self.opcode, self.ty, &self.operands);
        if let Some(name) = &self.name {
            ctx.set_name(inst, name);
        }
        inst
    }

    /// Create the instruction at the end of `block`.
    pub fn append_to(self, ctx: &mut IrContext, block: ValueRef) -> ValueRef {
        let inst = self.build(ctx);
        ctx.append_instruction(block, inst);
        inst
    }

    /// Create the instruction right before `anchor`.
    pub fn insert_before(self, ctx: &mut IrContext, anchor: ValueRef) -> ValueRef {
        let inst = self.build(ctx);
        ctx.insert_instruction_before(inst, anchor);
        inst
    }
}
