//! Random edit sequences must leave the graph structurally consistent.

use proptest::prelude::*;
use tessel_ir::{InstructionBuilder, IrContext, Opcode, Scope, ValueRef, verify_context};

const ADD: Opcode = Opcode::new("add");

const NAMES: [&str; 3] = ["a", "t", "x"];

#[derive(Clone, Debug)]
enum Edit {
    Create {
        block: u8,
        lhs: u8,
        rhs: u8,
        name: Option<u8>,
    },
    SetOperand {
        user: u8,
        index: u8,
        target: Option<u8>,
    },
    ReplaceAll {
        old: u8,
        new: u8,
    },
    MoveToEnd {
        inst: u8,
        block: u8,
    },
    Rename {
        inst: u8,
        name: u8,
    },
    EraseIfUnused {
        inst: u8,
    },
}

fn arb_edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => (any::<u8>(), any::<u8>(), any::<u8>(), prop::option::of(0u8..3)).prop_map(
            |(block, lhs, rhs, name)| Edit::Create { block, lhs, rhs, name }
        ),
        2 => (any::<u8>(), 0u8..2, prop::option::of(any::<u8>()))
            .prop_map(|(user, index, target)| Edit::SetOperand { user, index, target }),
        2 => (any::<u8>(), any::<u8>()).prop_map(|(old, new)| Edit::ReplaceAll { old, new }),
        2 => (any::<u8>(), any::<u8>()).prop_map(|(inst, block)| Edit::MoveToEnd { inst, block }),
        1 => (any::<u8>(), 0u8..3).prop_map(|(inst, name)| Edit::Rename { inst, name }),
        1 => any::<u8>().prop_map(|inst| Edit::EraseIfUnused { inst }),
    ]
}

struct World {
    ctx: IrContext,
    functions: Vec<ValueRef>,
    blocks: Vec<ValueRef>,
    /// Arguments, followed by every live instruction.
    values: Vec<ValueRef>,
    num_args: usize,
}

impl World {
    fn new() -> Self {
        let mut ctx = IrContext::new();
        let m = ctx.create_module("m");
        let i32_ty = ctx.types.int(32);
        let fn_ty = ctx.types.function(i32_ty, [i32_ty]);
        let mut functions = Vec::new();
        let mut blocks = Vec::new();
        let mut values = Vec::new();
        for name in ["f", "g"] {
            let f = ctx.create_function(m, name, fn_ty);
            values.extend_from_slice(ctx.function_args(f));
            blocks.push(ctx.create_block(f, "entry"));
            blocks.push(ctx.create_block(f, "next"));
            functions.push(f);
        }
        let num_args = values.len();
        Self {
            ctx,
            functions,
            blocks,
            values,
            num_args,
        }
    }

    fn pick(pool: &[ValueRef], i: u8) -> ValueRef {
        pool[i as usize % pool.len()]
    }

    fn instructions(&self) -> &[ValueRef] {
        &self.values[self.num_args..]
    }

    fn apply(&mut self, edit: &Edit) {
        match *edit {
            Edit::Create {
                block,
                lhs,
                rhs,
                name,
            } => {
                let ty = self.ctx.types.int(32);
                let mut b = InstructionBuilder::new(ADD, ty)
                    .operand(Self::pick(&self.values, lhs))
                    .operand(Self::pick(&self.values, rhs));
                if let Some(n) = name {
                    b = b.name(NAMES[n as usize]);
                }
                let inst = b.append_to(&mut self.ctx, Self::pick(&self.blocks, block));
                self.values.push(inst);
            }
            Edit::SetOperand {
                user,
                index,
                target,
            } => {
                if self.instructions().is_empty() {
                    return;
                }
                let user = Self::pick(self.instructions(), user);
                let target = target.map(|t| Self::pick(&self.values, t));
                self.ctx.set_operand(user, index as u32, target);
            }
            Edit::ReplaceAll { old, new } => {
                let old = Self::pick(&self.values, old);
                let new = Self::pick(&self.values, new);
                self.ctx.replace_all_uses_with(old, new);
                assert!(old == new || !self.ctx.has_uses(old));
            }
            Edit::MoveToEnd { inst, block } => {
                if self.instructions().is_empty() {
                    return;
                }
                let inst = Self::pick(self.instructions(), inst);
                let block = Self::pick(&self.blocks, block);
                self.ctx.move_instruction_to_end(inst, block);
            }
            Edit::Rename { inst, name } => {
                if self.instructions().is_empty() {
                    return;
                }
                let inst = Self::pick(self.instructions(), inst);
                self.ctx.set_name(inst, NAMES[name as usize]);
            }
            Edit::EraseIfUnused { inst } => {
                if self.instructions().is_empty() {
                    return;
                }
                let pos = self.num_args + inst as usize % self.instructions().len();
                let inst = self.values[pos];
                if !self.ctx.has_uses(inst) {
                    self.ctx.erase_instruction(inst);
                    self.values.remove(pos);
                }
            }
        }
    }

    fn total_uses(&self) -> usize {
        self.values.iter().map(|&v| self.ctx.num_uses(v)).sum()
    }

    fn total_filled_operands(&self) -> usize {
        self.instructions()
            .iter()
            .map(|&i| self.ctx.operands(i).iter().flatten().count())
            .sum()
    }
}

proptest! {
    #[test]
    fn prop_edits_keep_graph_consistent(edits in prop::collection::vec(arb_edit(), 1..48)) {
        let mut world = World::new();
        for edit in &edits {
            world.apply(edit);
            let report = verify_context(&world.ctx);
            prop_assert!(report.is_ok(), "after {:?}: {}", edit, report);
        }
        prop_assert_eq!(world.total_uses(), world.total_filled_operands());
    }

    #[test]
    fn prop_names_stay_unique_per_function(edits in prop::collection::vec(arb_edit(), 1..48)) {
        let mut world = World::new();
        for edit in &edits {
            world.apply(edit);
        }
        for &f in &world.functions {
            let symbols = world.ctx.scope_symbols(Scope::Function(f));
            let mut names: Vec<&str> = symbols
                .values()
                .into_iter()
                .filter_map(|v| world.ctx.name(v))
                .collect();
            let total = names.len();
            names.sort_unstable();
            names.dedup();
            prop_assert_eq!(names.len(), total);
        }
    }
}
