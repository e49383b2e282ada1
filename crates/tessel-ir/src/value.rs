//! Value nodes stored in the `IrContext` arena.

use std::fmt;

use derive_more::Display;
use smallvec::SmallVec;

use crate::refs::{MdKindId, MetadataRef, ModuleRef, TypeRef, UseRef, ValueRef};
use crate::symbol_table::SymbolTable;

/// Closed set of value kinds. This is the discriminant of [`ValueNode`].
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum ValueKind {
    #[display("argument")]
    Argument,
    #[display("basic block")]
    BasicBlock,
    #[display("function")]
    Function,
    #[display("global variable")]
    GlobalVariable,
    #[display("instruction")]
    Instruction,
    #[display("constant")]
    Constant,
    #[display("metadata value")]
    MetadataAsValue,
}

/// Instruction opcode. Opcode semantics belong to the caller; the IR only
/// carries the mnemonic.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(&'static str);

impl Opcode {
    pub const fn new(mnemonic: &'static str) -> Self {
        Self(mnemonic)
    }

    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opcode({})", self.0)
    }
}

/// Payload of a floating, context-interned constant.
///
/// `BlockAddress` keeps its function and block as real operands so the block
/// sees the constant in its use-list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstantData {
    Int(i64),
    Null,
    Undef,
    BlockAddress,
}

/// Interning key for constants. Block addresses are keyed by their operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ConstantKey {
    Scalar(TypeRef, ConstantData),
    BlockAddress { function: ValueRef, block: ValueRef },
}

/// A single use of a value: which user references it, at which operand index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Use {
    pub user: ValueRef,
    pub operand_index: u32,
}

/// Kind-specific payload of a value.
pub(crate) enum ValueNode {
    Argument {
        function: ValueRef,
        index: u32,
    },
    BasicBlock {
        function: Option<ValueRef>,
        insts: Vec<ValueRef>,
    },
    Function {
        module: Option<ModuleRef>,
        args: Vec<ValueRef>,
        blocks: Vec<ValueRef>,
        symbols: SymbolTable,
    },
    GlobalVariable {
        module: Option<ModuleRef>,
    },
    Instruction {
        block: Option<ValueRef>,
        opcode: Opcode,
    },
    Constant(ConstantData),
    MetadataAsValue {
        metadata: MetadataRef,
    },
}

impl ValueNode {
    pub(crate) fn kind(&self) -> ValueKind {
        match self {
            ValueNode::Argument { .. } => ValueKind::Argument,
            ValueNode::BasicBlock { .. } => ValueKind::BasicBlock,
            ValueNode::Function { .. } => ValueKind::Function,
            ValueNode::GlobalVariable { .. } => ValueKind::GlobalVariable,
            ValueNode::Instruction { .. } => ValueKind::Instruction,
            ValueNode::Constant(_) => ValueKind::Constant,
            ValueNode::MetadataAsValue { .. } => ValueKind::MetadataAsValue,
        }
    }
}

/// Data for a single live value.
pub(crate) struct ValueData {
    pub(crate) ty: TypeRef,
    pub(crate) name: Option<String>,
    /// Hash of `name` as computed by the owning scope. Zero when unnamed.
    pub(crate) name_hash: u64,
    /// Head of the incoming edge list.
    pub(crate) first_use: Option<UseRef>,
    /// Outgoing edges, one per operand slot.
    pub(crate) operands: SmallVec<[UseRef; 4]>,
    pub(crate) attachments: SmallVec<[(MdKindId, MetadataRef); 2]>,
    pub(crate) node: ValueNode,
}

impl ValueData {
    pub(crate) fn new(ty: TypeRef, node: ValueNode) -> Self {
        Self {
            ty,
            name: None,
            name_hash: 0,
            first_use: None,
            operands: SmallVec::new(),
            attachments: SmallVec::new(),
            node,
        }
    }

    pub(crate) fn kind(&self) -> ValueKind {
        self.node.kind()
    }
}

/// Data for a single operand edge.
#[derive(Clone, Copy, Debug)]
pub(crate) struct UseData {
    pub(crate) user: ValueRef,
    pub(crate) operand_index: u32,
    pub(crate) target: Option<ValueRef>,
    pub(crate) prev: Option<UseRef>,
    pub(crate) next: Option<UseRef>,
}
