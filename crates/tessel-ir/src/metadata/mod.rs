//! Metadata nodes and the locations that reference them.
//!
//! Metadata lives beside the value graph rather than in it: nodes are
//! addressed by `MetadataRef` and reference each other through operand
//! slots. Storage decides mutability. Uniqued nodes are interned by content
//! and never edited in place, distinct nodes are unique by identity, and
//! temporary nodes are forward declarations that will be replaced.
//!
//! Value-wrapping nodes and temporaries are replaceable. Every location that
//! points at a replaceable node is recorded in the [`MetadataTracker`], which
//! is what makes [`IrContext::replace_all_metadata_uses_with`] possible.

mod ops;
mod tracker;

use derive_more::Display;

pub use tracker::MetadataTracker;

use crate::refs::{HandleRef, MdKindId, MetadataRef, ValueRef};

/// Kind discriminant of a metadata node.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    #[display("string")]
    String,
    #[display("value")]
    Value,
    #[display("tuple")]
    Tuple,
}

/// How a node is owned by its context.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum Storage {
    /// Interned by content.
    #[display("uniqued")]
    Uniqued,
    /// Unique by identity.
    #[display("distinct")]
    Distinct,
    /// Forward declaration; replaceable and mutable.
    #[display("temporary")]
    Temporary,
}

/// Payload of a metadata node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum MetadataNode {
    String(String),
    Value(ValueRef),
    Tuple(Vec<Option<MetadataRef>>),
}

impl MetadataNode {
    pub(crate) fn kind(&self) -> MetadataKind {
        match self {
            MetadataNode::String(_) => MetadataKind::String,
            MetadataNode::Value(_) => MetadataKind::Value,
            MetadataNode::Tuple(_) => MetadataKind::Tuple,
        }
    }

    pub(crate) fn key(&self) -> NodeKey {
        match self {
            MetadataNode::String(s) => NodeKey::String(s.clone()),
            MetadataNode::Value(v) => NodeKey::Value(*v),
            MetadataNode::Tuple(ops) => NodeKey::Tuple(ops.clone()),
        }
    }
}

/// Content key for uniqued nodes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum NodeKey {
    String(String),
    Value(ValueRef),
    Tuple(Vec<Option<MetadataRef>>),
}

pub(crate) struct MetadataData {
    pub(crate) storage: Storage,
    pub(crate) node: MetadataNode,
}

/// Storage slot that holds a metadata reference.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum MdLocation {
    /// Operand `index` of a tuple node.
    #[display("operand {index} of {node}")]
    Operand { node: MetadataRef, index: u32 },
    /// Payload of a `MetadataAsValue` wrapper.
    #[display("wrapper {_0}")]
    AsValue(ValueRef),
    /// Free-standing tracking handle.
    #[display("{_0}")]
    Handle(HandleRef),
    /// Attachment of kind `kind` on an instruction, function or global.
    #[display("{kind} attachment of {value}")]
    Attachment { value: ValueRef, kind: MdKindId },
}

/// Who owns a tracked location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MdOwner {
    Metadata(MetadataRef),
    ValueWrapper(ValueRef),
    Unowned,
}

impl MdLocation {
    pub fn owner(self) -> MdOwner {
        match self {
            MdLocation::Operand { node, .. } => MdOwner::Metadata(node),
            MdLocation::AsValue(wrapper) => MdOwner::ValueWrapper(wrapper),
            MdLocation::Handle(_) | MdLocation::Attachment { .. } => MdOwner::Unowned,
        }
    }
}
