//! Entity references for the IR arenas.
//!
//! Each ref type is a thin `u32` wrapper providing type-safe indexing into
//! `PrimaryMap` storage in `IrContext`. Ids are never reused: once an entity
//! is destroyed its slot stays tombstoned, so a stale ref can be detected but
//! can never alias a newer entity.

use cranelift_entity::entity_impl;

/// Reference to a value (argument, block, function, global, instruction,
/// constant, or metadata wrapper).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef(u32);
entity_impl!(ValueRef, "v");

/// Reference to a single operand edge. Internal to the value graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct UseRef(u32);
entity_impl!(UseRef, "use");

/// Reference to a module.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleRef(u32);
entity_impl!(ModuleRef, "module");

/// Reference to an interned type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(u32);
entity_impl!(TypeRef, "ty");

/// Reference to a metadata node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetadataRef(u32);
entity_impl!(MetadataRef, "!");

/// Reference to a free-standing tracked metadata handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleRef(u32);
entity_impl!(HandleRef, "handle");

/// Interned metadata attachment kind (`dbg`, `range`, ...).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MdKindId(u32);
entity_impl!(MdKindId, "mdkind");

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn entity_ref_display() {
        assert_eq!(format!("{}", ValueRef::new(5)), "v5");
        assert_eq!(format!("{}", ModuleRef::new(0)), "module0");
        assert_eq!(format!("{}", TypeRef::new(3)), "ty3");
        assert_eq!(format!("{}", MetadataRef::new(2)), "!2");
        assert_eq!(format!("{}", HandleRef::new(1)), "handle1");
        assert_eq!(format!("{}", MdKindId::new(4)), "mdkind4");
    }
}
