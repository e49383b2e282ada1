//! Interned type handles.
//!
//! The type system itself lives outside this crate. The IR only needs a
//! stable, comparable handle per type, plus enough structure to derive
//! argument types from a function signature and to print a module.

use std::fmt;

use cranelift_entity::PrimaryMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::refs::TypeRef;

// ============================================================================
// TypeData
// ============================================================================

/// Data for a single interned type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeData {
    Void,
    Label,
    Metadata,
    Int(u32),
    Float(u32),
    Ptr,
    Function {
        ret: TypeRef,
        params: SmallVec<[TypeRef; 4]>,
    },
    /// Opaque named type owned by an external type system.
    Named(String),
}

// ============================================================================
// TypeInterner
// ============================================================================

/// Deduplicating type interner. Same `TypeData` always yields the same `TypeRef`.
pub struct TypeInterner {
    types: PrimaryMap<TypeRef, TypeData>,
    dedup: FxHashMap<TypeData, TypeRef>,
}

impl TypeInterner {
    pub fn new() -> Self {
        Self {
            types: PrimaryMap::new(),
            dedup: FxHashMap::default(),
        }
    }

    /// Intern a type, returning an existing ref if the data matches.
    pub fn intern(&mut self, data: TypeData) -> TypeRef {
        if let Some(&existing) = self.dedup.get(&data) {
            return existing;
        }
        let r = self.types.push(data.clone());
        self.dedup.insert(data, r);
        r
    }

    /// Look up type data by reference.
    pub fn get(&self, r: TypeRef) -> &TypeData {
        &self.types[r]
    }

    pub fn void(&mut self) -> TypeRef {
        self.intern(TypeData::Void)
    }

    pub fn label(&mut self) -> TypeRef {
        self.intern(TypeData::Label)
    }

    pub fn metadata(&mut self) -> TypeRef {
        self.intern(TypeData::Metadata)
    }

    pub fn int(&mut self, bits: u32) -> TypeRef {
        self.intern(TypeData::Int(bits))
    }

    pub fn ptr(&mut self) -> TypeRef {
        self.intern(TypeData::Ptr)
    }

    pub fn function(&mut self, ret: TypeRef, params: impl IntoIterator<Item = TypeRef>) -> TypeRef {
        self.intern(TypeData::Function {
            ret,
            params: params.into_iter().collect(),
        })
    }

    /// Parameter types of a function type, or `None` for any other type.
    pub fn function_params(&self, r: TypeRef) -> Option<&[TypeRef]> {
        match &self.types[r] {
            TypeData::Function { params, .. } => Some(params),
            _ => None,
        }
    }

    /// Display adapter for a type.
    pub fn display(&self, r: TypeRef) -> TypeDisplay<'_> {
        TypeDisplay { interner: self, ty: r }
    }
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders a type the way the printer spells it.
pub struct TypeDisplay<'a> {
    interner: &'a TypeInterner,
    ty: TypeRef,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.interner.get(self.ty) {
            TypeData::Void => f.write_str("void"),
            TypeData::Label => f.write_str("label"),
            TypeData::Metadata => f.write_str("metadata"),
            TypeData::Int(bits) => write!(f, "i{bits}"),
            TypeData::Float(bits) => write!(f, "f{bits}"),
            TypeData::Ptr => f.write_str("ptr"),
            TypeData::Function { ret, params } => {
                write!(f, "{} (", self.interner.display(*ret))?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", self.interner.display(*p))?;
                }
                f.write_str(")")
            }
            TypeData::Named(name) => write!(f, "%{name}"),
        }
    }
}
