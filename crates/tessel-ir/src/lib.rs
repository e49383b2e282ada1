//! Mutable in-memory IR core.
//!
//! Values live in an arena owned by [`IrContext`] and are connected by
//! explicitly tracked use edges. Containers (modules, functions, blocks)
//! keep per-scope symbol tables in sync with their members, and metadata
//! nodes carry a separate reference-tracking mechanism so forward
//! declarations can be replaced after the fact.
//!
//! Structural misuse (destroying a used value, double-tracking a metadata
//! location, leaking names from a scope) is never reported as a `Result`:
//! it is an [`InvariantViolation`] that aborts through the context's hook.

mod builder;
mod context;
mod graph;
mod hierarchy;
mod value;

pub mod config;
pub mod metadata;
pub mod printer;
pub mod refs;
pub mod symbol_table;
pub mod types;
pub mod verify;
pub mod violation;

pub use builder::InstructionBuilder;
pub use config::{BlockAddressPolicy, IrConfig};
pub use context::{IrContext, Scope};
pub use metadata::{MdLocation, MdOwner, MetadataKind, MetadataTracker, Storage};
pub use printer::{print_function, print_module};
pub use refs::{HandleRef, MdKindId, MetadataRef, ModuleRef, TypeRef, ValueRef};
pub use symbol_table::{SymbolTable, name_hash};
pub use types::{TypeData, TypeInterner};
pub use value::{ConstantData, Opcode, Use, ValueKind};
pub use verify::{VerificationReport, VerifyError, verify_context};
pub use violation::{AbortHook, InvariantViolation, unsupported};
