//! Fatal invariant violations and unsupported construction paths.
//!
//! An [`InvariantViolation`] means the caller broke a structural rule of the
//! IR. It is never returned as a `Result`: `IrContext::violation` logs it,
//! hands it to the abort hook, and panics. Test suites install a hook to
//! observe the violation before the unwind.

use derive_more::{Display, Error};

use crate::metadata::MdLocation;
use crate::refs::{HandleRef, MetadataRef, ModuleRef, TypeRef, ValueRef};
use crate::value::ValueKind;

/// Callback invoked with every invariant violation before the context panics.
pub type AbortHook = Box<dyn Fn(&InvariantViolation)>;

#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[display("cannot destroy {kind} {value}: {uses} use(s) remain")]
    DestroyWithUses {
        value: ValueRef,
        kind: ValueKind,
        uses: usize,
    },

    #[display("cannot destroy {value}: still wrapped by metadata {metadata}")]
    DestroyWrappedValue {
        value: ValueRef,
        metadata: MetadataRef,
    },

    #[display("use of destroyed value {value}")]
    StaleValue { value: ValueRef },

    #[display("use of erased metadata {metadata}")]
    StaleMetadata { metadata: MetadataRef },

    #[display("use of erased module {module}")]
    StaleModule { module: ModuleRef },

    #[display("use of released metadata handle {handle}")]
    StaleHandle { handle: HandleRef },

    #[display("expected {expected} for {value}, found {found}")]
    WrongKind {
        value: ValueRef,
        expected: ValueKind,
        found: ValueKind,
    },

    #[display("{ty} is not a function type")]
    NotAFunctionType { ty: TypeRef },

    #[display("replace_all_uses_with: {new} has a different type than {old}")]
    TypeMismatch { old: ValueRef, new: ValueRef },

    #[display("operand index {index} out of range for {user} with {len} operand(s)")]
    OperandOutOfRange {
        user: ValueRef,
        index: u32,
        len: usize,
    },

    #[display("operands of constant {value} only change through replace_all_uses_with")]
    ImmutableConstant { value: ValueRef },

    #[display("{kind} {value} cannot have a name")]
    UnnameableValue { value: ValueRef, kind: ValueKind },

    #[display("{value} already belongs to a container; remove it first")]
    AlreadyOwned { value: ValueRef },

    #[display("{value} is not inside a container")]
    NotOwned { value: ValueRef },

    #[display("cannot move {value} before itself")]
    SelfAnchor { value: ValueRef },

    #[display("{scope} torn down with {residual} registered symbol(s)")]
    ScopeLeak { scope: String, residual: usize },

    #[display("{location} is already tracked on {target}")]
    DoubleTrack {
        location: MdLocation,
        target: MetadataRef,
    },

    #[display("{location} is not tracked on {target}")]
    MissingTrackedLocation {
        location: MdLocation,
        target: MetadataRef,
    },

    #[display("{location} is already occupied on {target}")]
    TrackedLocationOccupied {
        location: MdLocation,
        target: MetadataRef,
    },

    #[display("metadata {metadata} is not replaceable")]
    NotReplaceable { metadata: MetadataRef },

    #[display("metadata {metadata} still has {uses} tracked reference(s)")]
    MetadataStillTracked { metadata: MetadataRef, uses: usize },

    #[display("uniqued metadata {metadata} cannot be edited in place")]
    ImmutableMetadata { metadata: MetadataRef },

    #[display("operand index {index} out of range for {metadata} with {len} operand(s)")]
    MetadataOperandOutOfRange {
        metadata: MetadataRef,
        index: u32,
        len: usize,
    },
}

/// Fail fast on a construction path this crate does not implement.
///
/// This is a limitation of the library, not bad caller data and not a
/// broken invariant, so it bypasses the abort hook.
#[track_caller]
pub fn unsupported(what: &str) -> ! {
    panic!("not supported: {what}")
}
