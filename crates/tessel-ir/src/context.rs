//! IrContext: arena-based mutable IR storage.
//!
//! Every value, use edge, module and metadata node lives in a `PrimaryMap`
//! owned by `IrContext`. Destroyed entries are tombstoned in place, so ids
//! are never handed out twice and a stale id is always detectable.

use cranelift_entity::PrimaryMap;
use rustc_hash::FxHashMap;
use tracing::error;

use crate::config::IrConfig;
use crate::metadata::{MetadataData, MetadataTracker, NodeKey};
use crate::refs::*;
use crate::symbol_table::SymbolTable;
use crate::types::TypeInterner;
use crate::value::{ConstantData, ConstantKey, UseData, ValueData, ValueKind, ValueNode};
use crate::violation::{AbortHook, InvariantViolation};

// ============================================================================
// Entity data types
// ============================================================================

/// Data for a single module.
pub(crate) struct ModuleData {
    pub(crate) name: String,
    pub(crate) functions: Vec<ValueRef>,
    pub(crate) globals: Vec<ValueRef>,
    pub(crate) symbols: SymbolTable,
    /// Named metadata, in insertion order. Each operand is a tracked handle.
    pub(crate) named_metadata: Vec<(String, Vec<HandleRef>)>,
}

/// State of a free-standing metadata handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HandleSlot {
    Live(Option<MetadataRef>),
    Released,
}

/// Naming scope a value is registered in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Instructions, blocks and arguments of a function.
    Function(ValueRef),
    /// Functions and global variables of a module.
    Module(ModuleRef),
}

// ============================================================================
// IrContext
// ============================================================================

/// Arena-based mutable IR context.
///
/// Owns all IR entities and provides methods for creating, querying, and
/// mutating them. Use lists, symbol tables and metadata tracking are kept in
/// sync by every mutating method.
pub struct IrContext {
    pub(crate) config: IrConfig,

    pub(crate) values: PrimaryMap<ValueRef, Option<ValueData>>,
    pub(crate) uses: PrimaryMap<UseRef, UseData>,
    /// Released edge slots. Edges are internal, so their ids may be recycled.
    pub(crate) free_uses: Vec<UseRef>,
    pub(crate) modules: PrimaryMap<ModuleRef, Option<ModuleData>>,

    pub types: TypeInterner,
    pub(crate) constants: FxHashMap<ConstantKey, ValueRef>,

    pub(crate) metadata: PrimaryMap<MetadataRef, Option<MetadataData>>,
    /// Uniqued nodes by content.
    pub(crate) md_uniq: FxHashMap<NodeKey, MetadataRef>,
    /// `MetadataAsValue` wrapper for each wrapped node.
    pub(crate) md_as_value: FxHashMap<MetadataRef, ValueRef>,
    /// Value-wrapping metadata node for each wrapped value.
    pub(crate) value_md: FxHashMap<ValueRef, MetadataRef>,
    pub(crate) handles: PrimaryMap<HandleRef, HandleSlot>,
    pub(crate) tracker: MetadataTracker,
    pub(crate) md_kinds: PrimaryMap<MdKindId, String>,
    pub(crate) md_kind_ids: FxHashMap<String, MdKindId>,

    abort_hook: Option<AbortHook>,
}

impl Default for IrContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Report `violation` through `hook` and unwind.
///
/// Free-standing so callers can hold a mutable borrow of another field while
/// raising.
pub(crate) fn raise(hook: Option<&AbortHook>, violation: InvariantViolation) -> ! {
    error!(%violation, "IR invariant violation");
    if let Some(hook) = hook {
        hook(&violation);
    }
    panic!("invariant violation: {violation}")
}

impl IrContext {
    /// Create a new empty IR context with the default configuration.
    pub fn new() -> Self {
        Self::with_config(IrConfig::default())
    }

    pub fn with_config(config: IrConfig) -> Self {
        Self {
            config,
            values: PrimaryMap::new(),
            uses: PrimaryMap::new(),
            free_uses: Vec::new(),
            modules: PrimaryMap::new(),
            types: TypeInterner::new(),
            constants: FxHashMap::default(),
            metadata: PrimaryMap::new(),
            md_uniq: FxHashMap::default(),
            md_as_value: FxHashMap::default(),
            value_md: FxHashMap::default(),
            handles: PrimaryMap::new(),
            tracker: MetadataTracker::new(),
            md_kinds: PrimaryMap::new(),
            md_kind_ids: FxHashMap::default(),
            abort_hook: None,
        }
    }

    pub fn config(&self) -> &IrConfig {
        &self.config
    }

    /// Install a callback that observes every invariant violation before the
    /// context panics.
    pub fn set_abort_hook(&mut self, hook: impl Fn(&InvariantViolation) + 'static) {
        self.abort_hook = Some(Box::new(hook));
    }

    pub fn clear_abort_hook(&mut self) {
        self.abort_hook = None;
    }

    /// Log `violation`, pass it to the abort hook, and panic.
    pub fn violation(&self, violation: InvariantViolation) -> ! {
        raise(self.abort_hook.as_ref(), violation)
    }

    // ========================================================================
    // Value access
    // ========================================================================

    /// Whether `v` refers to a value that has not been destroyed.
    pub fn is_live(&self, v: ValueRef) -> bool {
        self.values.get(v).is_some_and(Option::is_some)
    }

    pub(crate) fn data(&self, v: ValueRef) -> &ValueData {
        match self.values.get(v).and_then(Option::as_ref) {
            Some(data) => data,
            None => self.violation(InvariantViolation::StaleValue { value: v }),
        }
    }

    pub(crate) fn data_mut(&mut self, v: ValueRef) -> &mut ValueData {
        let hook = self.abort_hook.as_ref();
        match self.values.get_mut(v).and_then(Option::as_mut) {
            Some(data) => data,
            None => raise(hook, InvariantViolation::StaleValue { value: v }),
        }
    }

    pub(crate) fn push_value(&mut self, data: ValueData) -> ValueRef {
        self.values.push(Some(data))
    }

    /// Raise `WrongKind` unless `v` is of kind `expected`.
    pub(crate) fn expect_kind(&self, v: ValueRef, expected: ValueKind) {
        let found = self.kind(v);
        if found != expected {
            self.violation(InvariantViolation::WrongKind {
                value: v,
                expected,
                found,
            });
        }
    }

    pub fn kind(&self, v: ValueRef) -> ValueKind {
        self.data(v).kind()
    }

    pub fn ty(&self, v: ValueRef) -> TypeRef {
        self.data(v).ty
    }

    pub fn name(&self, v: ValueRef) -> Option<&str> {
        self.data(v).name.as_deref()
    }

    /// Cached hash of the value's name; zero when unnamed.
    pub fn name_hash(&self, v: ValueRef) -> u64 {
        self.data(v).name_hash
    }

    /// Naming scope `v` is currently registered in, if it is attached.
    pub fn scope_of(&self, v: ValueRef) -> Option<Scope> {
        match &self.data(v).node {
            ValueNode::Argument { function, .. } => Some(Scope::Function(*function)),
            ValueNode::BasicBlock { function, .. } => function.map(Scope::Function),
            ValueNode::Instruction { block, .. } => block
                .and_then(|b| self.block_parent(b))
                .map(Scope::Function),
            ValueNode::Function { module, .. } | ValueNode::GlobalVariable { module } => {
                module.map(Scope::Module)
            }
            ValueNode::Constant(_) | ValueNode::MetadataAsValue { .. } => None,
        }
    }

    /// Human-readable name of a scope, for diagnostics.
    pub(crate) fn scope_label(&self, scope: Scope) -> String {
        match scope {
            Scope::Function(f) => match self.name(f) {
                Some(name) => format!("function @{name}"),
                None => format!("function {f}"),
            },
            Scope::Module(m) => format!("module {}", self.module_data(m).name),
        }
    }

    pub(crate) fn symbols(&self, scope: Scope) -> &SymbolTable {
        match scope {
            Scope::Function(f) => match &self.data(f).node {
                ValueNode::Function { symbols, .. } => symbols,
                other => self.violation(InvariantViolation::WrongKind {
                    value: f,
                    expected: ValueKind::Function,
                    found: other.kind(),
                }),
            },
            Scope::Module(m) => &self.module_data(m).symbols,
        }
    }

    pub(crate) fn symbols_mut(&mut self, scope: Scope) -> &mut SymbolTable {
        let hook = self.abort_hook.as_ref();
        match scope {
            Scope::Function(f) => match self.values.get_mut(f).and_then(Option::as_mut) {
                Some(ValueData {
                    node: ValueNode::Function { symbols, .. },
                    ..
                }) => symbols,
                Some(other) => raise(
                    hook,
                    InvariantViolation::WrongKind {
                        value: f,
                        expected: ValueKind::Function,
                        found: other.kind(),
                    },
                ),
                None => raise(hook, InvariantViolation::StaleValue { value: f }),
            },
            Scope::Module(m) => match self.modules.get_mut(m).and_then(Option::as_mut) {
                Some(module) => &mut module.symbols,
                None => raise(hook, InvariantViolation::StaleModule { module: m }),
            },
        }
    }

    // ========================================================================
    // Module access
    // ========================================================================

    pub fn is_module_live(&self, m: ModuleRef) -> bool {
        self.modules.get(m).is_some_and(Option::is_some)
    }

    pub(crate) fn module_data(&self, m: ModuleRef) -> &ModuleData {
        match self.modules.get(m).and_then(Option::as_ref) {
            Some(data) => data,
            None => self.violation(InvariantViolation::StaleModule { module: m }),
        }
    }

    pub(crate) fn module_data_mut(&mut self, m: ModuleRef) -> &mut ModuleData {
        let hook = self.abort_hook.as_ref();
        match self.modules.get_mut(m).and_then(Option::as_mut) {
            Some(data) => data,
            None => raise(hook, InvariantViolation::StaleModule { module: m }),
        }
    }

    // ========================================================================
    // Metadata access
    // ========================================================================

    pub fn is_metadata_live(&self, md: MetadataRef) -> bool {
        self.metadata.get(md).is_some_and(Option::is_some)
    }

    pub(crate) fn md_data(&self, md: MetadataRef) -> &MetadataData {
        match self.metadata.get(md).and_then(Option::as_ref) {
            Some(data) => data,
            None => self.violation(InvariantViolation::StaleMetadata { metadata: md }),
        }
    }

    pub(crate) fn md_data_mut(&mut self, md: MetadataRef) -> &mut MetadataData {
        let hook = self.abort_hook.as_ref();
        match self.metadata.get_mut(md).and_then(Option::as_mut) {
            Some(data) => data,
            None => raise(hook, InvariantViolation::StaleMetadata { metadata: md }),
        }
    }

    pub(crate) fn handle_slot(&self, h: HandleRef) -> Option<MetadataRef> {
        match self.handles.get(h) {
            Some(HandleSlot::Live(target)) => *target,
            _ => self.violation(InvariantViolation::StaleHandle { handle: h }),
        }
    }

    // ========================================================================
    // Constants
    // ========================================================================

    fn intern_scalar(&mut self, ty: TypeRef, data: ConstantData) -> ValueRef {
        let key = ConstantKey::Scalar(ty, data);
        if let Some(&existing) = self.constants.get(&key) {
            return existing;
        }
        let c = self.push_value(ValueData::new(ty, ValueNode::Constant(data)));
        self.constants.insert(key, c);
        c
    }

    /// Interned integer constant.
    pub fn const_int(&mut self, ty: TypeRef, value: i64) -> ValueRef {
        self.intern_scalar(ty, ConstantData::Int(value))
    }

    pub fn const_null(&mut self, ty: TypeRef) -> ValueRef {
        self.intern_scalar(ty, ConstantData::Null)
    }

    pub fn const_undef(&mut self, ty: TypeRef) -> ValueRef {
        self.intern_scalar(ty, ConstantData::Undef)
    }

    /// Address of `block` inside `function`.
    ///
    /// The constant keeps `function` and `block` as operands 0 and 1, so it
    /// shows up in both use lists.
    pub fn block_address(&mut self, function: ValueRef, block: ValueRef) -> ValueRef {
        self.expect_kind(function, ValueKind::Function);
        self.expect_kind(block, ValueKind::BasicBlock);
        let key = ConstantKey::BlockAddress { function, block };
        if let Some(&existing) = self.constants.get(&key) {
            return existing;
        }
        let ptr = self.types.ptr();
        let c = self.push_value(ValueData::new(
            ptr,
            ValueNode::Constant(ConstantData::BlockAddress),
        ));
        self.add_operand(c, Some(function));
        self.add_operand(c, Some(block));
        self.constants.insert(key, c);
        c
    }

    /// Payload of constant `c`, or `None` for any other kind of value.
    pub fn constant_data(&self, c: ValueRef) -> Option<ConstantData> {
        match self.data(c).node {
            ValueNode::Constant(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn is_block_address(&self, v: ValueRef) -> bool {
        matches!(
            self.values.get(v).and_then(Option::as_ref),
            Some(ValueData {
                node: ValueNode::Constant(ConstantData::BlockAddress),
                ..
            })
        )
    }

    /// Interning key of a live constant, computed from its current state.
    pub(crate) fn constant_key(&self, c: ValueRef) -> Option<ConstantKey> {
        let data = self.data(c);
        match data.node {
            ValueNode::Constant(ConstantData::BlockAddress) => Some(ConstantKey::BlockAddress {
                function: self.operand(c, 0)?,
                block: self.operand(c, 1)?,
            }),
            ValueNode::Constant(scalar) => Some(ConstantKey::Scalar(data.ty, scalar)),
            _ => None,
        }
    }

    /// Number of live values, for diagnostics and tests.
    pub fn num_live_values(&self) -> usize {
        self.values.values().filter(|v| v.is_some()).count()
    }

    /// Every live value id, in creation order.
    pub fn live_values(&self) -> impl Iterator<Item = ValueRef> + '_ {
        self.values
            .iter()
            .filter(|(_, data)| data.is_some())
            .map(|(v, _)| v)
    }

    /// Number of allocated value ids, including destroyed ones.
    pub fn value_capacity(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use cranelift_entity::EntityRef;

    use super::*;

    #[test]
    fn constants_are_interned() {
        let mut ctx = IrContext::new();
        let i32_ty = ctx.types.int(32);
        let i64_ty = ctx.types.int(64);
        let a = ctx.const_int(i32_ty, 7);
        assert_eq!(ctx.const_int(i32_ty, 7), a);
        assert_ne!(ctx.const_int(i64_ty, 7), a);
        assert_ne!(ctx.const_int(i32_ty, 8), a);
        assert_eq!(ctx.constant_data(a), Some(ConstantData::Int(7)));
        assert_eq!(ctx.kind(a), ValueKind::Constant);
    }

    #[test]
    fn null_and_undef_are_distinct() {
        let mut ctx = IrContext::new();
        let ptr = ctx.types.ptr();
        let null = ctx.const_null(ptr);
        let undef = ctx.const_undef(ptr);
        assert_ne!(null, undef);
        assert_eq!(ctx.const_null(ptr), null);
    }

    #[test]
    #[should_panic(expected = "use of destroyed value")]
    fn stale_value_is_detected() {
        let ctx = IrContext::new();
        ctx.kind(ValueRef::new(3));
    }

    #[test]
    fn abort_hook_sees_violation_before_panic() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut ctx = IrContext::new();
        let sink = Rc::clone(&seen);
        ctx.set_abort_hook(move |v| sink.borrow_mut().push(v.clone()));

        let result = catch_unwind(AssertUnwindSafe(|| ctx.kind(ValueRef::new(0))));
        assert!(result.is_err());
        assert_eq!(
            *seen.borrow(),
            vec![InvariantViolation::StaleValue {
                value: ValueRef::new(0)
            }]
        );
    }

    #[test]
    fn config_is_kept() {
        let config = IrConfig {
            name_separator: "_".to_owned(),
            ..IrConfig::default()
        };
        let ctx = IrContext::with_config(config.clone());
        assert_eq!(ctx.config(), &config);
    }
}
