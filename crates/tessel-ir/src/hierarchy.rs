//! Container hierarchy: modules own functions and globals, functions own
//! blocks and arguments, blocks own instructions.
//!
//! Every insertion registers the member's name in the nearest enclosing
//! scope and every removal unregisters it before the owner link is cleared.
//! Moving a block or instruction to another function re-registers it (and,
//! for a block, every instruction inside it) in the new scope, where it may
//! be renamed.

use rustc_hash::FxHashSet;
use tracing::{debug, error};

use crate::config::BlockAddressPolicy;
use crate::context::{IrContext, ModuleData, Scope};
use crate::refs::{ModuleRef, TypeRef, ValueRef};
use crate::symbol_table::{SymbolTable, name_hash};
use crate::value::{Opcode, ValueData, ValueKind, ValueNode};
use crate::violation::InvariantViolation;

impl IrContext {
    fn wrong_kind(&self, v: ValueRef, expected: ValueKind) -> ! {
        self.violation(InvariantViolation::WrongKind {
            value: v,
            expected,
            found: self.kind(v),
        })
    }

    // ========================================================================
    // Names
    // ========================================================================

    /// Insert `v`'s current name into its scope, renaming on collision.
    pub(crate) fn register_name(&mut self, v: ValueRef) {
        let Some(scope) = self.scope_of(v) else {
            return;
        };
        let Some(mut name) = self.data_mut(v).name.take() else {
            return;
        };
        let hash = self.symbols_mut(scope).reinsert(&mut name, v);
        let data = self.data_mut(v);
        data.name = Some(name);
        data.name_hash = hash;
    }

    /// Erase `v`'s entry from its scope. The name stays on the value.
    pub(crate) fn unregister_name(&mut self, v: ValueRef) {
        let data = self.data(v);
        if data.name.is_none() {
            return;
        }
        let hash = data.name_hash;
        let Some(scope) = self.scope_of(v) else {
            return;
        };
        let symbols = self.symbols_mut(scope);
        if symbols.lookup_hash(hash) == Some(v) {
            symbols.remove(hash);
        }
    }

    fn set_floating_name(&mut self, v: ValueRef, name: &str) {
        if name.is_empty() {
            return;
        }
        let data = self.data_mut(v);
        data.name = Some(name.to_owned());
        data.name_hash = name_hash(name);
    }

    /// Rename `v`. An empty name clears it.
    ///
    /// Attached values are registered in their scope and may come out with a
    /// uniquing suffix; read the final name back with [`IrContext::name`].
    pub fn set_name(&mut self, v: ValueRef, name: &str) {
        let kind = self.kind(v);
        if matches!(kind, ValueKind::Constant | ValueKind::MetadataAsValue) {
            self.violation(InvariantViolation::UnnameableValue { value: v, kind });
        }
        self.unregister_name(v);
        let data = self.data_mut(v);
        data.name = None;
        data.name_hash = 0;
        self.set_floating_name(v, name);
        self.register_name(v);
    }

    /// Remove and return `v`'s name.
    pub fn take_name(&mut self, v: ValueRef) -> Option<String> {
        self.unregister_name(v);
        let data = self.data_mut(v);
        data.name_hash = 0;
        data.name.take()
    }

    pub fn value_by_name(&self, scope: Scope, name: &str) -> Option<ValueRef> {
        self.symbols(scope).lookup(name)
    }

    pub fn scope_symbols(&self, scope: Scope) -> &SymbolTable {
        self.symbols(scope)
    }

    fn check_scope_teardown(&self, scope: Scope) {
        let symbols = self.symbols(scope);
        if symbols.is_empty() {
            return;
        }
        let label = self.scope_label(scope);
        let residual = symbols.values();
        if !self.config.verify_scope_teardown {
            debug!(scope = %label, residual = residual.len(), "scope torn down with symbols");
            return;
        }
        for &v in &residual {
            match self.values.get(v).and_then(Option::as_ref) {
                Some(data) => error!(
                    scope = %label,
                    value = %v,
                    kind = %data.kind(),
                    ty = %self.types.display(data.ty),
                    name = data.name.as_deref().unwrap_or(""),
                    "symbol left in scope at teardown"
                ),
                None => error!(scope = %label, value = %v, "destroyed value left in scope at teardown"),
            }
        }
        self.violation(InvariantViolation::ScopeLeak {
            scope: label,
            residual: residual.len(),
        })
    }

    // ========================================================================
    // Modules
    // ========================================================================

    pub fn create_module(&mut self, name: &str) -> ModuleRef {
        let m = self.modules.push(Some(ModuleData {
            name: name.to_owned(),
            functions: Vec::new(),
            globals: Vec::new(),
            symbols: SymbolTable::new(self.config.name_separator.clone()),
            named_metadata: Vec::new(),
        }));
        debug!(module = %m, name, "created module");
        m
    }

    pub fn module_name(&self, m: ModuleRef) -> &str {
        &self.module_data(m).name
    }

    pub fn module_functions(&self, m: ModuleRef) -> &[ValueRef] {
        &self.module_data(m).functions
    }

    pub fn module_globals(&self, m: ModuleRef) -> &[ValueRef] {
        &self.module_data(m).globals
    }

    /// Live modules, in creation order.
    pub fn modules(&self) -> impl Iterator<Item = ModuleRef> + '_ {
        self.modules
            .iter()
            .filter(|(_, data)| data.is_some())
            .map(|(m, _)| m)
    }

    /// Erase a module with all of its functions, globals and named metadata.
    ///
    /// References between members of the module are dropped first. Uses
    /// from outside the module are still a violation.
    pub fn erase_module(&mut self, m: ModuleRef) {
        let functions = self.module_functions(m).to_vec();
        let globals = self.module_globals(m).to_vec();
        debug!(module = %m, functions = functions.len(), globals = globals.len(), "erase module");

        let mut members: Vec<ValueRef> = globals.clone();
        let mut inside: FxHashSet<ValueRef> = globals.iter().copied().collect();
        for &f in &functions {
            members.push(f);
            self.collect_function_members(f, &mut members, &mut inside);
        }
        self.check_erasable(&members, &inside);

        for &f in &functions {
            self.drop_body_references(f);
        }
        for &g in &globals {
            self.drop_references_raw(g);
        }
        for f in functions {
            self.erase_function(f);
        }
        for g in globals {
            self.erase_global(g);
        }
        let names: Vec<String> = self
            .named_metadata_names(m)
            .into_iter()
            .map(str::to_owned)
            .collect();
        for name in names {
            self.erase_named_metadata(m, &name);
        }

        self.check_scope_teardown(Scope::Module(m));
        self.modules[m] = None;
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Create a function of type `fn_ty` at the end of module `m`, with one
    /// argument per parameter.
    pub fn create_function(&mut self, m: ModuleRef, name: &str, fn_ty: TypeRef) -> ValueRef {
        let Some(params) = self.types.function_params(fn_ty).map(<[TypeRef]>::to_vec) else {
            self.violation(InvariantViolation::NotAFunctionType { ty: fn_ty });
        };
        let symbols = SymbolTable::new(self.config.name_separator.clone());
        let f = self.push_value(ValueData::new(
            fn_ty,
            ValueNode::Function {
                module: None,
                args: Vec::new(),
                blocks: Vec::new(),
                symbols,
            },
        ));
        let args: Vec<ValueRef> = params
            .into_iter()
            .enumerate()
            .map(|(index, ty)| {
                self.push_value(ValueData::new(
                    ty,
                    ValueNode::Argument {
                        function: f,
                        index: index as u32,
                    },
                ))
            })
            .collect();
        if let ValueNode::Function { args: slot, .. } = &mut self.data_mut(f).node {
            *slot = args;
        }
        self.set_floating_name(f, name);
        self.append_function(m, f);
        f
    }

    pub fn function_args(&self, f: ValueRef) -> &[ValueRef] {
        match &self.data(f).node {
            ValueNode::Function { args, .. } => args,
            _ => self.wrong_kind(f, ValueKind::Function),
        }
    }

    pub fn function_blocks(&self, f: ValueRef) -> &[ValueRef] {
        match &self.data(f).node {
            ValueNode::Function { blocks, .. } => blocks,
            _ => self.wrong_kind(f, ValueKind::Function),
        }
    }

    pub fn entry_block(&self, f: ValueRef) -> Option<ValueRef> {
        self.function_blocks(f).first().copied()
    }

    pub fn function_module(&self, f: ValueRef) -> Option<ModuleRef> {
        match &self.data(f).node {
            ValueNode::Function { module, .. } => *module,
            _ => self.wrong_kind(f, ValueKind::Function),
        }
    }

    /// Function an argument belongs to, and its position.
    pub fn argument_parent(&self, arg: ValueRef) -> (ValueRef, u32) {
        match self.data(arg).node {
            ValueNode::Argument { function, index } => (function, index),
            _ => self.wrong_kind(arg, ValueKind::Argument),
        }
    }

    fn function_blocks_mut(&mut self, f: ValueRef) -> &mut Vec<ValueRef> {
        let expected = ValueKind::Function;
        if self.kind(f) != expected {
            self.wrong_kind(f, expected);
        }
        match &mut self.data_mut(f).node {
            ValueNode::Function { blocks, .. } => blocks,
            _ => unreachable!("kind checked above"),
        }
    }

    fn set_function_module(&mut self, f: ValueRef, m: Option<ModuleRef>) {
        if let ValueNode::Function { module, .. } = &mut self.data_mut(f).node {
            *module = m;
        }
    }

    /// Attach a detached function at the end of module `m`.
    pub fn append_function(&mut self, m: ModuleRef, f: ValueRef) {
        self.module_data(m);
        if self.function_module(f).is_some() {
            self.violation(InvariantViolation::AlreadyOwned { value: f });
        }
        self.set_function_module(f, Some(m));
        self.module_data_mut(m).functions.push(f);
        self.register_name(f);
        debug!(function = %f, module = %m, "function attached");
    }

    /// Detach `f` from its module. Uses of `f` are left alone.
    pub fn remove_function(&mut self, f: ValueRef) {
        let Some(m) = self.function_module(f) else {
            self.violation(InvariantViolation::NotOwned { value: f });
        };
        self.unregister_name(f);
        self.module_data_mut(m).functions.retain(|&x| x != f);
        self.set_function_module(f, None);
    }

    /// Move `f` to the end of module `m`, re-registering its name there.
    pub fn move_function_to(&mut self, f: ValueRef, m: ModuleRef) {
        match self.function_module(f) {
            Some(current) if current == m => {
                let functions = &mut self.module_data_mut(m).functions;
                functions.retain(|&x| x != f);
                functions.push(f);
            }
            Some(_) => {
                self.remove_function(f);
                self.append_function(m, f);
            }
            None => self.append_function(m, f),
        }
    }

    fn drop_body_references(&mut self, f: ValueRef) {
        for b in self.function_blocks(f).to_vec() {
            for i in self.block_instructions(b).to_vec() {
                self.drop_references_raw(i);
            }
        }
    }

    /// Push the arguments, blocks and instructions of `f` onto `members`,
    /// and its instructions onto `inside`.
    fn collect_function_members(
        &self,
        f: ValueRef,
        members: &mut Vec<ValueRef>,
        inside: &mut FxHashSet<ValueRef>,
    ) {
        members.extend_from_slice(self.function_args(f));
        for &b in self.function_blocks(f) {
            members.push(b);
            let insts = self.block_instructions(b);
            members.extend_from_slice(insts);
            inside.extend(insts.iter().copied());
        }
    }

    /// Users of `v` that erasing it cannot clean up on its own. Users in
    /// `inside` go away together with `v`.
    fn blocking_uses(&self, v: ValueRef, inside: &FxHashSet<ValueRef>) -> usize {
        let reject = self.config.block_address_policy == BlockAddressPolicy::Reject;
        self.users(v)
            .into_iter()
            .filter(|u| !inside.contains(u))
            .filter(|&u| reject || !self.is_block_address(u))
            .count()
    }

    /// Raise a violation, before anything is mutated, if erasing `members`
    /// would leave a use behind.
    fn check_erasable(&self, members: &[ValueRef], inside: &FxHashSet<ValueRef>) {
        for &v in members {
            let uses = self.blocking_uses(v, inside);
            if uses > 0 {
                self.violation(InvariantViolation::DestroyWithUses {
                    value: v,
                    kind: self.kind(v),
                    uses,
                });
            }
        }
    }

    /// Erase a function with its blocks and arguments.
    ///
    /// References made from inside the body do not count, so a recursive
    /// function can be erased. Uses from outside the function (or rejected
    /// block addresses) are violations, raised before anything changes.
    pub fn erase_function(&mut self, f: ValueRef) {
        self.expect_kind(f, ValueKind::Function);
        let mut members = vec![f];
        let mut inside = FxHashSet::default();
        self.collect_function_members(f, &mut members, &mut inside);
        self.check_erasable(&members, &inside);

        if self.function_module(f).is_some() {
            self.remove_function(f);
        }

        self.drop_body_references(f);
        let blocks = self.function_blocks(f).to_vec();
        debug!(function = %f, blocks = blocks.len(), "erase function");
        for b in blocks {
            self.erase_block(b);
        }
        for arg in self.function_args(f).to_vec() {
            self.destroy_value(arg);
        }

        self.check_scope_teardown(Scope::Function(f));
        self.destroy_value(f);
    }

    // ========================================================================
    // Global variables
    // ========================================================================

    /// Create a global variable at the end of module `m`. Operand 0 holds
    /// the initializer.
    pub fn create_global(
        &mut self,
        m: ModuleRef,
        name: &str,
        ty: TypeRef,
        init: Option<ValueRef>,
    ) -> ValueRef {
        let g = self.push_value(ValueData::new(
            ty,
            ValueNode::GlobalVariable { module: None },
        ));
        self.add_operand(g, init);
        self.set_floating_name(g, name);
        self.append_global(m, g);
        g
    }

    pub fn initializer(&self, g: ValueRef) -> Option<ValueRef> {
        self.expect_kind(g, ValueKind::GlobalVariable);
        self.operand(g, 0)
    }

    pub fn set_initializer(&mut self, g: ValueRef, init: Option<ValueRef>) {
        self.expect_kind(g, ValueKind::GlobalVariable);
        self.set_operand_raw(g, 0, init);
    }

    pub fn global_module(&self, g: ValueRef) -> Option<ModuleRef> {
        match self.data(g).node {
            ValueNode::GlobalVariable { module } => module,
            _ => self.wrong_kind(g, ValueKind::GlobalVariable),
        }
    }

    fn set_global_module(&mut self, g: ValueRef, m: Option<ModuleRef>) {
        if let ValueNode::GlobalVariable { module } = &mut self.data_mut(g).node {
            *module = m;
        }
    }

    pub fn append_global(&mut self, m: ModuleRef, g: ValueRef) {
        self.module_data(m);
        if self.global_module(g).is_some() {
            self.violation(InvariantViolation::AlreadyOwned { value: g });
        }
        self.set_global_module(g, Some(m));
        self.module_data_mut(m).globals.push(g);
        self.register_name(g);
    }

    pub fn remove_global(&mut self, g: ValueRef) {
        let Some(m) = self.global_module(g) else {
            self.violation(InvariantViolation::NotOwned { value: g });
        };
        self.unregister_name(g);
        self.module_data_mut(m).globals.retain(|&x| x != g);
        self.set_global_module(g, None);
    }

    pub fn move_global_to(&mut self, g: ValueRef, m: ModuleRef) {
        if self.global_module(g).is_some() {
            self.remove_global(g);
        }
        self.append_global(m, g);
    }

    pub fn erase_global(&mut self, g: ValueRef) {
        self.expect_kind(g, ValueKind::GlobalVariable);
        let uses = self.num_uses(g);
        if uses > 0 {
            self.violation(InvariantViolation::DestroyWithUses {
                value: g,
                kind: ValueKind::GlobalVariable,
                uses,
            });
        }
        if self.global_module(g).is_some() {
            self.remove_global(g);
        }
        self.destroy_value(g);
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    /// Create a block at the end of function `f`.
    pub fn create_block(&mut self, f: ValueRef, name: &str) -> ValueRef {
        let b = self.create_detached_block(name);
        self.append_block(f, b);
        b
    }

    /// Create a block that belongs to no function yet.
    pub fn create_detached_block(&mut self, name: &str) -> ValueRef {
        let label = self.types.label();
        let b = self.push_value(ValueData::new(
            label,
            ValueNode::BasicBlock {
                function: None,
                insts: Vec::new(),
            },
        ));
        self.set_floating_name(b, name);
        b
    }

    pub fn block_parent(&self, b: ValueRef) -> Option<ValueRef> {
        match self.data(b).node {
            ValueNode::BasicBlock { function, .. } => function,
            _ => self.wrong_kind(b, ValueKind::BasicBlock),
        }
    }

    pub fn block_instructions(&self, b: ValueRef) -> &[ValueRef] {
        match &self.data(b).node {
            ValueNode::BasicBlock { insts, .. } => insts,
            _ => self.wrong_kind(b, ValueKind::BasicBlock),
        }
    }

    fn block_instructions_mut(&mut self, b: ValueRef) -> &mut Vec<ValueRef> {
        let expected = ValueKind::BasicBlock;
        if self.kind(b) != expected {
            self.wrong_kind(b, expected);
        }
        match &mut self.data_mut(b).node {
            ValueNode::BasicBlock { insts, .. } => insts,
            _ => unreachable!("kind checked above"),
        }
    }

    fn set_block_parent(&mut self, b: ValueRef, f: Option<ValueRef>) {
        if let ValueNode::BasicBlock { function, .. } = &mut self.data_mut(b).node {
            *function = f;
        }
    }

    fn insert_block_at(&mut self, f: ValueRef, b: ValueRef, anchor: Option<ValueRef>) {
        self.expect_kind(f, ValueKind::Function);
        if self.block_parent(b).is_some() {
            self.violation(InvariantViolation::AlreadyOwned { value: b });
        }
        self.set_block_parent(b, Some(f));
        let blocks = self.function_blocks_mut(f);
        let pos = anchor
            .and_then(|a| blocks.iter().position(|&x| x == a))
            .unwrap_or(blocks.len());
        blocks.insert(pos, b);

        self.register_name(b);
        for inst in self.block_instructions(b).to_vec() {
            self.register_name(inst);
        }
        debug!(block = %b, function = %f, "block attached");
    }

    /// Attach a detached block at the end of `f`.
    pub fn append_block(&mut self, f: ValueRef, b: ValueRef) {
        self.insert_block_at(f, b, None);
    }

    /// Attach a detached block right before `anchor`.
    pub fn insert_block_before(&mut self, b: ValueRef, anchor: ValueRef) {
        if b == anchor {
            self.violation(InvariantViolation::SelfAnchor { value: b });
        }
        let Some(f) = self.block_parent(anchor) else {
            self.violation(InvariantViolation::NotOwned { value: anchor });
        };
        self.insert_block_at(f, b, Some(anchor));
    }

    /// Detach `b` from its function. The block and every instruction in it
    /// leave the function's scope; uses are left alone.
    pub fn remove_block(&mut self, b: ValueRef) {
        let Some(f) = self.block_parent(b) else {
            self.violation(InvariantViolation::NotOwned { value: b });
        };
        for inst in self.block_instructions(b).to_vec() {
            self.unregister_name(inst);
        }
        self.unregister_name(b);
        self.function_blocks_mut(f).retain(|&x| x != b);
        self.set_block_parent(b, None);
    }

    /// Move `b` right before `anchor`, possibly into another function.
    pub fn move_block_before(&mut self, b: ValueRef, anchor: ValueRef) {
        if b == anchor {
            self.violation(InvariantViolation::SelfAnchor { value: b });
        }
        let Some(target) = self.block_parent(anchor) else {
            self.violation(InvariantViolation::NotOwned { value: anchor });
        };
        match self.block_parent(b) {
            Some(current) if current == target => {
                let blocks = self.function_blocks_mut(target);
                blocks.retain(|&x| x != b);
                let pos = blocks
                    .iter()
                    .position(|&x| x == anchor)
                    .unwrap_or(blocks.len());
                blocks.insert(pos, b);
            }
            Some(_) => {
                self.remove_block(b);
                self.insert_block_at(target, b, Some(anchor));
            }
            None => self.insert_block_at(target, b, Some(anchor)),
        }
    }

    /// Move `b` to the end of `f`, possibly from another function.
    pub fn move_block_to(&mut self, b: ValueRef, f: ValueRef) {
        match self.block_parent(b) {
            Some(current) if current == f => {
                let blocks = self.function_blocks_mut(f);
                blocks.retain(|&x| x != b);
                blocks.push(b);
            }
            Some(_) => {
                self.remove_block(b);
                self.append_block(f, b);
            }
            None => self.append_block(f, b),
        }
    }

    /// Erase `b` and its instructions.
    ///
    /// Block-address constants that still point at `b` are handled per
    /// [`BlockAddressPolicy`]. Uses made by the block's own instructions
    /// (a branch back to `b`, say) are dropped with it. Any other use of `b`
    /// or of one of its instructions is a violation, raised before anything
    /// changes.
    pub fn erase_block(&mut self, b: ValueRef) {
        self.expect_kind(b, ValueKind::BasicBlock);
        let mut members = vec![b];
        members.extend_from_slice(self.block_instructions(b));
        let inside: FxHashSet<ValueRef> = members[1..].iter().copied().collect();
        self.check_erasable(&members, &inside);

        self.nullify_block_addresses(b);
        if self.block_parent(b).is_some() {
            self.remove_block(b);
        }

        let insts = std::mem::take(self.block_instructions_mut(b));
        for &i in &insts {
            self.drop_references_raw(i);
        }
        for i in insts {
            self.destroy_value(i);
        }
        self.destroy_value(b);
    }

    fn nullify_block_addresses(&mut self, b: ValueRef) {
        let mut addrs: Vec<ValueRef> = self
            .users(b)
            .into_iter()
            .filter(|&u| self.is_block_address(u))
            .collect();
        addrs.dedup();
        for c in addrs {
            let ty = self.ty(c);
            let null = self.const_null(ty);
            let replaced = self.num_uses(c);
            self.replace_all_uses_with(c, null);
            self.destroy_value(c);
            debug!(block = %b, constant = %c, replaced, "block address replaced with null");
        }
    }

    // ========================================================================
    // Instructions
    // ========================================================================

    pub(crate) fn create_instruction(
        &mut self,
        opcode: Opcode,
        ty: TypeRef,
        operands: &[Option<ValueRef>],
    ) -> ValueRef {
        let inst = self.push_value(ValueData::new(
            ty,
            ValueNode::Instruction {
                block: None,
                opcode,
            },
        ));
        for &operand in operands {
            self.add_operand(inst, operand);
        }
        inst
    }

    pub fn opcode(&self, i: ValueRef) -> Opcode {
        match self.data(i).node {
            ValueNode::Instruction { opcode, .. } => opcode,
            _ => self.wrong_kind(i, ValueKind::Instruction),
        }
    }

    pub fn instruction_parent(&self, i: ValueRef) -> Option<ValueRef> {
        match self.data(i).node {
            ValueNode::Instruction { block, .. } => block,
            _ => self.wrong_kind(i, ValueKind::Instruction),
        }
    }

    fn set_instruction_parent(&mut self, i: ValueRef, b: Option<ValueRef>) {
        if let ValueNode::Instruction { block, .. } = &mut self.data_mut(i).node {
            *block = b;
        }
    }

    fn place_instruction(&mut self, b: ValueRef, i: ValueRef, anchor: Option<ValueRef>) {
        self.set_instruction_parent(i, Some(b));
        let insts = self.block_instructions_mut(b);
        let pos = anchor
            .and_then(|a| insts.iter().position(|&x| x == a))
            .unwrap_or(insts.len());
        insts.insert(pos, i);
    }

    fn insert_instruction_at(&mut self, b: ValueRef, i: ValueRef, anchor: Option<ValueRef>) {
        self.expect_kind(b, ValueKind::BasicBlock);
        if self.instruction_parent(i).is_some() {
            self.violation(InvariantViolation::AlreadyOwned { value: i });
        }
        self.place_instruction(b, i, anchor);
        self.register_name(i);
    }

    /// Attach a detached instruction at the end of `b`.
    pub fn append_instruction(&mut self, b: ValueRef, i: ValueRef) {
        self.insert_instruction_at(b, i, None);
    }

    /// Attach a detached instruction right before `anchor`.
    pub fn insert_instruction_before(&mut self, i: ValueRef, anchor: ValueRef) {
        if i == anchor {
            self.violation(InvariantViolation::SelfAnchor { value: i });
        }
        let Some(b) = self.instruction_parent(anchor) else {
            self.violation(InvariantViolation::NotOwned { value: anchor });
        };
        self.insert_instruction_at(b, i, Some(anchor));
    }

    /// Detach `i` from its block. Uses and operands are left alone.
    pub fn remove_instruction(&mut self, i: ValueRef) {
        let Some(b) = self.instruction_parent(i) else {
            self.violation(InvariantViolation::NotOwned { value: i });
        };
        self.unregister_name(i);
        self.block_instructions_mut(b).retain(|&x| x != i);
        self.set_instruction_parent(i, None);
    }

    fn relocate_instruction(&mut self, i: ValueRef, b: ValueRef, anchor: Option<ValueRef>) {
        let current = self.instruction_parent(i);
        let same_scope = match current {
            Some(cb) => {
                let from = self.block_parent(cb);
                from.is_some() && from == self.block_parent(b)
            }
            None => false,
        };
        match current {
            Some(cb) if same_scope => {
                self.block_instructions_mut(cb).retain(|&x| x != i);
                self.place_instruction(b, i, anchor);
            }
            Some(_) => {
                self.remove_instruction(i);
                self.insert_instruction_at(b, i, anchor);
            }
            None => self.insert_instruction_at(b, i, anchor),
        }
    }

    /// Move `i` right before `anchor`, possibly into another function.
    pub fn move_instruction_before(&mut self, i: ValueRef, anchor: ValueRef) {
        if i == anchor {
            self.violation(InvariantViolation::SelfAnchor { value: i });
        }
        let Some(b) = self.instruction_parent(anchor) else {
            self.violation(InvariantViolation::NotOwned { value: anchor });
        };
        self.relocate_instruction(i, b, Some(anchor));
    }

    /// Move `i` to the end of `b`, possibly into another function.
    pub fn move_instruction_to_end(&mut self, i: ValueRef, b: ValueRef) {
        self.expect_kind(b, ValueKind::BasicBlock);
        self.relocate_instruction(i, b, None);
    }

    /// Detach and destroy `i`. It must have no uses.
    pub fn erase_instruction(&mut self, i: ValueRef) {
        self.expect_kind(i, ValueKind::Instruction);
        let uses = self.num_uses(i);
        if uses > 0 {
            self.violation(InvariantViolation::DestroyWithUses {
                value: i,
                kind: ValueKind::Instruction,
                uses,
            });
        }
        if self.instruction_parent(i).is_some() {
            self.remove_instruction(i);
        }
        self.destroy_value(i);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use super::*;
    use crate::builder::InstructionBuilder;
    use crate::config::IrConfig;
    use crate::value::ConstantData;

    const ADD: Opcode = Opcode::new("add");
    const BR: Opcode = Opcode::new("br");

    struct Fixture {
        ctx: IrContext,
        m: ModuleRef,
        i32_ty: TypeRef,
        fn_ty: TypeRef,
    }

    fn fixture() -> Fixture {
        fixture_with(IrConfig::default())
    }

    fn fixture_with(config: IrConfig) -> Fixture {
        let mut ctx = IrContext::with_config(config);
        let m = ctx.create_module("m");
        let i32_ty = ctx.types.int(32);
        let fn_ty = ctx.types.function(i32_ty, [i32_ty]);
        Fixture {
            ctx,
            m,
            i32_ty,
            fn_ty,
        }
    }

    fn named(ctx: &mut IrContext, b: ValueRef, ty: TypeRef, name: &str) -> ValueRef {
        InstructionBuilder::new(ADD, ty).name(name).append_to(ctx, b)
    }

    #[test]
    fn names_are_registered_in_function_scope() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let bb = ctx.create_block(f, "entry");
        let x = named(&mut ctx, bb, i32_ty, "x");
        let x1 = named(&mut ctx, bb, i32_ty, "x");

        assert_eq!(ctx.name(x1), Some("x.1"));
        assert_eq!(ctx.value_by_name(Scope::Function(f), "x"), Some(x));
        assert_eq!(ctx.value_by_name(Scope::Function(f), "x.1"), Some(x1));
        assert_eq!(ctx.value_by_name(Scope::Function(f), "entry"), Some(bb));
        assert_eq!(ctx.value_by_name(Scope::Module(m), "f"), Some(f));
    }

    #[test]
    fn arguments_share_function_scope() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let arg = ctx.function_args(f)[0];
        ctx.set_name(arg, "a");
        assert_eq!(ctx.argument_parent(arg), (f, 0));
        assert_eq!(ctx.ty(arg), i32_ty);

        let bb = ctx.create_block(f, "a");
        assert_eq!(ctx.name(bb), Some("a.1"));
    }

    #[test]
    fn remove_unregisters_before_detaching() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let bb = ctx.create_block(f, "entry");
        let x = named(&mut ctx, bb, i32_ty, "x");

        ctx.remove_instruction(x);
        assert_eq!(ctx.instruction_parent(x), None);
        assert_eq!(ctx.value_by_name(Scope::Function(f), "x"), None);
        // The value keeps its name while floating.
        assert_eq!(ctx.name(x), Some("x"));

        ctx.append_instruction(bb, x);
        assert_eq!(ctx.value_by_name(Scope::Function(f), "x"), Some(x));
    }

    #[test]
    fn moving_block_between_functions_reregisters_contents() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let g = ctx.create_function(m, "g", fn_ty);
        let bb = ctx.create_block(f, "body");
        let x = named(&mut ctx, bb, i32_ty, "x");
        let g_entry = ctx.create_block(g, "entry");
        named(&mut ctx, g_entry, i32_ty, "x");

        ctx.move_block_to(bb, g);

        assert_eq!(ctx.block_parent(bb), Some(g));
        assert!(ctx.scope_symbols(Scope::Function(f)).is_empty());
        assert_eq!(ctx.name(x), Some("x.1"));
        assert_eq!(ctx.value_by_name(Scope::Function(g), "x.1"), Some(x));
        assert_eq!(ctx.value_by_name(Scope::Function(g), "body"), Some(bb));
        assert_eq!(ctx.function_blocks(g), &[g_entry, bb]);
    }

    #[test]
    fn move_within_function_keeps_names() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let b1 = ctx.create_block(f, "b1");
        let b2 = ctx.create_block(f, "b2");
        let x = named(&mut ctx, b1, i32_ty, "x");
        let y = named(&mut ctx, b2, i32_ty, "y");

        ctx.move_block_before(b2, b1);
        assert_eq!(ctx.function_blocks(f), &[b2, b1]);

        ctx.move_instruction_before(x, y);
        assert_eq!(ctx.block_instructions(b2), &[x, y]);
        assert!(ctx.block_instructions(b1).is_empty());
        assert_eq!(ctx.name(x), Some("x"));
        assert_eq!(ctx.symbols(Scope::Function(f)).last_unique(), 0);
    }

    #[test]
    fn moving_instruction_across_functions_renames_on_collision() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let g = ctx.create_function(m, "g", fn_ty);
        let fb = ctx.create_block(f, "entry");
        let gb = ctx.create_block(g, "entry");
        let x = named(&mut ctx, fb, i32_ty, "v");
        named(&mut ctx, gb, i32_ty, "v");

        ctx.move_instruction_to_end(x, gb);
        assert_eq!(ctx.name(x), Some("v.1"));
        assert_eq!(ctx.value_by_name(Scope::Function(f), "v"), None);
    }

    #[test]
    fn moving_function_between_modules() {
        let Fixture {
            mut ctx, m, fn_ty, ..
        } = fixture();
        let other = ctx.create_module("other");
        let f = ctx.create_function(m, "f", fn_ty);
        let taken = ctx.create_function(other, "f", fn_ty);

        ctx.move_function_to(f, other);
        assert_eq!(ctx.function_module(f), Some(other));
        assert_eq!(ctx.name(f), Some("f.1"));
        assert!(ctx.module_functions(m).is_empty());
        assert_eq!(ctx.module_functions(other), &[taken, f]);
    }

    #[test]
    fn insert_block_before_anchor() {
        let Fixture {
            mut ctx, m, fn_ty, ..
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let b1 = ctx.create_block(f, "b1");
        let b0 = ctx.create_detached_block("b0");
        ctx.insert_block_before(b0, b1);
        assert_eq!(ctx.function_blocks(f), &[b0, b1]);
        assert_eq!(ctx.entry_block(f), Some(b0));
    }

    #[test]
    #[should_panic(expected = "already belongs to a container")]
    fn double_insert_panics() {
        let Fixture {
            mut ctx, m, fn_ty, ..
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let bb = ctx.create_block(f, "bb");
        ctx.append_block(f, bb);
    }

    #[test]
    #[should_panic(expected = "cannot move")]
    fn move_before_self_panics() {
        let Fixture {
            mut ctx, m, fn_ty, ..
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let bb = ctx.create_block(f, "bb");
        ctx.move_block_before(bb, bb);
    }

    #[test]
    #[should_panic(expected = "constant")]
    fn naming_constant_panics() {
        let Fixture { mut ctx, i32_ty, .. } = fixture();
        let c = ctx.const_int(i32_ty, 3);
        ctx.set_name(c, "three");
    }

    #[test]
    #[should_panic(expected = "is not a function type")]
    fn function_needs_function_type() {
        let Fixture {
            mut ctx, m, i32_ty, ..
        } = fixture();
        ctx.create_function(m, "f", i32_ty);
    }

    #[test]
    fn take_and_clear_name() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let bb = ctx.create_block(f, "entry");
        let x = named(&mut ctx, bb, i32_ty, "x");

        assert_eq!(ctx.take_name(x), Some("x".to_owned()));
        assert_eq!(ctx.name_hash(x), 0);
        assert_eq!(ctx.value_by_name(Scope::Function(f), "x"), None);

        ctx.set_name(bb, "");
        assert_eq!(ctx.name(bb), None);
        assert!(ctx.scope_symbols(Scope::Function(f)).is_empty());
    }

    #[test]
    fn erase_instruction_releases_operands() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let bb = ctx.create_block(f, "entry");
        let arg = ctx.function_args(f)[0];
        let x = InstructionBuilder::new(ADD, i32_ty)
            .operands([arg, arg])
            .name("x")
            .append_to(&mut ctx, bb);

        ctx.erase_instruction(x);
        assert!(!ctx.is_live(x));
        assert!(!ctx.has_uses(arg));
        assert!(ctx.block_instructions(bb).is_empty());
        assert_eq!(ctx.value_by_name(Scope::Function(f), "x"), None);
    }

    #[test]
    #[should_panic(expected = "cannot destroy instruction")]
    fn erase_used_instruction_panics() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let bb = ctx.create_block(f, "entry");
        let x = named(&mut ctx, bb, i32_ty, "x");
        InstructionBuilder::new(ADD, i32_ty)
            .operand(x)
            .append_to(&mut ctx, bb);
        ctx.erase_instruction(x);
    }

    #[test]
    fn erase_block_with_internal_uses() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let bb = ctx.create_block(f, "entry");
        let x = named(&mut ctx, bb, i32_ty, "x");
        let y = InstructionBuilder::new(ADD, i32_ty)
            .operand(x)
            .append_to(&mut ctx, bb);

        ctx.erase_block(bb);
        assert!(!ctx.is_live(bb));
        assert!(!ctx.is_live(x));
        assert!(!ctx.is_live(y));
        assert!(ctx.function_blocks(f).is_empty());
        assert!(ctx.scope_symbols(Scope::Function(f)).is_empty());
    }

    #[test]
    fn erase_self_loop_block() {
        let Fixture {
            mut ctx, m, fn_ty, ..
        } = fixture();
        let void = ctx.types.void();
        let f = ctx.create_function(m, "f", fn_ty);
        let entry = ctx.create_block(f, "entry");
        let lp = ctx.create_block(f, "loop");
        let back = InstructionBuilder::new(BR, void)
            .operand(lp)
            .append_to(&mut ctx, lp);

        ctx.erase_block(lp);
        assert!(!ctx.is_live(lp));
        assert!(!ctx.is_live(back));
        assert_eq!(ctx.function_blocks(f), &[entry]);
        assert_eq!(ctx.value_by_name(Scope::Function(f), "loop"), None);
    }

    #[test]
    fn rejected_block_erase_changes_nothing() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let arg = ctx.function_args(f)[0];
        let b1 = ctx.create_block(f, "b1");
        let b2 = ctx.create_block(f, "b2");
        let addr = ctx.block_address(f, b1);
        let x = InstructionBuilder::new(ADD, i32_ty)
            .operands([arg, arg])
            .name("x")
            .append_to(&mut ctx, b1);
        let y = InstructionBuilder::new(ADD, i32_ty)
            .operand(x)
            .append_to(&mut ctx, b2);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        ctx.set_abort_hook(move |v| sink.borrow_mut().push(v.clone()));
        let result = catch_unwind(AssertUnwindSafe(|| ctx.erase_block(b1)));
        assert!(result.is_err());
        assert_eq!(
            *seen.borrow(),
            vec![InvariantViolation::DestroyWithUses {
                value: x,
                kind: ValueKind::Instruction,
                uses: 1,
            }]
        );

        assert!(ctx.is_live(b1));
        assert!(ctx.is_live(addr));
        assert_eq!(ctx.function_blocks(f), &[b1, b2]);
        assert_eq!(ctx.block_instructions(b1), &[x]);
        assert_eq!(ctx.operands(x), vec![Some(arg), Some(arg)]);
        assert_eq!(ctx.value_by_name(Scope::Function(f), "x"), Some(x));
        assert_eq!(ctx.users(x), vec![y]);
        let report = crate::verify::verify_context(&ctx);
        assert!(report.is_ok(), "{report}");
    }

    #[test]
    fn erase_address_taken_block_nullifies_constant_users() {
        let Fixture {
            mut ctx, m, fn_ty, ..
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let bb = ctx.create_block(f, "target");
        let addr = ctx.block_address(f, bb);
        let ptr = ctx.types.ptr();
        let g = ctx.create_global(m, "jump", ptr, Some(addr));

        ctx.erase_block(bb);
        assert!(!ctx.is_live(addr));
        let init = ctx.initializer(g).unwrap();
        assert_eq!(ctx.constant_data(init), Some(ConstantData::Null));
        assert_eq!(ctx.ty(init), ptr);
        assert!(!ctx.has_uses(f));
    }

    #[test]
    #[should_panic(expected = "cannot destroy basic block")]
    fn erase_address_taken_block_rejected_by_policy() {
        let Fixture {
            mut ctx, m, fn_ty, ..
        } = fixture_with(IrConfig {
            block_address_policy: BlockAddressPolicy::Reject,
            ..IrConfig::default()
        });
        let f = ctx.create_function(m, "f", fn_ty);
        let bb = ctx.create_block(f, "target");
        ctx.block_address(f, bb);
        ctx.erase_block(bb);
    }

    #[test]
    #[should_panic(expected = "cannot destroy basic block")]
    fn erase_branch_target_panics() {
        let Fixture {
            mut ctx, m, fn_ty, ..
        } = fixture();
        let void = ctx.types.void();
        let f = ctx.create_function(m, "f", fn_ty);
        let entry = ctx.create_block(f, "entry");
        let exit = ctx.create_block(f, "exit");
        InstructionBuilder::new(BR, void)
            .operand(exit)
            .append_to(&mut ctx, entry);
        ctx.erase_block(exit);
    }

    #[test]
    fn erase_function_with_body() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let void = ctx.types.void();
        let f = ctx.create_function(m, "f", fn_ty);
        let arg = ctx.function_args(f)[0];
        ctx.set_name(arg, "a");
        let entry = ctx.create_block(f, "entry");
        let exit = ctx.create_block(f, "exit");
        let x = InstructionBuilder::new(ADD, i32_ty)
            .operands([arg, arg])
            .name("x")
            .append_to(&mut ctx, entry);
        InstructionBuilder::new(BR, void)
            .operand(exit)
            .append_to(&mut ctx, entry);
        InstructionBuilder::new(ADD, i32_ty)
            .operand(x)
            .append_to(&mut ctx, exit);
        ctx.block_address(f, exit);

        ctx.erase_function(f);
        assert!(!ctx.is_live(f));
        assert!(!ctx.is_live(arg));
        assert!(!ctx.is_live(x));
        assert!(ctx.module_functions(m).is_empty());
        assert_eq!(ctx.value_by_name(Scope::Module(m), "f"), None);
    }

    #[test]
    fn erase_recursive_function() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let f = ctx.create_function(m, "f", fn_ty);
        let arg = ctx.function_args(f)[0];
        let entry = ctx.create_block(f, "entry");
        let call = InstructionBuilder::new(Opcode::new("call"), i32_ty)
            .operands([f, arg])
            .append_to(&mut ctx, entry);

        ctx.erase_function(f);
        assert!(!ctx.is_live(f));
        assert!(!ctx.is_live(call));
        assert!(ctx.module_functions(m).is_empty());
    }

    #[test]
    fn rejected_function_erase_keeps_body() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let callee = ctx.create_function(m, "callee", fn_ty);
        let arg = ctx.function_args(callee)[0];
        let body = ctx.create_block(callee, "entry");
        let x = InstructionBuilder::new(ADD, i32_ty)
            .operands([arg, arg])
            .name("x")
            .append_to(&mut ctx, body);
        let caller = ctx.create_function(m, "caller", fn_ty);
        let bb = ctx.create_block(caller, "entry");
        InstructionBuilder::new(Opcode::new("call"), i32_ty)
            .operand(callee)
            .append_to(&mut ctx, bb);

        ctx.set_abort_hook(|_| {});
        let result = catch_unwind(AssertUnwindSafe(|| ctx.erase_function(callee)));
        assert!(result.is_err());
        assert_eq!(ctx.function_module(callee), Some(m));
        assert_eq!(ctx.operands(x), vec![Some(arg), Some(arg)]);
        assert_eq!(ctx.block_parent(body), Some(callee));
        let report = crate::verify::verify_context(&ctx);
        assert!(report.is_ok(), "{report}");
    }

    #[test]
    #[should_panic(expected = "cannot destroy function")]
    fn erase_called_function_panics() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let callee = ctx.create_function(m, "callee", fn_ty);
        let caller = ctx.create_function(m, "caller", fn_ty);
        let bb = ctx.create_block(caller, "entry");
        InstructionBuilder::new(Opcode::new("call"), i32_ty)
            .operand(callee)
            .append_to(&mut ctx, bb);
        ctx.erase_function(callee);
    }

    #[test]
    #[should_panic(expected = "torn down with 1 registered symbol(s)")]
    fn scope_leak_is_reported() {
        let Fixture {
            mut ctx, m, fn_ty, ..
        } = fixture_with(IrConfig {
            verify_scope_teardown: true,
            ..IrConfig::default()
        });
        let f = ctx.create_function(m, "f", fn_ty);
        let stray = ctx.create_detached_block("stray");
        ctx.symbols_mut(Scope::Function(f)).insert_raw(42, stray);
        ctx.erase_function(f);
    }

    #[test]
    fn scope_leak_ignored_when_teardown_verification_is_off() {
        let Fixture {
            mut ctx, m, fn_ty, ..
        } = fixture_with(IrConfig {
            verify_scope_teardown: false,
            ..IrConfig::default()
        });
        let f = ctx.create_function(m, "f", fn_ty);
        let stray = ctx.create_detached_block("stray");
        ctx.symbols_mut(Scope::Function(f)).insert_raw(42, stray);
        ctx.erase_function(f);
        assert!(!ctx.is_live(f));
    }

    #[test]
    fn erase_module_with_cross_references() {
        let Fixture {
            mut ctx,
            m,
            i32_ty,
            fn_ty,
        } = fixture();
        let callee = ctx.create_function(m, "callee", fn_ty);
        let caller = ctx.create_function(m, "caller", fn_ty);
        let bb = ctx.create_block(caller, "entry");
        InstructionBuilder::new(Opcode::new("call"), i32_ty)
            .operand(callee)
            .append_to(&mut ctx, bb);
        let ptr = ctx.types.ptr();
        ctx.create_global(m, "fp", ptr, None);
        let g2 = ctx.create_global(m, "fn_ref", fn_ty, None);
        ctx.set_initializer(g2, Some(callee));
        let md = ctx.md_string("ident");
        ctx.add_named_metadata_operand(m, "llvm.ident", md);

        ctx.erase_module(m);
        assert!(!ctx.is_module_live(m));
        assert!(!ctx.is_live(callee));
        assert!(!ctx.is_live(caller));
        assert_eq!(ctx.modules().count(), 0);
    }

    #[test]
    fn globals_are_registered_in_module_scope() {
        let Fixture {
            mut ctx, m, i32_ty, ..
        } = fixture();
        let zero = ctx.const_int(i32_ty, 0);
        let g = ctx.create_global(m, "counter", i32_ty, Some(zero));
        assert_eq!(ctx.value_by_name(Scope::Module(m), "counter"), Some(g));
        assert_eq!(ctx.initializer(g), Some(zero));
        assert_eq!(ctx.users(zero), vec![g]);

        ctx.set_initializer(g, None);
        assert!(!ctx.has_uses(zero));
        ctx.erase_global(g);
        assert_eq!(ctx.value_by_name(Scope::Module(m), "counter"), None);
    }
}
