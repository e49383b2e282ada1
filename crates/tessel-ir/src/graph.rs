//! Def-use graph: operand edges, use lists, and replace-all-uses-with.
//!
//! Each operand slot of a user owns one edge (`UseRef`). An edge that points
//! at a value is linked into that value's use list through `prev`/`next`, so
//! unlinking is O(1). New edges are linked at the head of the list.

use tracing::{debug, trace};

use crate::context::IrContext;
use crate::metadata::MdLocation;
use crate::refs::{UseRef, ValueRef};
use crate::value::{ConstantKey, Use, UseData, ValueKind, ValueNode};
use crate::violation::InvariantViolation;

impl IrContext {
    // ========================================================================
    // Edge storage
    // ========================================================================

    fn alloc_use(&mut self, data: UseData) -> UseRef {
        match self.free_uses.pop() {
            Some(u) => {
                self.uses[u] = data;
                u
            }
            None => self.uses.push(data),
        }
    }

    fn link_use(&mut self, u: UseRef, target: ValueRef) {
        let head = self.data(target).first_use;
        let edge = &mut self.uses[u];
        edge.target = Some(target);
        edge.prev = None;
        edge.next = head;
        if let Some(head) = head {
            self.uses[head].prev = Some(u);
        }
        self.data_mut(target).first_use = Some(u);
    }

    fn unlink_use(&mut self, u: UseRef) {
        let UseData {
            target, prev, next, ..
        } = self.uses[u];
        let Some(target) = target else {
            return;
        };
        match prev {
            Some(prev) => self.uses[prev].next = next,
            None => self.data_mut(target).first_use = next,
        }
        if let Some(next) = next {
            self.uses[next].prev = prev;
        }
        let edge = &mut self.uses[u];
        edge.target = None;
        edge.prev = None;
        edge.next = None;
    }

    /// Append an operand slot to `user` without any kind checks.
    pub(crate) fn add_operand(&mut self, user: ValueRef, target: Option<ValueRef>) -> u32 {
        let index = self.data(user).operands.len() as u32;
        let u = self.alloc_use(UseData {
            user,
            operand_index: index,
            target: None,
            prev: None,
            next: None,
        });
        self.data_mut(user).operands.push(u);
        if let Some(target) = target {
            self.link_use(u, target);
        }
        index
    }

    fn operand_use(&self, user: ValueRef, index: u32) -> UseRef {
        let operands = &self.data(user).operands;
        match operands.get(index as usize) {
            Some(&u) => u,
            None => self.violation(InvariantViolation::OperandOutOfRange {
                user,
                index,
                len: operands.len(),
            }),
        }
    }

    /// Point operand `index` of `user` at `target` without any kind checks.
    pub(crate) fn set_operand_raw(&mut self, user: ValueRef, index: u32, target: Option<ValueRef>) {
        let u = self.operand_use(user, index);
        if self.uses[u].target == target {
            return;
        }
        self.unlink_use(u);
        if let Some(target) = target {
            self.link_use(u, target);
        }
    }

    /// Unlink and release every operand slot of `user`.
    pub(crate) fn clear_operands(&mut self, user: ValueRef) {
        let operands = std::mem::take(&mut self.data_mut(user).operands);
        for u in operands {
            self.unlink_use(u);
            self.free_uses.push(u);
        }
    }

    fn use_refs(&self, v: ValueRef) -> Vec<UseRef> {
        let mut refs = Vec::new();
        let mut cursor = self.data(v).first_use;
        while let Some(u) = cursor {
            refs.push(u);
            cursor = self.uses[u].next;
        }
        refs
    }

    fn check_mutable_operands(&self, user: ValueRef) {
        if self.kind(user) == ValueKind::Constant {
            self.violation(InvariantViolation::ImmutableConstant { value: user });
        }
    }

    // ========================================================================
    // Operands
    // ========================================================================

    /// Point operand `index` of `user` at `target`, or empty the slot.
    ///
    /// The previous target is only unlinked, never destroyed.
    pub fn set_operand(&mut self, user: ValueRef, index: u32, target: Option<ValueRef>) {
        self.check_mutable_operands(user);
        self.set_operand_raw(user, index, target);
    }

    /// Grow an instruction's operand list by one slot. Returns the new index.
    pub fn push_operand(&mut self, user: ValueRef, target: Option<ValueRef>) -> u32 {
        self.check_mutable_operands(user);
        self.expect_kind(user, ValueKind::Instruction);
        self.add_operand(user, target)
    }

    pub fn operand(&self, user: ValueRef, index: u32) -> Option<ValueRef> {
        self.uses[self.operand_use(user, index)].target
    }

    pub fn operands(&self, user: ValueRef) -> Vec<Option<ValueRef>> {
        self.data(user)
            .operands
            .iter()
            .map(|&u| self.uses[u].target)
            .collect()
    }

    pub fn num_operands(&self, user: ValueRef) -> usize {
        self.data(user).operands.len()
    }

    /// Empty every operand slot of `user`. The slots themselves remain.
    pub fn drop_all_references(&mut self, user: ValueRef) {
        self.check_mutable_operands(user);
        self.drop_references_raw(user);
    }

    pub(crate) fn drop_references_raw(&mut self, user: ValueRef) {
        for index in 0..self.num_operands(user) as u32 {
            self.set_operand_raw(user, index, None);
        }
    }

    // ========================================================================
    // Use lists
    // ========================================================================

    /// Every use of `v`, most recently linked first.
    pub fn uses(&self, v: ValueRef) -> Vec<Use> {
        self.use_refs(v)
            .into_iter()
            .map(|u| {
                let edge = &self.uses[u];
                Use {
                    user: edge.user,
                    operand_index: edge.operand_index,
                }
            })
            .collect()
    }

    /// User of each use of `v`. A user that references `v` from several
    /// operand slots appears once per slot.
    pub fn users(&self, v: ValueRef) -> Vec<ValueRef> {
        self.use_refs(v)
            .into_iter()
            .map(|u| self.uses[u].user)
            .collect()
    }

    pub fn num_uses(&self, v: ValueRef) -> usize {
        let mut count = 0;
        let mut cursor = self.data(v).first_use;
        while let Some(u) = cursor {
            count += 1;
            cursor = self.uses[u].next;
        }
        count
    }

    pub fn has_uses(&self, v: ValueRef) -> bool {
        self.data(v).first_use.is_some()
    }

    pub fn has_one_use(&self, v: ValueRef) -> bool {
        self.data(v)
            .first_use
            .is_some_and(|u| self.uses[u].next.is_none())
    }

    // ========================================================================
    // Replacement
    // ========================================================================

    fn check_replacement(&self, old: ValueRef, new: ValueRef) {
        if self.ty(old) != self.ty(new) {
            self.violation(InvariantViolation::TypeMismatch { old, new });
        }
    }

    /// Redirect every use of `old` to `new`.
    ///
    /// The use list is snapshotted before anything changes, so `new` may
    /// itself be a user of `old`. Block-address constants whose operands
    /// change are re-interned afterwards. Metadata wrapping `old` follows it
    /// to `new`.
    pub fn replace_all_uses_with(&mut self, old: ValueRef, new: ValueRef) {
        if old == new {
            return;
        }
        self.check_replacement(old, new);
        let edges = self.use_refs(old);
        let replaced = self.retarget_edges(new, edges);
        debug!(%old, %new, replaced, "replace_all_uses_with");
        self.value_replaced_in_metadata(old, new);
    }

    /// Redirect the uses of `old` accepted by `pred` to `new`. Returns the
    /// number of uses moved.
    pub fn replace_uses_with_if(
        &mut self,
        old: ValueRef,
        new: ValueRef,
        mut pred: impl FnMut(Use) -> bool,
    ) -> usize {
        if old == new {
            return 0;
        }
        self.check_replacement(old, new);
        let edges: Vec<UseRef> = self
            .use_refs(old)
            .into_iter()
            .filter(|&u| {
                let edge = &self.uses[u];
                pred(Use {
                    user: edge.user,
                    operand_index: edge.operand_index,
                })
            })
            .collect();
        let replaced = self.retarget_edges(new, edges);
        debug!(%old, %new, replaced, "replace_uses_with_if");
        replaced
    }

    fn retarget_edges(&mut self, new: ValueRef, edges: Vec<UseRef>) -> usize {
        let mut rekey: Vec<(ValueRef, ConstantKey)> = Vec::new();
        for &u in &edges {
            let user = self.uses[u].user;
            if self.is_block_address(user) && !rekey.iter().any(|(c, _)| *c == user) {
                if let Some(key) = self.constant_key(user) {
                    rekey.push((user, key));
                }
            }
            self.unlink_use(u);
            self.link_use(u, new);
        }
        for (c, old_key) in rekey {
            self.rekey_block_address(c, old_key);
        }
        edges.len()
    }

    /// Re-intern a block-address constant after one of its operands changed.
    /// If an equal constant already exists, `c` is folded into it.
    fn rekey_block_address(&mut self, c: ValueRef, old_key: ConstantKey) {
        if self.constants.get(&old_key) == Some(&c) {
            self.constants.remove(&old_key);
        }
        let Some(new_key) = self.constant_key(c) else {
            return;
        };
        match self.constants.get(&new_key).copied() {
            Some(existing) if existing != c => {
                trace!(%c, %existing, "block address folded into existing constant");
                self.replace_all_uses_with(c, existing);
                self.destroy_value(c);
            }
            _ => {
                self.constants.insert(new_key, c);
            }
        }
    }

    // ========================================================================
    // Destruction
    // ========================================================================

    /// Free `v`. Its use list must be empty.
    ///
    /// Outgoing edges are released, the name is unregistered, and every
    /// metadata location owned by `v` is untracked.
    pub(crate) fn destroy_value(&mut self, v: ValueRef) {
        let kind = self.kind(v);
        let uses = self.num_uses(v);
        if uses > 0 {
            self.violation(InvariantViolation::DestroyWithUses {
                value: v,
                kind,
                uses,
            });
        }
        self.value_destroyed_in_metadata(v);

        if let Some(key) = self.constant_key(v) {
            if self.constants.get(&key) == Some(&v) {
                self.constants.remove(&key);
            }
        }
        self.unregister_name(v);
        self.clear_operands(v);
        self.clear_attachments(v);
        if let ValueNode::MetadataAsValue { metadata } = self.data(v).node {
            self.tracker.untrack(MdLocation::AsValue(v), metadata);
            if self.md_as_value.get(&metadata) == Some(&v) {
                self.md_as_value.remove(&metadata);
            }
        }

        trace!(value = %v, %kind, "destroyed value");
        self.values[v] = None;
    }
}
