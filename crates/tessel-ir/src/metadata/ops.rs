//! Metadata construction, editing and retargeting on `IrContext`.

use std::collections::hash_map::Entry;

use tracing::{debug, trace};

use super::{MdLocation, MetadataData, MetadataKind, MetadataNode, NodeKey, Storage};
use crate::context::{HandleSlot, IrContext};
use crate::refs::{HandleRef, MdKindId, MetadataRef, ModuleRef, ValueRef};
use crate::value::{ValueData, ValueKind, ValueNode};
use crate::violation::{InvariantViolation, unsupported};

impl IrContext {
    // ========================================================================
    // Tracking glue
    // ========================================================================

    fn track_location(&mut self, location: MdLocation, target: MetadataRef) {
        if let Err(violation) = self.tracker.track(location, target) {
            self.violation(violation);
        }
    }

    fn retrack_location(&mut self, old: MdLocation, target: MetadataRef, new: MdLocation) {
        if let Err(violation) = self.tracker.retrack(old, target, new) {
            self.violation(violation);
        }
    }

    fn track_operands(&mut self, node: MetadataRef) {
        let ops = self.md_operands(node).to_vec();
        for (index, op) in ops.into_iter().enumerate() {
            if let Some(target) = op {
                self.track_location(operand_location(node, index), target);
            }
        }
    }

    fn untrack_operands(&mut self, node: MetadataRef) {
        let ops = self.md_operands(node).to_vec();
        for (index, op) in ops.into_iter().enumerate() {
            if let Some(target) = op {
                self.tracker.untrack(operand_location(node, index), target);
            }
        }
    }

    // ========================================================================
    // Construction
    // ========================================================================

    fn push_metadata(&mut self, storage: Storage, node: MetadataNode) -> MetadataRef {
        self.metadata.push(Some(MetadataData { storage, node }))
    }

    fn check_operands(&self, ops: &[Option<MetadataRef>]) {
        for &op in ops.iter().flatten() {
            self.md_data(op);
        }
    }

    /// Interned metadata string.
    pub fn md_string(&mut self, s: &str) -> MetadataRef {
        let key = NodeKey::String(s.to_owned());
        if let Some(&existing) = self.md_uniq.get(&key) {
            return existing;
        }
        let md = self.push_metadata(Storage::Uniqued, MetadataNode::String(s.to_owned()));
        self.md_uniq.insert(key, md);
        md
    }

    /// Metadata node wrapping a constant, function or global variable.
    ///
    /// The node is replaceable: replacing or destroying the wrapped value is
    /// reflected in every location that references the node.
    pub fn value_as_metadata(&mut self, v: ValueRef) -> MetadataRef {
        let kind = self.kind(v);
        if !matches!(
            kind,
            ValueKind::Constant | ValueKind::Function | ValueKind::GlobalVariable
        ) {
            unsupported(&format!("metadata wrapping of {kind} values"));
        }
        if let Some(&existing) = self.value_md.get(&v) {
            return existing;
        }
        let md = self.push_metadata(Storage::Uniqued, MetadataNode::Value(v));
        self.md_uniq.insert(NodeKey::Value(v), md);
        self.value_md.insert(v, md);
        self.tracker.make_replaceable(md);
        md
    }

    /// Uniqued tuple. Equal operand lists yield the same node.
    pub fn tuple(&mut self, ops: impl IntoIterator<Item = Option<MetadataRef>>) -> MetadataRef {
        let ops: Vec<Option<MetadataRef>> = ops.into_iter().collect();
        self.check_operands(&ops);
        let key = NodeKey::Tuple(ops.clone());
        if let Some(&existing) = self.md_uniq.get(&key) {
            return existing;
        }
        let md = self.push_metadata(Storage::Uniqued, MetadataNode::Tuple(ops));
        self.md_uniq.insert(key, md);
        self.track_operands(md);
        md
    }

    /// Tuple that is never merged with an equal one.
    pub fn distinct_tuple(
        &mut self,
        ops: impl IntoIterator<Item = Option<MetadataRef>>,
    ) -> MetadataRef {
        let ops: Vec<Option<MetadataRef>> = ops.into_iter().collect();
        self.check_operands(&ops);
        let md = self.push_metadata(Storage::Distinct, MetadataNode::Tuple(ops));
        self.track_operands(md);
        md
    }

    /// Forward-declared tuple. Every reference to it is tracked until it is
    /// replaced, resolved or erased.
    pub fn temporary_tuple(
        &mut self,
        ops: impl IntoIterator<Item = Option<MetadataRef>>,
    ) -> MetadataRef {
        let ops: Vec<Option<MetadataRef>> = ops.into_iter().collect();
        self.check_operands(&ops);
        let md = self.push_metadata(Storage::Temporary, MetadataNode::Tuple(ops));
        self.tracker.make_replaceable(md);
        self.track_operands(md);
        md
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn md_kind(&self, md: MetadataRef) -> MetadataKind {
        self.md_data(md).node.kind()
    }

    pub fn md_storage(&self, md: MetadataRef) -> Storage {
        self.md_data(md).storage
    }

    /// Operands of a tuple node. Empty for strings and value wrappers.
    pub fn md_operands(&self, md: MetadataRef) -> &[Option<MetadataRef>] {
        match &self.md_data(md).node {
            MetadataNode::Tuple(ops) => ops,
            _ => &[],
        }
    }

    pub fn md_string_value(&self, md: MetadataRef) -> Option<&str> {
        match &self.md_data(md).node {
            MetadataNode::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn md_wrapped_value(&self, md: MetadataRef) -> Option<ValueRef> {
        match self.md_data(md).node {
            MetadataNode::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_replaceable(&self, md: MetadataRef) -> bool {
        self.tracker.is_replaceable(md)
    }

    /// Tracked references of `md`, in registration order.
    pub fn tracked_uses(&self, md: MetadataRef) -> Vec<MdLocation> {
        self.tracker.tracked(md)
    }

    pub fn num_tracked_uses(&self, md: MetadataRef) -> usize {
        self.tracker.num_tracked(md)
    }

    /// Metadata currently stored at `location`.
    pub fn md_at(&self, location: MdLocation) -> Option<MetadataRef> {
        match location {
            MdLocation::Operand { node, index } => self
                .md_operands(node)
                .get(index as usize)
                .copied()
                .flatten(),
            MdLocation::AsValue(wrapper) => match self.data(wrapper).node {
                ValueNode::MetadataAsValue { metadata } => Some(metadata),
                _ => None,
            },
            MdLocation::Handle(h) => self.handle_slot(h),
            MdLocation::Attachment { value, kind } => self.metadata(value, kind),
        }
    }

    // ========================================================================
    // Replacement
    // ========================================================================

    /// Point every tracked reference of `old` at `new`.
    ///
    /// Locations are visited in registration order. Tuple operands and
    /// handles are rewritten in place. A `MetadataAsValue` wrapper is
    /// re-pointed, unless a wrapper for `new` already exists, in which case
    /// the old wrapper's value uses move to the existing one and the old
    /// wrapper is destroyed.
    pub fn replace_all_metadata_uses_with(&mut self, old: MetadataRef, new: MetadataRef) {
        if old == new {
            return;
        }
        if !self.tracker.is_replaceable(old) {
            self.violation(InvariantViolation::NotReplaceable { metadata: old });
        }
        self.md_data(new);

        let locations = self.tracker.take_tracked(old);
        debug!(%old, %new, uses = locations.len(), "replace_all_metadata_uses_with");
        for location in locations {
            trace!(%location, "retarget metadata reference");
            match location {
                MdLocation::Operand { node, index } => {
                    self.retarget_operand(node, index as usize, new);
                }
                MdLocation::AsValue(wrapper) => self.retarget_wrapper(wrapper, old, new),
                MdLocation::Handle(h) => {
                    self.handles[h] = HandleSlot::Live(Some(new));
                    self.track_location(location, new);
                }
                MdLocation::Attachment { value, kind } => {
                    let data = self.data_mut(value);
                    if let Some(slot) = data.attachments.iter_mut().find(|(k, _)| *k == kind) {
                        slot.1 = new;
                    }
                    self.track_location(location, new);
                }
            }
        }
    }

    fn retarget_operand(&mut self, node: MetadataRef, index: usize, new: MetadataRef) {
        let old_key = match self.md_data(node).storage {
            Storage::Uniqued => Some(self.md_data(node).node.key()),
            _ => None,
        };
        if let MetadataNode::Tuple(ops) = &mut self.md_data_mut(node).node {
            ops[index] = Some(new);
        }
        self.track_location(operand_location(node, index), new);

        if let Some(old_key) = old_key {
            if self.md_uniq.get(&old_key) == Some(&node) {
                self.md_uniq.remove(&old_key);
            }
            let new_key = self.md_data(node).node.key();
            let collision = match self.md_uniq.entry(new_key) {
                Entry::Vacant(slot) => {
                    slot.insert(node);
                    None
                }
                Entry::Occupied(slot) => Some(*slot.get()),
            };
            if let Some(existing) = collision {
                debug!(%node, %existing, "uniqued node collides after retarget, made distinct");
                self.md_data_mut(node).storage = Storage::Distinct;
            }
        }
    }

    fn retarget_wrapper(&mut self, wrapper: ValueRef, old: MetadataRef, new: MetadataRef) {
        if self.md_as_value.get(&old) == Some(&wrapper) {
            self.md_as_value.remove(&old);
        }
        if let Some(&existing) = self.md_as_value.get(&new) {
            self.replace_all_uses_with(wrapper, existing);
            self.destroy_value(wrapper);
            return;
        }
        if let ValueNode::MetadataAsValue { metadata } = &mut self.data_mut(wrapper).node {
            *metadata = new;
        }
        self.md_as_value.insert(new, wrapper);
        self.track_location(MdLocation::AsValue(wrapper), new);
    }

    fn expect_temporary(&self, md: MetadataRef) {
        if self.md_data(md).storage != Storage::Temporary {
            self.violation(InvariantViolation::NotReplaceable { metadata: md });
        }
    }

    /// Resolve a temporary into a uniqued node.
    ///
    /// If an equal uniqued node already exists every reference moves to it,
    /// the temporary is erased, and the existing node is returned. Otherwise
    /// the temporary itself becomes uniqued.
    pub fn replace_with_uniqued(&mut self, temp: MetadataRef) -> MetadataRef {
        self.expect_temporary(temp);
        let key = self.md_data(temp).node.key();
        if let Some(&existing) = self.md_uniq.get(&key) {
            self.replace_all_metadata_uses_with(temp, existing);
            self.erase_temporary(temp);
            return existing;
        }
        self.md_data_mut(temp).storage = Storage::Uniqued;
        self.md_uniq.insert(key, temp);
        let untracked = self.tracker.resolve(temp);
        debug!(%temp, untracked, "temporary resolved as uniqued");
        temp
    }

    /// Resolve a temporary into a distinct node in place.
    pub fn replace_with_distinct(&mut self, temp: MetadataRef) -> MetadataRef {
        self.expect_temporary(temp);
        self.md_data_mut(temp).storage = Storage::Distinct;
        let untracked = self.tracker.resolve(temp);
        debug!(%temp, untracked, "temporary resolved as distinct");
        temp
    }

    /// Delete a temporary that nothing references any more.
    pub fn erase_temporary(&mut self, temp: MetadataRef) {
        self.expect_temporary(temp);
        let uses = self.tracker.num_tracked(temp);
        if uses > 0 {
            self.violation(InvariantViolation::MetadataStillTracked {
                metadata: temp,
                uses,
            });
        }
        self.untrack_operands(temp);
        self.tracker.resolve(temp);
        self.metadata[temp] = None;
    }

    // ========================================================================
    // Operand editing
    // ========================================================================

    fn expect_editable(&self, node: MetadataRef) -> usize {
        let data = self.md_data(node);
        if data.storage == Storage::Uniqued {
            self.violation(InvariantViolation::ImmutableMetadata { metadata: node });
        }
        match &data.node {
            MetadataNode::Tuple(ops) => ops.len(),
            other => unsupported(&format!("operand edits on {} metadata", other.kind())),
        }
    }

    fn md_operand_out_of_range(&self, node: MetadataRef, index: usize, len: usize) -> ! {
        self.violation(InvariantViolation::MetadataOperandOutOfRange {
            metadata: node,
            index: index as u32,
            len,
        })
    }

    fn tuple_ops_mut(&mut self, node: MetadataRef) -> &mut Vec<Option<MetadataRef>> {
        match &mut self.md_data_mut(node).node {
            MetadataNode::Tuple(ops) => ops,
            _ => unsupported("operand edits on non-tuple metadata"),
        }
    }

    /// Replace operand `index` of a distinct or temporary tuple.
    pub fn set_md_operand(&mut self, node: MetadataRef, index: usize, md: Option<MetadataRef>) {
        let len = self.expect_editable(node);
        if index >= len {
            self.md_operand_out_of_range(node, index, len);
        }
        if let Some(target) = md {
            self.md_data(target);
        }
        let location = operand_location(node, index);
        let old = std::mem::replace(&mut self.tuple_ops_mut(node)[index], md);
        if old == md {
            return;
        }
        if let Some(old) = old {
            self.tracker.untrack(location, old);
        }
        if let Some(new) = md {
            self.track_location(location, new);
        }
    }

    pub fn push_md_operand(&mut self, node: MetadataRef, md: Option<MetadataRef>) {
        let len = self.expect_editable(node);
        self.insert_md_operand(node, len, md);
    }

    /// Insert an operand at `index`, shifting later operands up by one.
    pub fn insert_md_operand(&mut self, node: MetadataRef, index: usize, md: Option<MetadataRef>) {
        let len = self.expect_editable(node);
        if index > len {
            self.md_operand_out_of_range(node, index, len);
        }
        if let Some(target) = md {
            self.md_data(target);
        }
        // Walk from the end so each destination slot is already vacated.
        let ops = self.md_operands(node).to_vec();
        for j in (index..len).rev() {
            if let Some(target) = ops[j] {
                self.retrack_location(
                    operand_location(node, j),
                    target,
                    operand_location(node, j + 1),
                );
            }
        }
        self.tuple_ops_mut(node).insert(index, md);
        if let Some(new) = md {
            self.track_location(operand_location(node, index), new);
        }
    }

    /// Remove operand `index`, shifting later operands down by one.
    pub fn remove_md_operand(&mut self, node: MetadataRef, index: usize) -> Option<MetadataRef> {
        let len = self.expect_editable(node);
        if index >= len {
            self.md_operand_out_of_range(node, index, len);
        }
        let ops = self.md_operands(node).to_vec();
        let removed = ops[index];
        if let Some(target) = removed {
            self.tracker.untrack(operand_location(node, index), target);
        }
        for j in index + 1..len {
            if let Some(target) = ops[j] {
                self.retrack_location(
                    operand_location(node, j),
                    target,
                    operand_location(node, j - 1),
                );
            }
        }
        self.tuple_ops_mut(node).remove(index);
        removed
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// Create a free-standing handle holding `target`.
    pub fn track_handle(&mut self, target: Option<MetadataRef>) -> HandleRef {
        if let Some(target) = target {
            self.md_data(target);
        }
        let h = self.handles.push(HandleSlot::Live(target));
        if let Some(target) = target {
            self.track_location(MdLocation::Handle(h), target);
        }
        h
    }

    pub fn handle_target(&self, h: HandleRef) -> Option<MetadataRef> {
        self.handle_slot(h)
    }

    pub fn reset_handle(&mut self, h: HandleRef, target: Option<MetadataRef>) {
        let old = self.handle_slot(h);
        if old == target {
            return;
        }
        if let Some(target) = target {
            self.md_data(target);
        }
        let location = MdLocation::Handle(h);
        if let Some(old) = old {
            self.tracker.untrack(location, old);
        }
        self.handles[h] = HandleSlot::Live(target);
        if let Some(target) = target {
            self.track_location(location, target);
        }
    }

    /// Move the reference held by `h` into a fresh handle. `h` is left empty.
    pub fn move_handle(&mut self, h: HandleRef) -> HandleRef {
        let target = self.handle_slot(h);
        let moved = self.handles.push(HandleSlot::Live(target));
        self.handles[h] = HandleSlot::Live(None);
        if let Some(target) = target {
            self.retrack_location(MdLocation::Handle(h), target, MdLocation::Handle(moved));
        }
        moved
    }

    /// Drop the handle. Using it afterwards is a violation.
    pub fn release_handle(&mut self, h: HandleRef) {
        if let Some(target) = self.handle_slot(h) {
            self.tracker.untrack(MdLocation::Handle(h), target);
        }
        self.handles[h] = HandleSlot::Released;
    }

    // ========================================================================
    // Metadata as value
    // ========================================================================

    /// The value that wraps `md`, created on first request.
    pub fn metadata_as_value(&mut self, md: MetadataRef) -> ValueRef {
        self.md_data(md);
        if let Some(&existing) = self.md_as_value.get(&md) {
            return existing;
        }
        let ty = self.types.metadata();
        let v = self.push_value(ValueData::new(
            ty,
            ValueNode::MetadataAsValue { metadata: md },
        ));
        self.md_as_value.insert(md, v);
        self.track_location(MdLocation::AsValue(v), md);
        v
    }

    /// Metadata wrapped by a `MetadataAsValue` value.
    pub fn wrapped_metadata(&self, v: ValueRef) -> Option<MetadataRef> {
        match self.data(v).node {
            ValueNode::MetadataAsValue { metadata } => Some(metadata),
            _ => None,
        }
    }

    /// Metadata side of replacing `old` with `new` in the value graph.
    pub(crate) fn value_replaced_in_metadata(&mut self, old: ValueRef, new: ValueRef) {
        let Some(&old_md) = self.value_md.get(&old) else {
            return;
        };
        if let Some(&new_md) = self.value_md.get(&new) {
            self.replace_all_metadata_uses_with(old_md, new_md);
            self.drop_value_metadata(old);
            return;
        }
        self.value_md.remove(&old);
        self.value_md.insert(new, old_md);
        self.md_uniq.remove(&NodeKey::Value(old));
        self.md_uniq.insert(NodeKey::Value(new), old_md);
        self.md_data_mut(old_md).node = MetadataNode::Value(new);
    }

    /// Metadata side of destroying `v`. The wrapping node, if any, must no
    /// longer be referenced.
    pub(crate) fn value_destroyed_in_metadata(&mut self, v: ValueRef) {
        let Some(&md) = self.value_md.get(&v) else {
            return;
        };
        if self.tracker.num_tracked(md) > 0 {
            self.violation(InvariantViolation::DestroyWrappedValue {
                value: v,
                metadata: md,
            });
        }
        self.drop_value_metadata(v);
    }

    fn drop_value_metadata(&mut self, v: ValueRef) {
        if let Some(md) = self.value_md.remove(&v) {
            self.md_uniq.remove(&NodeKey::Value(v));
            self.tracker.resolve(md);
            self.metadata[md] = None;
        }
    }

    // ========================================================================
    // Attachments
    // ========================================================================

    /// Interned attachment kind id for `name`.
    pub fn md_kind_id(&mut self, name: &str) -> MdKindId {
        if let Some(&id) = self.md_kind_ids.get(name) {
            return id;
        }
        let id = self.md_kinds.push(name.to_owned());
        self.md_kind_ids.insert(name.to_owned(), id);
        id
    }

    pub fn md_kind_name(&self, kind: MdKindId) -> &str {
        &self.md_kinds[kind]
    }

    /// Attach `md` to an instruction, function or global under `kind`.
    /// `None` removes the attachment.
    pub fn set_metadata(&mut self, value: ValueRef, kind: MdKindId, md: Option<MetadataRef>) {
        let value_kind = self.kind(value);
        if !matches!(
            value_kind,
            ValueKind::Instruction | ValueKind::Function | ValueKind::GlobalVariable
        ) {
            unsupported(&format!("metadata attachments on {value_kind} values"));
        }
        let old = self.metadata(value, kind);
        if old == md {
            return;
        }
        if let Some(target) = md {
            self.md_data(target);
        }
        let location = MdLocation::Attachment { value, kind };
        if let Some(old) = old {
            self.tracker.untrack(location, old);
        }
        let attachments = &mut self.data_mut(value).attachments;
        match (attachments.iter().position(|(k, _)| *k == kind), md) {
            (Some(pos), Some(new)) => attachments[pos].1 = new,
            (Some(pos), None) => {
                attachments.remove(pos);
            }
            (None, Some(new)) => attachments.push((kind, new)),
            (None, None) => {}
        }
        if let Some(new) = md {
            self.track_location(location, new);
        }
    }

    pub fn metadata(&self, value: ValueRef, kind: MdKindId) -> Option<MetadataRef> {
        self.data(value)
            .attachments
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, md)| *md)
    }

    pub fn attachments(&self, value: ValueRef) -> &[(MdKindId, MetadataRef)] {
        &self.data(value).attachments
    }

    pub(crate) fn clear_attachments(&mut self, value: ValueRef) {
        let attachments = std::mem::take(&mut self.data_mut(value).attachments);
        for (kind, md) in attachments {
            self.tracker
                .untrack(MdLocation::Attachment { value, kind }, md);
        }
    }

    // ========================================================================
    // Named metadata
    // ========================================================================

    /// Append `md` to the module-level named metadata `name`.
    pub fn add_named_metadata_operand(&mut self, module: ModuleRef, name: &str, md: MetadataRef) {
        self.module_data(module);
        let h = self.track_handle(Some(md));
        let named = &mut self.module_data_mut(module).named_metadata;
        match named.iter_mut().find(|(n, _)| n == name) {
            Some((_, handles)) => handles.push(h),
            None => named.push((name.to_owned(), vec![h])),
        }
    }

    pub fn named_metadata(&self, module: ModuleRef, name: &str) -> Vec<MetadataRef> {
        self.module_data(module)
            .named_metadata
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, handles)| {
                handles
                    .iter()
                    .filter_map(|&h| self.handle_slot(h))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn named_metadata_names(&self, module: ModuleRef) -> Vec<&str> {
        self.module_data(module)
            .named_metadata
            .iter()
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn erase_named_metadata(&mut self, module: ModuleRef, name: &str) {
        let named = &mut self.module_data_mut(module).named_metadata;
        let Some(pos) = named.iter().position(|(n, _)| n == name) else {
            return;
        };
        let (_, handles) = named.remove(pos);
        for h in handles {
            self.release_handle(h);
        }
    }
}

fn operand_location(node: MetadataRef, index: usize) -> MdLocation {
    MdLocation::Operand {
        node,
        index: index as u32,
    }
}
