//! Structural consistency checks for an `IrContext`.
//!
//! Every mutating method keeps the context consistent on its own, so a
//! non-empty report always points at a bug in this crate. The verifier reads
//! the arenas directly and never panics on the inconsistencies it reports.
//!
//! 1. **Use lists**: every operand edge is owned by the slot that lists it,
//!    every use list is doubly linked, and its length equals the number of
//!    operand slots that point at the value.
//! 2. **Containers**: parent links agree with the child lists, checked from
//!    both ends.
//! 3. **Symbols**: every attached named value is registered in its scope,
//!    and every scope entry belongs to a live member with that name hash.
//! 4. **Metadata**: each tracked location actually holds its target.

use std::fmt;

use derive_more::{Display, Error};
use rustc_hash::FxHashMap;

use crate::context::{HandleSlot, IrContext, Scope};
use crate::metadata::{MdLocation, MetadataNode};
use crate::refs::{MetadataRef, ValueRef};
use crate::value::{ValueData, ValueNode};

// ============================================================================
// Error types
// ============================================================================

#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[display("{user} operand {index} is backed by an edge of {recorded_user} operand {recorded_index}")]
    EdgeOwnerMismatch {
        user: ValueRef,
        index: u32,
        recorded_user: ValueRef,
        recorded_index: u32,
    },

    #[display("{user} operand {index} points at destroyed value {target}")]
    DanglingOperand {
        user: ValueRef,
        index: u32,
        target: ValueRef,
    },

    #[display("use list of {value} holds an edge targeting {target:?}")]
    ForeignEdge {
        value: ValueRef,
        target: Option<ValueRef>,
    },

    #[display("use list of {value} is not properly linked")]
    BrokenLinks { value: ValueRef },

    #[display("{value} lists {listed} use(s) but {actual} operand slot(s) point at it")]
    UseCountMismatch {
        value: ValueRef,
        listed: usize,
        actual: usize,
    },

    #[display("{child} is listed in {container} but its parent link disagrees")]
    ContainerMismatch { container: String, child: ValueRef },

    #[display("{child} names {container} as its parent but is not listed there")]
    UnlistedChild { container: String, child: ValueRef },

    #[display("{value} named {name:?} is not registered in {scope}")]
    UnregisteredName {
        value: ValueRef,
        name: String,
        scope: String,
    },

    #[display("{scope} maps hash {hash:#x} to {value}, which does not own that name")]
    StaleSymbol {
        scope: String,
        hash: u64,
        value: ValueRef,
    },

    #[display("{location} is tracked on {target} but holds {actual:?}")]
    TrackedLocationMismatch {
        location: MdLocation,
        target: MetadataRef,
        actual: Option<MetadataRef>,
    },
}

/// Result of [`verify_context`].
#[derive(Debug, Default)]
pub struct VerificationReport {
    pub errors: Vec<VerifyError>,
}

impl VerificationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "verification passed");
        }
        writeln!(f, "{} error(s) found:", self.errors.len())?;
        for err in &self.errors {
            writeln!(f, "  - {err}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Checks
// ============================================================================

fn live(ctx: &IrContext, v: ValueRef) -> Option<&ValueData> {
    ctx.values.get(v).and_then(Option::as_ref)
}

/// Scope of a value, computed without panicking on stale parents.
fn scope_of(ctx: &IrContext, data: &ValueData) -> Option<Scope> {
    match &data.node {
        ValueNode::Argument { function, .. } => Some(Scope::Function(*function)),
        ValueNode::BasicBlock { function, .. } => function.map(Scope::Function),
        ValueNode::Instruction { block, .. } => {
            let block = live(ctx, (*block)?)?;
            match block.node {
                ValueNode::BasicBlock { function, .. } => function.map(Scope::Function),
                _ => None,
            }
        }
        ValueNode::Function { module, .. } | ValueNode::GlobalVariable { module } => {
            module.map(Scope::Module)
        }
        ValueNode::Constant(_) | ValueNode::MetadataAsValue { .. } => None,
    }
}

fn scope_label(ctx: &IrContext, scope: Scope) -> String {
    match scope {
        Scope::Function(f) => match live(ctx, f).and_then(|d| d.name.as_deref()) {
            Some(name) => format!("function @{name}"),
            None => format!("function {f}"),
        },
        Scope::Module(m) => match ctx.modules.get(m).and_then(Option::as_ref) {
            Some(data) => format!("module {}", data.name),
            None => format!("{m}"),
        },
    }
}

fn check_use_lists(ctx: &IrContext, errors: &mut Vec<VerifyError>) {
    let mut pointed: FxHashMap<ValueRef, usize> = FxHashMap::default();

    for (v, data) in ctx.values.iter() {
        let Some(data) = data else { continue };
        for (index, &u) in data.operands.iter().enumerate() {
            let edge = &ctx.uses[u];
            if edge.user != v || edge.operand_index as usize != index {
                errors.push(VerifyError::EdgeOwnerMismatch {
                    user: v,
                    index: index as u32,
                    recorded_user: edge.user,
                    recorded_index: edge.operand_index,
                });
            }
            if let Some(target) = edge.target {
                if live(ctx, target).is_some() {
                    *pointed.entry(target).or_default() += 1;
                } else {
                    errors.push(VerifyError::DanglingOperand {
                        user: v,
                        index: index as u32,
                        target,
                    });
                }
            }
        }
    }

    for (v, data) in ctx.values.iter() {
        let Some(data) = data else { continue };
        let mut listed = 0;
        let mut prev = None;
        let mut cursor = data.first_use;
        while let Some(u) = cursor {
            let edge = &ctx.uses[u];
            if edge.prev != prev || listed > ctx.uses.len() {
                errors.push(VerifyError::BrokenLinks { value: v });
                break;
            }
            if edge.target != Some(v) {
                errors.push(VerifyError::ForeignEdge {
                    value: v,
                    target: edge.target,
                });
            }
            listed += 1;
            prev = Some(u);
            cursor = edge.next;
        }
        let actual = pointed.get(&v).copied().unwrap_or(0);
        if listed != actual {
            errors.push(VerifyError::UseCountMismatch {
                value: v,
                listed,
                actual,
            });
        }
    }
}

fn check_containers(ctx: &IrContext, errors: &mut Vec<VerifyError>) {
    for (m, module) in ctx.modules.iter() {
        let Some(module) = module else { continue };
        let container = format!("module {}", module.name);
        for &member in module.functions.iter().chain(&module.globals) {
            let ok = live(ctx, member).is_some_and(|d| match d.node {
                ValueNode::Function { module, .. } | ValueNode::GlobalVariable { module } => {
                    module == Some(m)
                }
                _ => false,
            });
            if !ok {
                errors.push(VerifyError::ContainerMismatch {
                    container: container.clone(),
                    child: member,
                });
            }
        }
    }

    for (v, data) in ctx.values.iter() {
        let Some(data) = data else { continue };
        match &data.node {
            ValueNode::Function { args, blocks, .. } => {
                let container = scope_label(ctx, Scope::Function(v));
                for &arg in args {
                    let ok = live(ctx, arg).is_some_and(|d| {
                        matches!(d.node, ValueNode::Argument { function, .. } if function == v)
                    });
                    if !ok {
                        errors.push(VerifyError::ContainerMismatch {
                            container: container.clone(),
                            child: arg,
                        });
                    }
                }
                for &b in blocks {
                    let ok = live(ctx, b).is_some_and(|d| {
                        matches!(d.node, ValueNode::BasicBlock { function, .. } if function == Some(v))
                    });
                    if !ok {
                        errors.push(VerifyError::ContainerMismatch {
                            container: container.clone(),
                            child: b,
                        });
                    }
                }
            }
            ValueNode::BasicBlock { insts, .. } => {
                for &i in insts {
                    let ok = live(ctx, i).is_some_and(|d| {
                        matches!(d.node, ValueNode::Instruction { block, .. } if block == Some(v))
                    });
                    if !ok {
                        errors.push(VerifyError::ContainerMismatch {
                            container: format!("block {v}"),
                            child: i,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    for (v, data) in ctx.values.iter() {
        let Some(data) = data else { continue };
        let listed = match &data.node {
            ValueNode::Instruction { block: Some(b), .. } => Some((
                format!("block {b}"),
                live(ctx, *b).is_some_and(|d| {
                    matches!(&d.node, ValueNode::BasicBlock { insts, .. } if insts.contains(&v))
                }),
            )),
            ValueNode::BasicBlock {
                function: Some(f), ..
            } => Some((
                scope_label(ctx, Scope::Function(*f)),
                live(ctx, *f).is_some_and(|d| {
                    matches!(&d.node, ValueNode::Function { blocks, .. } if blocks.contains(&v))
                }),
            )),
            ValueNode::Argument { function, index } => Some((
                scope_label(ctx, Scope::Function(*function)),
                live(ctx, *function).is_some_and(|d| {
                    matches!(&d.node, ValueNode::Function { args, .. }
                        if args.get(*index as usize) == Some(&v))
                }),
            )),
            ValueNode::Function {
                module: Some(m), ..
            } => Some((
                scope_label(ctx, Scope::Module(*m)),
                ctx.modules
                    .get(*m)
                    .and_then(Option::as_ref)
                    .is_some_and(|module| module.functions.contains(&v)),
            )),
            ValueNode::GlobalVariable { module: Some(m) } => Some((
                scope_label(ctx, Scope::Module(*m)),
                ctx.modules
                    .get(*m)
                    .and_then(Option::as_ref)
                    .is_some_and(|module| module.globals.contains(&v)),
            )),
            _ => None,
        };
        if let Some((container, false)) = listed {
            errors.push(VerifyError::UnlistedChild {
                container,
                child: v,
            });
        }
    }
}

fn check_symbols(ctx: &IrContext, errors: &mut Vec<VerifyError>) {
    let mut scopes: Vec<Scope> = Vec::new();
    for (v, data) in ctx.values.iter() {
        let Some(data) = data else { continue };
        if matches!(data.node, ValueNode::Function { .. }) {
            scopes.push(Scope::Function(v));
        }
        let (Some(name), Some(scope)) = (&data.name, scope_of(ctx, data)) else {
            continue;
        };
        let registered = scope_table(ctx, scope)
            .is_some_and(|table| table.lookup_hash(data.name_hash) == Some(v));
        if !registered {
            errors.push(VerifyError::UnregisteredName {
                value: v,
                name: name.clone(),
                scope: scope_label(ctx, scope),
            });
        }
    }
    scopes.extend(
        ctx.modules
            .iter()
            .filter(|(_, data)| data.is_some())
            .map(|(m, _)| Scope::Module(m)),
    );

    for scope in scopes {
        let Some(table) = scope_table(ctx, scope) else {
            continue;
        };
        for (hash, value) in table.iter() {
            let owns = live(ctx, value).is_some_and(|d| {
                d.name.is_some() && d.name_hash == hash && scope_of(ctx, d) == Some(scope)
            });
            if !owns {
                errors.push(VerifyError::StaleSymbol {
                    scope: scope_label(ctx, scope),
                    hash,
                    value,
                });
            }
        }
    }
}

fn scope_table(ctx: &IrContext, scope: Scope) -> Option<&crate::symbol_table::SymbolTable> {
    match scope {
        Scope::Function(f) => match &live(ctx, f)?.node {
            ValueNode::Function { symbols, .. } => Some(symbols),
            _ => None,
        },
        Scope::Module(m) => ctx
            .modules
            .get(m)
            .and_then(Option::as_ref)
            .map(|data| &data.symbols),
    }
}

/// Metadata stored at `location`, read without panicking.
fn stored_at(ctx: &IrContext, location: MdLocation) -> Option<MetadataRef> {
    match location {
        MdLocation::Operand { node, index } => {
            match &ctx.metadata.get(node).and_then(Option::as_ref)?.node {
                MetadataNode::Tuple(ops) => ops.get(index as usize).copied().flatten(),
                _ => None,
            }
        }
        MdLocation::AsValue(wrapper) => match live(ctx, wrapper)?.node {
            ValueNode::MetadataAsValue { metadata } => Some(metadata),
            _ => None,
        },
        MdLocation::Handle(h) => match ctx.handles.get(h)? {
            HandleSlot::Live(target) => *target,
            HandleSlot::Released => None,
        },
        MdLocation::Attachment { value, kind } => live(ctx, value)?
            .attachments
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, md)| *md),
    }
}

fn check_metadata(ctx: &IrContext, errors: &mut Vec<VerifyError>) {
    for (md, data) in ctx.metadata.iter() {
        if data.is_none() || !ctx.tracker.is_replaceable(md) {
            continue;
        }
        for location in ctx.tracker.tracked(md) {
            let actual = stored_at(ctx, location);
            if actual != Some(md) {
                errors.push(VerifyError::TrackedLocationMismatch {
                    location,
                    target: md,
                    actual,
                });
            }
        }
    }
}

/// Run every structural check over `ctx`.
pub fn verify_context(ctx: &IrContext) -> VerificationReport {
    let mut errors = Vec::new();
    check_use_lists(ctx, &mut errors);
    check_containers(ctx, &mut errors);
    check_symbols(ctx, &mut errors);
    check_metadata(ctx, &mut errors);
    VerificationReport { errors }
}
