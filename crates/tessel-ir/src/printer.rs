//! Textual dump of modules and functions for debugging and tests.
//!
//! ```text
//! ; module demo
//! @counter = global i32 i32 0
//!
//! define i32 @add(i32 %a, i32 %b) {
//! entry:
//!   %sum = add i32 %a, %b, !dbg !0
//!   ret void %sum
//! }
//!
//! !0 = !{!"add.c", null}
//! ```
//!
//! The format is a diagnostic aid. Nothing parses it back.

use std::collections::{BTreeSet, VecDeque};
use std::fmt::{self, Write};

use crate::context::IrContext;
use crate::metadata::{MetadataKind, Storage};
use crate::refs::{MetadataRef, ModuleRef, ValueRef};
use crate::types::TypeData;
use crate::value::{ConstantData, ValueKind};

// ============================================================================
// Public API
// ============================================================================

/// Print a module: globals, functions, named metadata, and every metadata
/// node reachable from them.
pub fn print_module(ctx: &IrContext, m: ModuleRef) -> String {
    let mut out = String::new();
    write_module(ctx, &mut out, m).expect("fmt::Write to String never fails");
    trim_trailing_newlines(out)
}

/// Print a single function definition or declaration.
pub fn print_function(ctx: &IrContext, f: ValueRef) -> String {
    let mut out = String::new();
    write_function(ctx, &mut out, f).expect("fmt::Write to String never fails");
    trim_trailing_newlines(out)
}

fn trim_trailing_newlines(mut out: String) -> String {
    out.truncate(out.trim_end().len());
    out
}

// ============================================================================
// Values
// ============================================================================

fn write_name(ctx: &IrContext, f: &mut impl Write, sigil: char, v: ValueRef) -> fmt::Result {
    match ctx.name(v) {
        Some(name) => write!(f, "{sigil}{name}"),
        None => write!(f, "{sigil}{v}"),
    }
}

fn write_operand(ctx: &IrContext, f: &mut impl Write, v: ValueRef) -> fmt::Result {
    match ctx.kind(v) {
        ValueKind::Function | ValueKind::GlobalVariable => write_name(ctx, f, '@', v),
        ValueKind::Argument | ValueKind::Instruction => write_name(ctx, f, '%', v),
        ValueKind::BasicBlock => {
            f.write_str("label ")?;
            write_name(ctx, f, '%', v)
        }
        ValueKind::MetadataAsValue => match ctx.wrapped_metadata(v) {
            Some(md) => write!(f, "metadata {md}"),
            None => f.write_str("metadata ?"),
        },
        ValueKind::Constant => write_constant(ctx, f, v),
    }
}

fn write_constant(ctx: &IrContext, f: &mut impl Write, c: ValueRef) -> fmt::Result {
    let ty = ctx.types.display(ctx.ty(c));
    match ctx.constant_data(c) {
        Some(ConstantData::Int(value)) => write!(f, "{ty} {value}"),
        Some(ConstantData::Null) => write!(f, "{ty} null"),
        Some(ConstantData::Undef) => write!(f, "{ty} undef"),
        Some(ConstantData::BlockAddress) => {
            f.write_str("blockaddress(")?;
            write_slot(ctx, f, ctx.operand(c, 0))?;
            f.write_str(", ")?;
            match ctx.operand(c, 1) {
                Some(block) => write_name(ctx, f, '%', block)?,
                None => f.write_str("<empty>")?,
            }
            f.write_char(')')
        }
        None => f.write_str("?"),
    }
}

fn write_slot(ctx: &IrContext, f: &mut impl Write, slot: Option<ValueRef>) -> fmt::Result {
    match slot {
        Some(v) => write_operand(ctx, f, v),
        None => f.write_str("<empty>"),
    }
}

fn write_attachments(ctx: &IrContext, f: &mut impl Write, v: ValueRef) -> fmt::Result {
    for &(kind, md) in ctx.attachments(v) {
        write!(f, ", !{} {md}", ctx.md_kind_name(kind))?;
    }
    Ok(())
}

// ============================================================================
// Containers
// ============================================================================

fn write_instruction(ctx: &IrContext, f: &mut impl Write, i: ValueRef) -> fmt::Result {
    f.write_str("  ")?;
    let ty = ctx.ty(i);
    if !matches!(ctx.types.get(ty), TypeData::Void) {
        write_name(ctx, f, '%', i)?;
        f.write_str(" = ")?;
    }
    write!(f, "{} {}", ctx.opcode(i), ctx.types.display(ty))?;
    for (index, slot) in ctx.operands(i).into_iter().enumerate() {
        f.write_str(if index == 0 { " " } else { ", " })?;
        write_slot(ctx, f, slot)?;
    }
    write_attachments(ctx, f, i)?;
    f.write_char('\n')
}

fn write_function(ctx: &IrContext, f: &mut impl Write, func: ValueRef) -> fmt::Result {
    let ret = match ctx.types.get(ctx.ty(func)) {
        TypeData::Function { ret, .. } => *ret,
        _ => ctx.ty(func),
    };
    let blocks = ctx.function_blocks(func);
    let keyword = if blocks.is_empty() { "declare" } else { "define" };
    write!(f, "{keyword} {} ", ctx.types.display(ret))?;
    write_name(ctx, f, '@', func)?;
    f.write_char('(')?;
    for (index, &arg) in ctx.function_args(func).iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{} ", ctx.types.display(ctx.ty(arg)))?;
        write_name(ctx, f, '%', arg)?;
    }
    f.write_char(')')?;
    write_attachments(ctx, f, func)?;
    if blocks.is_empty() {
        return f.write_char('\n');
    }
    f.write_str(" {\n")?;
    for &b in blocks {
        match ctx.name(b) {
            Some(name) => writeln!(f, "{name}:")?,
            None => writeln!(f, "{b}:")?,
        }
        for &i in ctx.block_instructions(b) {
            write_instruction(ctx, f, i)?;
        }
    }
    f.write_str("}\n")
}

fn write_global(ctx: &IrContext, f: &mut impl Write, g: ValueRef) -> fmt::Result {
    write_name(ctx, f, '@', g)?;
    let ty = ctx.types.display(ctx.ty(g));
    match ctx.initializer(g) {
        Some(init) => {
            write!(f, " = global {ty} ")?;
            write_operand(ctx, f, init)?;
        }
        None => write!(f, " = external global {ty}")?,
    }
    write_attachments(ctx, f, g)?;
    f.write_char('\n')
}

fn write_module(ctx: &IrContext, f: &mut impl Write, m: ModuleRef) -> fmt::Result {
    writeln!(f, "; module {}", ctx.module_name(m))?;
    for &g in ctx.module_globals(m) {
        write_global(ctx, f, g)?;
    }
    for &func in ctx.module_functions(m) {
        f.write_char('\n')?;
        write_function(ctx, f, func)?;
    }

    let names = ctx.named_metadata_names(m);
    if !names.is_empty() {
        f.write_char('\n')?;
    }
    for name in names {
        write!(f, "!{name} = !{{")?;
        for (index, md) in ctx.named_metadata(m, name).into_iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{md}")?;
        }
        f.write_str("}\n")?;
    }

    let reachable = reachable_metadata(ctx, m);
    if !reachable.is_empty() {
        f.write_char('\n')?;
    }
    for md in reachable {
        write_metadata_node(ctx, f, md)?;
    }
    Ok(())
}

// ============================================================================
// Metadata
// ============================================================================

fn reachable_metadata(ctx: &IrContext, m: ModuleRef) -> BTreeSet<MetadataRef> {
    let mut queue: VecDeque<MetadataRef> = VecDeque::new();
    let roots = |v: ValueRef, queue: &mut VecDeque<MetadataRef>| {
        queue.extend(ctx.attachments(v).iter().map(|&(_, md)| md));
    };
    for &g in ctx.module_globals(m) {
        roots(g, &mut queue);
    }
    for &func in ctx.module_functions(m) {
        roots(func, &mut queue);
        for &b in ctx.function_blocks(func) {
            for &i in ctx.block_instructions(b) {
                roots(i, &mut queue);
                for operand in ctx.operands(i).into_iter().flatten() {
                    if ctx.kind(operand) == ValueKind::MetadataAsValue {
                        queue.extend(ctx.wrapped_metadata(operand));
                    }
                }
            }
        }
    }
    for name in ctx.named_metadata_names(m) {
        queue.extend(ctx.named_metadata(m, name));
    }

    let mut seen = BTreeSet::new();
    while let Some(md) = queue.pop_front() {
        if !seen.insert(md) {
            continue;
        }
        queue.extend(ctx.md_operands(md).iter().flatten().copied());
    }
    seen
}

fn write_metadata_node(ctx: &IrContext, f: &mut impl Write, md: MetadataRef) -> fmt::Result {
    write!(f, "{md} = ")?;
    match ctx.md_kind(md) {
        MetadataKind::String => {
            write!(f, "!{:?}", ctx.md_string_value(md).unwrap_or_default())?;
        }
        MetadataKind::Value => {
            f.write_str("value(")?;
            write_slot(ctx, f, ctx.md_wrapped_value(md))?;
            f.write_char(')')?;
        }
        MetadataKind::Tuple => {
            match ctx.md_storage(md) {
                Storage::Uniqued => {}
                Storage::Distinct => f.write_str("distinct ")?,
                Storage::Temporary => f.write_str("temporary ")?,
            }
            f.write_str("!{")?;
            for (index, op) in ctx.md_operands(md).iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                match op {
                    Some(op) => write!(f, "{op}")?,
                    None => f.write_str("null")?,
                }
            }
            f.write_char('}')?;
        }
    }
    f.write_char('\n')
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;
    use crate::builder::InstructionBuilder;
    use crate::value::Opcode;

    const ADD: Opcode = Opcode::new("add");
    const RET: Opcode = Opcode::new("ret");

    fn add_function(ctx: &mut IrContext, m: ModuleRef) -> ValueRef {
        let i32_ty = ctx.types.int(32);
        let void = ctx.types.void();
        let fn_ty = ctx.types.function(i32_ty, [i32_ty, i32_ty]);
        let f = ctx.create_function(m, "add", fn_ty);
        let (a, b) = (ctx.function_args(f)[0], ctx.function_args(f)[1]);
        ctx.set_name(a, "a");
        ctx.set_name(b, "b");
        let entry = ctx.create_block(f, "entry");
        let sum = InstructionBuilder::new(ADD, i32_ty)
            .operands([a, b])
            .name("sum")
            .append_to(ctx, entry);
        InstructionBuilder::new(RET, void)
            .operand(sum)
            .append_to(ctx, entry);
        f
    }

    #[test]
    fn print_simple_function() {
        let mut ctx = IrContext::new();
        let m = ctx.create_module("demo");
        let f = add_function(&mut ctx, m);
        assert_snapshot!(print_function(&ctx, f), @r"
        define i32 @add(i32 %a, i32 %b) {
        entry:
          %sum = add i32 %a, %b
          ret void %sum
        }
        ");
    }

    #[test]
    fn print_declaration_and_unnamed_values() {
        let mut ctx = IrContext::new();
        let m = ctx.create_module("demo");
        let i64_ty = ctx.types.int(64);
        let fn_ty = ctx.types.function(i64_ty, [i64_ty]);
        let f = ctx.create_function(m, "ext", fn_ty);
        assert_snapshot!(print_function(&ctx, f), @"declare i64 @ext(i64 %v1)");
    }

    #[test]
    fn print_module_with_globals_and_metadata() {
        let mut ctx = IrContext::new();
        let m = ctx.create_module("demo");
        let i32_ty = ctx.types.int(32);
        let zero = ctx.const_int(i32_ty, 0);
        ctx.create_global(m, "counter", i32_ty, Some(zero));
        let ptr = ctx.types.ptr();
        ctx.create_global(m, "extern_ptr", ptr, None);

        let f = add_function(&mut ctx, m);
        let file = ctx.md_string("add.c");
        let loc = ctx.tuple([Some(file), None]);
        let dbg = ctx.md_kind_id("dbg");
        let entry = ctx.entry_block(f).unwrap();
        let sum = ctx.block_instructions(entry)[0];
        ctx.set_metadata(sum, dbg, Some(loc));
        let ident = ctx.md_string("tessel");
        ctx.add_named_metadata_operand(m, "ident", ident);

        assert_snapshot!(print_module(&ctx, m), @r#"
        ; module demo
        @counter = global i32 i32 0
        @extern_ptr = external global ptr

        define i32 @add(i32 %a, i32 %b) {
        entry:
          %sum = add i32 %a, %b, !dbg !1
          ret void %sum
        }

        !ident = !{!2}

        !0 = !"add.c"
        !1 = !{!0, null}
        !2 = !"tessel"
        "#);
    }

    #[test]
    fn print_block_address_and_empty_slot() {
        let mut ctx = IrContext::new();
        let m = ctx.create_module("demo");
        let void = ctx.types.void();
        let fn_ty = ctx.types.function(void, []);
        let f = ctx.create_function(m, "f", fn_ty);
        let target = ctx.create_block(f, "target");
        let addr = ctx.block_address(f, target);
        InstructionBuilder::new(Opcode::new("indirectbr"), void)
            .operand(addr)
            .empty_operand()
            .operand(target)
            .append_to(&mut ctx, target);
        assert_snapshot!(print_function(&ctx, f), @r"
        define void @f() {
        target:
          indirectbr void blockaddress(@f, %target), <empty>, label %target
        }
        ");
    }
}
