use koopa::ir::builder::LocalInstBuilder;

use crate::front::ast::{Block, BlockItem, Expr, LVal, Span, Stmt};
use crate::front::ir::expr_ir::generate_assign_ir;
use crate::front::ir::{GenerateIR, IrContext};
use crate::CompilerError;

// 终结指令之后立刻开一个新的 %seq_k 块。
// 后续语句（可能不可达）落进去，所有块都保持结构良好，
// 分支收尾时总能无条件补 jump。
fn open_sequential_bb(ctx: &mut IrContext) -> Result<(), CompilerError> {
    let label = ctx.labels.next_seq();
    let bb = ctx.new_bb(label)?;
    ctx.set_current_bb(bb);
    Ok(())
}

pub fn generate_return_stmt_ir(
    expr: &Option<Expr>,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    let ret_val = match expr {
        Some(e) => Some(e.generate_ir(ctx)?),
        None => None,
    };
    let ret_inst = ctx.dfg_mut()?.new_value().ret(ret_val);
    ctx.push_inst(ret_inst)?;
    open_sequential_bb(ctx)
}

pub fn generate_assign_stmt_ir(
    lval: &LVal,
    expr: &Expr,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    generate_assign_ir(lval, expr, ctx)?;
    Ok(())
}

pub fn generate_block_stmt_ir(block: &Block, ctx: &mut IrContext) -> Result<(), CompilerError> {
    ctx.symbols.push();
    for item in block {
        match item {
            BlockItem::Decl(decl) => decl.generate_ir(ctx)?,
            BlockItem::Stmt(stmt) => stmt.generate_ir(ctx)?,
        }
    }
    ctx.symbols.pop()
}

pub fn generate_expr_stmt_ir(
    expr: &Option<Expr>,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    if let Some(e) = expr {
        e.generate_ir(ctx)?;
    }
    Ok(())
}

pub fn generate_if_stmt_ir(
    cond: &Expr,
    then_stmt: &Stmt,
    else_stmt: Option<&Stmt>,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    let cond_val = cond.generate_ir(ctx)?;

    let (if_label, else_label) = ctx.labels.next_if();
    let seq_label = ctx.labels.next_seq();
    let then_bb = ctx.new_bb(if_label)?;
    let else_bb = if else_stmt.is_some() {
        Some(ctx.new_bb(else_label)?)
    } else {
        None
    };
    let seq_bb = ctx.new_bb(seq_label)?;

    let br_inst = ctx
        .dfg_mut()?
        .new_value()
        .branch(cond_val, then_bb, else_bb.unwrap_or(seq_bb));
    ctx.push_inst(br_inst)?;

    ctx.set_current_bb(then_bb);
    then_stmt.generate_ir(ctx)?;
    let jump_inst = ctx.dfg_mut()?.new_value().jump(seq_bb);
    ctx.push_inst(jump_inst)?;

    if let (Some(else_s), Some(else_bb)) = (else_stmt, else_bb) {
        ctx.set_current_bb(else_bb);
        else_s.generate_ir(ctx)?;
        let jump_inst = ctx.dfg_mut()?.new_value().jump(seq_bb);
        ctx.push_inst(jump_inst)?;
    }

    ctx.set_current_bb(seq_bb);
    Ok(())
}

pub fn generate_while_stmt_ir(
    cond: &Expr,
    body: &Stmt,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    let (while_label, body_label) = ctx.labels.next_while();
    let seq_label = ctx.labels.next_seq();
    let cond_bb = ctx.new_bb(while_label)?;
    let body_bb = ctx.new_bb(body_label)?;
    let seq_bb = ctx.new_bb(seq_label)?;

    let jump_inst = ctx.dfg_mut()?.new_value().jump(cond_bb);
    ctx.push_inst(jump_inst)?;

    // 条件每轮重新求值
    ctx.set_current_bb(cond_bb);
    let cond_val = cond.generate_ir(ctx)?;
    let br_inst = ctx.dfg_mut()?.new_value().branch(cond_val, body_bb, seq_bb);
    ctx.push_inst(br_inst)?;

    ctx.set_current_bb(body_bb);
    ctx.loop_stack.push((cond_bb, seq_bb));
    body.generate_ir(ctx)?;
    ctx.loop_stack.pop();
    let jump_back = ctx.dfg_mut()?.new_value().jump(cond_bb);
    ctx.push_inst(jump_back)?;

    ctx.set_current_bb(seq_bb);
    Ok(())
}

pub fn generate_break_stmt_ir(span: &Span, ctx: &mut IrContext) -> Result<(), CompilerError> {
    let (_, break_target) = *ctx
        .loop_stack
        .last()
        .ok_or_else(|| ctx.error_at_span("`break` used outside of loop".to_string(), *span))?;
    let jump_inst = ctx.dfg_mut()?.new_value().jump(break_target);
    ctx.push_inst(jump_inst)?;
    open_sequential_bb(ctx)
}

pub fn generate_continue_stmt_ir(span: &Span, ctx: &mut IrContext) -> Result<(), CompilerError> {
    let (continue_target, _) = *ctx
        .loop_stack
        .last()
        .ok_or_else(|| ctx.error_at_span("`continue` used outside of loop".to_string(), *span))?;
    let jump_inst = ctx.dfg_mut()?.new_value().jump(continue_target);
    ctx.push_inst(jump_inst)?;
    open_sequential_bb(ctx)
}
