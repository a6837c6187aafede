use koopa::ir::builder::*;
use koopa::ir::*;

use crate::front::ast::*;
use crate::front::ast::BinaryOp;
use crate::front::ir::{GenerateIR, IrContext};
use crate::front::symbol::Symbol;
use crate::CompilerError;

/// 编译期求值，用于数组维度、常量定义和全局初始化等必须折叠的场合
///
/// 运算语义是 32 位有符号回绕；除零、取模零、引用非常量
/// 在这里都是硬错误。
pub fn evaluate_const_expr(expr: &Expr, ctx: &IrContext) -> Result<i32, CompilerError> {
    match expr {
        Expr::IntLiteral(n, _) => Ok(*n),
        Expr::LVal(lval) => {
            // 常量表达式中不允许数组访问
            if !lval.indices.is_empty() {
                return Err(ctx.error_at_span(
                    "Array element access is not allowed in constant expressions".to_string(),
                    lval.span,
                ));
            }
            match ctx.symbols.lookup(&lval.name) {
                Some(Symbol::Const { value }) => Ok(*value),
                Some(_) => Err(ctx.error_at_span(
                    format!("`{}` is not a constant", lval.name),
                    lval.span,
                )),
                None => Err(ctx.error_at_span(
                    format!("`{}` not found in constant expression", lval.name),
                    lval.span,
                )),
            }
        }
        Expr::Assign(_, _, span) => Err(ctx.error_at_span(
            "Assignment is not allowed in constant expressions".to_string(),
            *span,
        )),
        Expr::UnaryOp(op, sub_expr, _) => {
            let val = evaluate_const_expr(sub_expr, ctx)?;
            match op {
                UnaryOp::Plus => Ok(val),
                UnaryOp::Minus => Ok(val.wrapping_neg()),
                UnaryOp::Not => Ok(if val == 0 { 1 } else { 0 }),
            }
        }
        Expr::BinaryOp(op, lhs, rhs, span) => {
            let lval = evaluate_const_expr(lhs, ctx)?;
            let rval = evaluate_const_expr(rhs, ctx)?;
            match op {
                BinaryOp::Add => Ok(lval.wrapping_add(rval)),
                BinaryOp::Sub => Ok(lval.wrapping_sub(rval)),
                BinaryOp::Mul => Ok(lval.wrapping_mul(rval)),
                BinaryOp::Div => {
                    if rval == 0 {
                        return Err(ctx.error_at_span(
                            "Division by zero in constant expression".to_string(),
                            *span,
                        ));
                    }
                    Ok(lval.wrapping_div(rval))
                }
                BinaryOp::Mod => {
                    if rval == 0 {
                        return Err(ctx.error_at_span(
                            "Modulo by zero in constant expression".to_string(),
                            *span,
                        ));
                    }
                    Ok(lval.wrapping_rem(rval))
                }
            }
        }
        Expr::RelOp(op, lhs, rhs, _) => {
            let lval = evaluate_const_expr(lhs, ctx)?;
            let rval = evaluate_const_expr(rhs, ctx)?;
            let result = match op {
                RelOp::Lt => lval < rval,
                RelOp::Gt => lval > rval,
                RelOp::Le => lval <= rval,
                RelOp::Ge => lval >= rval,
            };
            Ok(result as i32)
        }
        Expr::EqOp(op, lhs, rhs, _) => {
            let lval = evaluate_const_expr(lhs, ctx)?;
            let rval = evaluate_const_expr(rhs, ctx)?;
            let result = match op {
                EqOp::Eq => lval == rval,
                EqOp::Ne => lval != rval,
            };
            Ok(result as i32)
        }
        Expr::LAndOp(_, lhs, rhs, _) => {
            // 左操作数为 0 时短路，右侧不要求可折叠
            let lval = evaluate_const_expr(lhs, ctx)?;
            if lval == 0 {
                Ok(0)
            } else {
                let rval = evaluate_const_expr(rhs, ctx)?;
                Ok((rval != 0) as i32)
            }
        }
        Expr::LOrOp(_, lhs, rhs, _) => {
            let lval = evaluate_const_expr(lhs, ctx)?;
            if lval != 0 {
                Ok(1)
            } else {
                let rval = evaluate_const_expr(rhs, ctx)?;
                Ok((rval != 0) as i32)
            }
        }
        Expr::Call(_, _, span) => Err(ctx.error_at_span(
            "Function calls are not allowed in constant expressions".to_string(),
            *span,
        )),
    }
}

/// 尝试把表达式折叠为内联整数；折不动（包括折叠中的错误）返回 None
///
/// 降级逻辑在任何需要操作数的地方都先问一次这里，
/// 能折叠就用字面量，省掉一个临时值。
pub fn inline_number(expr: &Expr, ctx: &IrContext) -> Option<i32> {
    evaluate_const_expr(expr, ctx).ok()
}

/// 沿着索引列表走一遍声明类型，逐级下标
///
/// 指针一级是 load + getptr（形参退化而来），数组一级是 getelemptr。
/// 返回最后的地址和剩余类型。
fn walk_lval_indices(
    lval: &LVal,
    base: Value,
    ty: &Type,
    ctx: &mut IrContext,
) -> Result<(Value, Type), CompilerError> {
    let mut src = base;
    let mut current_ty = ty.clone();
    for index_expr in &lval.indices {
        let (next_ty, is_pointer) = match current_ty.kind() {
            TypeKind::Pointer(base_ty) => (base_ty.clone(), true),
            TypeKind::Array(base_ty, _) => (base_ty.clone(), false),
            _ => {
                return Err(ctx.error_at_span(
                    format!("Too many indices for `{}`", lval.name),
                    lval.span,
                ));
            }
        };
        if is_pointer {
            // 槽里存的是指针值，先取出来
            let loaded = ctx.dfg_mut()?.new_value().load(src);
            ctx.push_inst(loaded)?;
            src = loaded;
        }
        let index_val = index_expr.generate_ir(ctx)?;
        let next_ptr = if is_pointer {
            ctx.dfg_mut()?.new_value().get_ptr(src, index_val)
        } else {
            ctx.dfg_mut()?.new_value().get_elem_ptr(src, index_val)
        };
        ctx.push_inst(next_ptr)?;
        src = next_ptr;
        current_ty = next_ty;
    }
    Ok((src, current_ty))
}

/// 左值作为右值使用：取标量值，或者部分下标时退化成指针
pub fn generate_lval_ir(lval: &LVal, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    let symbol = ctx
        .symbols
        .lookup(&lval.name)
        .cloned()
        .ok_or_else(|| ctx.error_at_span(format!("`{}` not found", lval.name), lval.span))?;
    match symbol {
        Symbol::Const { value } => {
            if !lval.indices.is_empty() {
                return Err(ctx.error_at_span(
                    format!("Indexed access on scalar constant `{}`", lval.name),
                    lval.span,
                ));
            }
            Ok(ctx.dfg_mut()?.new_value().integer(value))
        }
        Symbol::Func(_) => Err(ctx.error_at_span(
            format!("`{}` is a function, not a variable", lval.name),
            lval.span,
        )),
        Symbol::Var { value, ty, .. } => {
            let (ptr, remaining_ty) = walk_lval_indices(lval, value, &ty, ctx)?;
            match remaining_ty.kind() {
                // 部分下标的数组退化为首元素指针
                TypeKind::Array(..) => {
                    let zero = ctx.dfg_mut()?.new_value().integer(0);
                    let decayed = ctx.dfg_mut()?.new_value().get_elem_ptr(ptr, zero);
                    ctx.push_inst(decayed)?;
                    Ok(decayed)
                }
                // 标量取值；未下标的指针形参取出指针本身
                _ => {
                    let loaded = ctx.dfg_mut()?.new_value().load(ptr);
                    ctx.push_inst(loaded)?;
                    Ok(loaded)
                }
            }
        }
    }
}

/// 左值作为赋值目标：同样的寻址走法，但不做最后的 load
pub fn build_lval_address(lval: &LVal, ctx: &mut IrContext) -> Result<Value, CompilerError> {
    let symbol = ctx
        .symbols
        .lookup(&lval.name)
        .cloned()
        .ok_or_else(|| ctx.error_at_span(format!("`{}` not found", lval.name), lval.span))?;
    match symbol {
        Symbol::Const { .. } => Err(ctx.error_at_span(
            format!("Cannot assign to constant `{}`", lval.name),
            lval.span,
        )),
        Symbol::Func(_) => Err(ctx.error_at_span(
            format!("Cannot assign to function `{}`", lval.name),
            lval.span,
        )),
        Symbol::Var { value, ty, is_const, .. } => {
            if is_const {
                return Err(ctx.error_at_span(
                    format!("Cannot assign to constant `{}`", lval.name),
                    lval.span,
                ));
            }
            let (ptr, _) = walk_lval_indices(lval, value, &ty, ctx)?;
            Ok(ptr)
        }
    }
}

/// 赋值：先算右边，再算地址，store 后整体的值就是右边的值
pub fn generate_assign_ir(
    lval: &LVal,
    expr: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let expr_val = expr.generate_ir(ctx)?;
    let addr = build_lval_address(lval, ctx)?;
    let store_inst = ctx.dfg_mut()?.new_value().store(expr_val, addr);
    ctx.push_inst(store_inst)?;
    Ok(expr_val)
}

pub fn generate_unary_op_ir(
    op: &UnaryOp,
    expr: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let operand_val = expr.generate_ir(ctx)?;
    match op {
        UnaryOp::Plus => Ok(operand_val),
        UnaryOp::Minus => {
            let zero = ctx.dfg_mut()?.new_value().integer(0);
            let neg_val = ctx
                .dfg_mut()?
                .new_value()
                .binary(koopa::ir::BinaryOp::Sub, zero, operand_val);
            ctx.push_inst(neg_val)?;
            Ok(neg_val)
        }
        UnaryOp::Not => {
            let zero = ctx.dfg_mut()?.new_value().integer(0);
            let not_val = ctx
                .dfg_mut()?
                .new_value()
                .binary(koopa::ir::BinaryOp::Eq, operand_val, zero);
            ctx.push_inst(not_val)?;
            Ok(not_val)
        }
    }
}

fn generate_binary_instruction(
    op: koopa::ir::BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let lval = lhs.generate_ir(ctx)?;
    let rval = rhs.generate_ir(ctx)?;
    let bin = ctx.dfg_mut()?.new_value().binary(op, lval, rval);
    ctx.push_inst(bin)?;
    Ok(bin)
}

pub fn generate_binary_op_ir(
    op: &crate::front::ast::BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let bop = match op {
        crate::front::ast::BinaryOp::Add => koopa::ir::BinaryOp::Add,
        crate::front::ast::BinaryOp::Sub => koopa::ir::BinaryOp::Sub,
        crate::front::ast::BinaryOp::Mul => koopa::ir::BinaryOp::Mul,
        crate::front::ast::BinaryOp::Div => koopa::ir::BinaryOp::Div,
        crate::front::ast::BinaryOp::Mod => koopa::ir::BinaryOp::Mod,
    };
    generate_binary_instruction(bop, lhs, rhs, ctx)
}

pub fn generate_rel_op_ir(
    op: &RelOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let bop = match op {
        RelOp::Lt => koopa::ir::BinaryOp::Lt,
        RelOp::Gt => koopa::ir::BinaryOp::Gt,
        RelOp::Le => koopa::ir::BinaryOp::Le,
        RelOp::Ge => koopa::ir::BinaryOp::Ge,
    };
    generate_binary_instruction(bop, lhs, rhs, ctx)
}

pub fn generate_eq_op_ir(
    op: &EqOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let bop = match op {
        EqOp::Eq => koopa::ir::BinaryOp::Eq,
        EqOp::Ne => koopa::ir::BinaryOp::NotEq,
    };
    generate_binary_instruction(bop, lhs, rhs, ctx)
}

/// `a && b` 的短路求值
///
/// 结果走栈槽而不是块参数：
/// ```text
/// t = alloc i32; store 1, t
/// br a, %land_k, %land_sc_k
/// %land_k:    store (a!=0)&(b!=0), t; jump %seq_j
/// %land_sc_k: store 0, t;            jump %seq_j
/// %seq_j:     result = load t
/// ```
pub fn generate_land_op_ir(
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let tmp_alloc = ctx.alloc_in_entry(Type::get_i32())?;
    let one = ctx.dfg_mut()?.new_value().integer(1);
    let store_one = ctx.dfg_mut()?.new_value().store(one, tmp_alloc);
    ctx.push_inst(store_one)?;

    let lhs_val = lhs.generate_ir(ctx)?;

    let (land_label, sc_label) = ctx.labels.next_land();
    let seq_label = ctx.labels.next_seq();
    let rhs_bb = ctx.new_bb(land_label)?;
    let sc_bb = ctx.new_bb(sc_label)?;
    let seq_bb = ctx.new_bb(seq_label)?;

    let br_inst = ctx.dfg_mut()?.new_value().branch(lhs_val, rhs_bb, sc_bb);
    ctx.push_inst(br_inst)?;

    // 求值分支：结果是 (lhs != 0) & (rhs != 0)
    ctx.set_current_bb(rhs_bb);
    let rhs_val = rhs.generate_ir(ctx)?;
    let zero = ctx.dfg_mut()?.new_value().integer(0);
    let ne_l = ctx
        .dfg_mut()?
        .new_value()
        .binary(koopa::ir::BinaryOp::NotEq, lhs_val, zero);
    ctx.push_inst(ne_l)?;
    let ne_r = ctx
        .dfg_mut()?
        .new_value()
        .binary(koopa::ir::BinaryOp::NotEq, rhs_val, zero);
    ctx.push_inst(ne_r)?;
    let and_val = ctx
        .dfg_mut()?
        .new_value()
        .binary(koopa::ir::BinaryOp::And, ne_l, ne_r);
    ctx.push_inst(and_val)?;
    let store_res = ctx.dfg_mut()?.new_value().store(and_val, tmp_alloc);
    ctx.push_inst(store_res)?;
    let jump_inst = ctx.dfg_mut()?.new_value().jump(seq_bb);
    ctx.push_inst(jump_inst)?;

    // 短路分支：lhs 为假，结果 0
    ctx.set_current_bb(sc_bb);
    let zero = ctx.dfg_mut()?.new_value().integer(0);
    let store_zero = ctx.dfg_mut()?.new_value().store(zero, tmp_alloc);
    ctx.push_inst(store_zero)?;
    let jump_inst = ctx.dfg_mut()?.new_value().jump(seq_bb);
    ctx.push_inst(jump_inst)?;

    ctx.set_current_bb(seq_bb);
    let load_res = ctx.dfg_mut()?.new_value().load(tmp_alloc);
    ctx.push_inst(load_res)?;
    Ok(load_res)
}

/// `a || b`：镜像 `&&`，初值 0，短路分支存 1
pub fn generate_lor_op_ir(
    lhs: &Expr,
    rhs: &Expr,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let tmp_alloc = ctx.alloc_in_entry(Type::get_i32())?;
    let zero = ctx.dfg_mut()?.new_value().integer(0);
    let store_zero = ctx.dfg_mut()?.new_value().store(zero, tmp_alloc);
    ctx.push_inst(store_zero)?;

    let lhs_val = lhs.generate_ir(ctx)?;

    let (lor_label, sc_label) = ctx.labels.next_lor();
    let seq_label = ctx.labels.next_seq();
    let rhs_bb = ctx.new_bb(lor_label)?;
    let sc_bb = ctx.new_bb(sc_label)?;
    let seq_bb = ctx.new_bb(seq_label)?;

    // lhs 为真走短路分支
    let br_inst = ctx.dfg_mut()?.new_value().branch(lhs_val, sc_bb, rhs_bb);
    ctx.push_inst(br_inst)?;

    // 求值分支：结果是 (lhs != 0) | (rhs != 0)
    ctx.set_current_bb(rhs_bb);
    let rhs_val = rhs.generate_ir(ctx)?;
    let zero = ctx.dfg_mut()?.new_value().integer(0);
    let ne_l = ctx
        .dfg_mut()?
        .new_value()
        .binary(koopa::ir::BinaryOp::NotEq, lhs_val, zero);
    ctx.push_inst(ne_l)?;
    let ne_r = ctx
        .dfg_mut()?
        .new_value()
        .binary(koopa::ir::BinaryOp::NotEq, rhs_val, zero);
    ctx.push_inst(ne_r)?;
    let or_val = ctx
        .dfg_mut()?
        .new_value()
        .binary(koopa::ir::BinaryOp::Or, ne_l, ne_r);
    ctx.push_inst(or_val)?;
    let store_res = ctx.dfg_mut()?.new_value().store(or_val, tmp_alloc);
    ctx.push_inst(store_res)?;
    let jump_inst = ctx.dfg_mut()?.new_value().jump(seq_bb);
    ctx.push_inst(jump_inst)?;

    // 短路分支：lhs 为真，结果 1
    ctx.set_current_bb(sc_bb);
    let one = ctx.dfg_mut()?.new_value().integer(1);
    let store_one = ctx.dfg_mut()?.new_value().store(one, tmp_alloc);
    ctx.push_inst(store_one)?;
    let jump_inst = ctx.dfg_mut()?.new_value().jump(seq_bb);
    ctx.push_inst(jump_inst)?;

    ctx.set_current_bb(seq_bb);
    let load_res = ctx.dfg_mut()?.new_value().load(tmp_alloc);
    ctx.push_inst(load_res)?;
    Ok(load_res)
}

pub fn generate_call_ir(
    func_name: &str,
    args: &[Expr],
    span: Span,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let func_handle = match ctx.symbols.lookup(func_name) {
        Some(Symbol::Func(f)) => *f,
        Some(_) => {
            return Err(ctx.error_at_span(
                format!("`{}` is not a function", func_name),
                span,
            ));
        }
        None => {
            return Err(ctx.error_at_span(
                format!("Function `{}` not found", func_name),
                span,
            ));
        }
    };

    // 数组实参经由左值规则退化成指针，这里统一按表达式降级
    let mut arg_values = Vec::with_capacity(args.len());
    for arg in args {
        arg_values.push(arg.generate_ir(ctx)?);
    }

    let call_inst = ctx.dfg_mut()?.new_value().call(func_handle, arg_values);
    ctx.push_inst(call_inst)?;
    Ok(call_inst)
}
