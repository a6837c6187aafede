//! 汇编代码生成
//!
//! 为每种 Koopa IR 指令实现对应的 RISC-V 生成逻辑。
//! 代码生成策略：
//!
//! - 所有值都在栈上有槽位，计算时加载到固定暂存寄存器
//! - 计算结果写回栈
//! - 全局变量经 `la` 取地址访问
//! - 数组寻址 (`getelemptr` / `getptr`) 现场算出绝对地址存进槽里

use koopa::ir::entities::ValueData;
use koopa::ir::values::{
    Binary, Branch, Call, GetElemPtr, GetPtr, Jump, Load, Return, Store,
};
use koopa::ir::{BinaryOp, FunctionData, Program, Type, TypeKind, Value, ValueKind};

use crate::back::context::Context;
use crate::back::insts::{Instruction, Reg};
use crate::back::regs::{ARG_REGS, REG_RET, REG_X, REG_Y, REG_Z};
use crate::back::utils::{load_reg_with_offset, store_reg_with_offset};
use crate::CompilerError;

pub trait GenerateAsm {
    fn generate(&self, program: &Program, ctx: &mut Context) -> Result<(), CompilerError>;
}

impl GenerateAsm for Program {
    fn generate(&self, program: &Program, ctx: &mut Context) -> Result<(), CompilerError> {
        // 先生成 .data 段
        for global_var in self.inst_layout() {
            let global_info = {
                let var_data = program.borrow_value(*global_var);
                match var_data.kind() {
                    ValueKind::GlobalAlloc(global_alloc) => {
                        let name_with_sigil = var_data.name().clone().ok_or_else(|| {
                            CompilerError::CodeGenerationError(format!(
                                "Global variable {:?} has no name",
                                *global_var
                            ))
                        })?;
                        Some((global_alloc.init(), name_with_sigil[1..].to_string()))
                    }
                    _ => None,
                }
            };
            if let Some((init, var_name)) = global_info {
                generate_global_alloc(init, var_name, *global_var, program, ctx)?;
            }
        }

        // 再生成 .text 段
        for &func_id in self.func_layout() {
            let func_data = self.func(func_id);
            // 没有基本块的是库函数声明
            if func_data.layout().entry_bb().is_none() {
                continue;
            }
            func_data.generate(program, ctx)?;
        }
        Ok(())
    }
}

fn generate_global_alloc(
    init: Value,
    var_name: String,
    value: Value,
    program: &Program,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    ctx.globals.insert(value, var_name.clone());

    ctx.program.push(Instruction::Section(".data".to_string()));
    ctx.program.push(Instruction::Global(var_name.clone()));
    ctx.program.push(Instruction::Label(var_name));
    emit_global_init(init, program, ctx)
}

fn emit_global_init(val: Value, program: &Program, ctx: &mut Context) -> Result<(), CompilerError> {
    let value_data = program.borrow_value(val);
    match value_data.kind() {
        ValueKind::Integer(i) => {
            ctx.program.push(Instruction::Word(i.value()));
            Ok(())
        }
        ValueKind::ZeroInit(_) => {
            ctx.program
                .push(Instruction::Zero(value_data.ty().size() as i32));
            Ok(())
        }
        ValueKind::Aggregate(agg) => {
            let elems: Vec<Value> = agg.elems().to_vec();
            drop(value_data);
            for elem in elems {
                emit_global_init(elem, program, ctx)?;
            }
            Ok(())
        }
        other => Err(CompilerError::CodeGenerationError(format!(
            "Unsupported global initializer: {:?}",
            other
        ))),
    }
}

impl GenerateAsm for FunctionData {
    fn generate(&self, program: &Program, ctx: &mut Context) -> Result<(), CompilerError> {
        let name = &self.name()[1..];
        ctx.reset_for_function();
        ctx.program.push(Instruction::Section(".text".to_string()));
        ctx.program.push(Instruction::Global(name.to_string()));
        ctx.program.push(Instruction::Label(name.to_string()));

        // 扫描所有指令，规划栈帧：返回地址在最上方，
        // 每个产生值的指令按首见顺序占一个槽，
        // 出参区（若有超过 8 个实参的调用）压在最下方
        ctx.frame.alloc_upper(4);
        let mut max_call_args = 0;
        for (_bb, node) in self.layout().bbs() {
            for &inst in node.insts().keys() {
                let value_data = self.dfg().value(inst);
                if let ValueKind::Call(call) = value_data.kind() {
                    max_call_args = max_call_args.max(call.args().len());
                }
                if let ValueKind::Alloc(_) = value_data.kind() {
                    // alloc 的槽容纳被分配的对象本身
                    ctx.frame.alloc(inst, get_alloc_size(value_data)?);
                } else if !value_data.ty().is_unit() {
                    ctx.frame.alloc(inst, value_data.ty().size() as i32);
                }
            }
        }
        if max_call_args > 8 {
            ctx.frame.alloc_lower(((max_call_args - 8) * 4) as i32);
        }

        // 基本块标签：IR 里的块名去掉 % 前缀
        let mut bb_index = 0;
        for (bb, _node) in self.layout().bbs() {
            let label = match self.dfg().bb(*bb).name() {
                Some(bb_name) => bb_name[1..].to_string(),
                None => format!("{}_bb{}", name, bb_index),
            };
            ctx.bb_labels.insert(*bb, label);
            bb_index += 1;
        }

        // 导言：留出栈帧，保存 ra
        let frame_size = ctx.frame.rounded_size();
        if frame_size > 0 {
            if frame_size <= 2048 {
                ctx.program
                    .push(Instruction::Addi(Reg::Sp, Reg::Sp, -frame_size));
            } else {
                ctx.program.push(Instruction::Li(REG_Y, -frame_size));
                ctx.program.push(Instruction::Add(Reg::Sp, Reg::Sp, REG_Y));
            }
        }
        store_reg_with_offset(&mut ctx.program, Reg::Ra, REG_X, ctx.frame.offset_upper());

        // 逐块逐指令生成
        for (bb, node) in self.layout().bbs() {
            let label = ctx.bb_label(*bb)?;
            ctx.program.push(Instruction::Label(label));
            for &inst in node.insts().keys() {
                let value_data = self.dfg().value(inst);
                generate_value(inst, value_data, self, program, ctx)?;
            }
        }
        Ok(())
    }
}

fn generate_value(
    inst: Value,
    value_data: &ValueData,
    func: &FunctionData,
    program: &Program,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    match value_data.kind() {
        ValueKind::Return(ret) => generate_return(ret, func, ctx),
        ValueKind::Binary(bin) => generate_binary(inst, bin, func, ctx),
        // alloc 在扫描阶段已经拿到槽位
        ValueKind::Alloc(_) => Ok(()),
        ValueKind::Load(load) => generate_load(inst, load, func, ctx),
        ValueKind::Store(store) => generate_store(store, func, ctx),
        ValueKind::Branch(branch) => generate_branch(branch, func, ctx),
        ValueKind::Jump(jump) => generate_jump(jump, ctx),
        ValueKind::Call(call) => generate_call(inst, call, func, program, ctx),
        ValueKind::GetElemPtr(gep) => generate_get_elem_ptr(inst, gep, func, program, ctx),
        ValueKind::GetPtr(gp) => generate_get_ptr(inst, gp, func, program, ctx),
        other => Err(CompilerError::CodeGenerationError(format!(
            "Unsupported instruction kind: {:?}",
            other
        ))),
    }
}

fn get_alloc_size(value_data: &ValueData) -> Result<i32, CompilerError> {
    match value_data.ty().kind() {
        TypeKind::Pointer(base) => Ok(base.size() as i32),
        _ => Err(CompilerError::CodeGenerationError(format!(
            "Alloc value has non-pointer type: {:?}",
            value_data.ty()
        ))),
    }
}

/// 把一个操作数放进目标寄存器
///
/// 三种来源：整数字面量 `li`；栈槽 `lw`；还没有槽位的函数形参
/// （入口处第一次 store 之前）从 `a_i` 或调用者的栈帧取。
fn load_operand(
    target: Reg,
    scratch: Reg,
    value: Value,
    func: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    if let ValueKind::Integer(i) = func.dfg().value(value).kind() {
        ctx.program.push(Instruction::Li(target, i.value()));
        return Ok(());
    }
    if let Some(offset) = ctx.frame.offset(value) {
        load_reg_with_offset(&mut ctx.program, target, scratch, offset);
        return Ok(());
    }
    if let Some(param_idx) = func.params().iter().position(|&p| p == value) {
        if param_idx < 8 {
            ctx.program.push(Instruction::Mv(target, ARG_REGS[param_idx]));
        } else {
            // 第 9 个起的形参在调用者栈帧里，紧贴本函数栈帧之上
            let offset = ctx.frame.rounded_size() + ((param_idx - 8) * 4) as i32;
            load_reg_with_offset(&mut ctx.program, target, scratch, offset);
        }
        return Ok(());
    }
    Err(CompilerError::CodeGenerationError(format!(
        "Value {:?} has no stack slot",
        value
    )))
}

fn generate_return(
    ret: &Return,
    func: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    if let Some(val) = ret.value() {
        load_operand(REG_RET, REG_X, val, func, ctx)?;
    }

    // 后记：恢复 ra、收回栈帧
    load_reg_with_offset(&mut ctx.program, Reg::Ra, REG_X, ctx.frame.offset_upper());
    let frame_size = ctx.frame.rounded_size();
    if frame_size > 0 {
        if frame_size < 2048 {
            ctx.program
                .push(Instruction::Addi(Reg::Sp, Reg::Sp, frame_size));
        } else {
            ctx.program.push(Instruction::Li(REG_Y, frame_size));
            ctx.program.push(Instruction::Add(Reg::Sp, Reg::Sp, REG_Y));
        }
    }
    ctx.program.push(Instruction::Ret);
    Ok(())
}

fn generate_binary(
    inst: Value,
    bin: &Binary,
    func: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    load_operand(REG_Y, REG_X, bin.lhs(), func, ctx)?;
    load_operand(REG_Z, REG_X, bin.rhs(), func, ctx)?;

    match bin.op() {
        BinaryOp::Add => ctx.program.push(Instruction::Add(REG_X, REG_Y, REG_Z)),
        BinaryOp::Sub => ctx.program.push(Instruction::Sub(REG_X, REG_Y, REG_Z)),
        BinaryOp::Mul => ctx.program.push(Instruction::Mul(REG_X, REG_Y, REG_Z)),
        BinaryOp::Div => ctx.program.push(Instruction::Div(REG_X, REG_Y, REG_Z)),
        BinaryOp::Mod => ctx.program.push(Instruction::Rem(REG_X, REG_Y, REG_Z)),
        BinaryOp::Lt => ctx.program.push(Instruction::Slt(REG_X, REG_Y, REG_Z)),
        BinaryOp::Gt => ctx.program.push(Instruction::Sgt(REG_X, REG_Y, REG_Z)),
        BinaryOp::Le => {
            ctx.program.push(Instruction::Sgt(REG_X, REG_Y, REG_Z));
            ctx.program.push(Instruction::Seqz(REG_X, REG_X));
        }
        BinaryOp::Ge => {
            ctx.program.push(Instruction::Slt(REG_X, REG_Y, REG_Z));
            ctx.program.push(Instruction::Seqz(REG_X, REG_X));
        }
        BinaryOp::Eq => {
            ctx.program.push(Instruction::Xor(REG_X, REG_Y, REG_Z));
            ctx.program.push(Instruction::Seqz(REG_X, REG_X));
        }
        BinaryOp::NotEq => {
            ctx.program.push(Instruction::Xor(REG_X, REG_Y, REG_Z));
            ctx.program.push(Instruction::Snez(REG_X, REG_X));
        }
        BinaryOp::And => ctx.program.push(Instruction::And(REG_X, REG_Y, REG_Z)),
        BinaryOp::Or => ctx.program.push(Instruction::Or(REG_X, REG_Y, REG_Z)),
        BinaryOp::Xor => ctx.program.push(Instruction::Xor(REG_X, REG_Y, REG_Z)),
        // 前端不产生移位运算
        other => {
            return Err(CompilerError::CodeGenerationError(format!(
                "Unsupported binary operator: {:?}",
                other
            )));
        }
    }

    let offset = ctx.slot_offset(inst)?;
    store_reg_with_offset(&mut ctx.program, REG_X, REG_Y, offset);
    Ok(())
}

fn generate_load(
    inst: Value,
    load: &Load,
    func: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let src = load.src();
    if let Some(var_name) = ctx.globals.get(&src).cloned() {
        // 全局变量：la + lw
        ctx.program.push(Instruction::La(REG_X, var_name));
        ctx.program.push(Instruction::Lw(REG_X, 0, REG_X));
    } else if matches!(func.dfg().value(src).kind(), ValueKind::Alloc(_)) {
        // alloc 槽就是变量本体
        let offset = ctx.slot_offset(src)?;
        load_reg_with_offset(&mut ctx.program, REG_X, REG_Y, offset);
    } else {
        // 槽里是计算出来的指针，先取指针再取值
        let offset = ctx.slot_offset(src)?;
        load_reg_with_offset(&mut ctx.program, REG_X, REG_Y, offset);
        ctx.program.push(Instruction::Lw(REG_X, 0, REG_X));
    }

    let offset = ctx.slot_offset(inst)?;
    store_reg_with_offset(&mut ctx.program, REG_X, REG_Y, offset);
    Ok(())
}

fn generate_store(store: &Store, func: &FunctionData, ctx: &mut Context) -> Result<(), CompilerError> {
    load_operand(REG_X, REG_Y, store.value(), func, ctx)?;

    let dest = store.dest();
    if let Some(var_name) = ctx.globals.get(&dest).cloned() {
        ctx.program.push(Instruction::La(REG_Y, var_name));
        ctx.program.push(Instruction::Sw(REG_X, 0, REG_Y));
    } else if matches!(func.dfg().value(dest).kind(), ValueKind::Alloc(_)) {
        let offset = ctx.slot_offset(dest)?;
        store_reg_with_offset(&mut ctx.program, REG_X, REG_Y, offset);
    } else {
        let offset = ctx.slot_offset(dest)?;
        load_reg_with_offset(&mut ctx.program, REG_Y, REG_Z, offset);
        ctx.program.push(Instruction::Sw(REG_X, 0, REG_Y));
    }
    Ok(())
}

fn generate_branch(branch: &Branch, func: &FunctionData, ctx: &mut Context) -> Result<(), CompilerError> {
    let true_label = ctx.bb_label(branch.true_bb())?;
    let false_label = ctx.bb_label(branch.false_bb())?;

    // 条件是字面量时折叠成无条件跳转
    if let ValueKind::Integer(i) = func.dfg().value(branch.cond()).kind() {
        let target = if i.value() != 0 { true_label } else { false_label };
        ctx.program.push(Instruction::J(target));
        return Ok(());
    }

    load_operand(REG_X, REG_Y, branch.cond(), func, ctx)?;
    ctx.program.push(Instruction::Bnez(REG_X, true_label));
    ctx.program.push(Instruction::J(false_label));
    Ok(())
}

fn generate_jump(jump: &Jump, ctx: &mut Context) -> Result<(), CompilerError> {
    let target_label = ctx.bb_label(jump.target())?;
    ctx.program.push(Instruction::J(target_label));
    Ok(())
}

fn generate_call(
    inst: Value,
    call: &Call,
    func: &FunctionData,
    program: &Program,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    // 前 8 个实参进 a0-a7，其余存进出参区
    for (idx, &arg) in call.args().iter().enumerate() {
        if idx < 8 {
            load_operand(ARG_REGS[idx], REG_Y, arg, func, ctx)?;
        } else {
            load_operand(REG_X, REG_Y, arg, func, ctx)?;
            let offset = ctx.frame.offset_lower() + ((idx - 8) * 4) as i32;
            store_reg_with_offset(&mut ctx.program, REG_X, REG_Y, offset);
        }
    }

    let callee_data = program.func(call.callee());
    let callee_name = callee_data.name()[1..].to_string();
    ctx.program.push(Instruction::Call(callee_name));

    // 有返回值的调用把 a0 存进自己的槽
    if let TypeKind::Function(_, ret_ty) = callee_data.ty().kind() {
        if !ret_ty.is_unit() {
            let offset = ctx.slot_offset(inst)?;
            store_reg_with_offset(&mut ctx.program, REG_RET, REG_X, offset);
        }
    }
    Ok(())
}

/// 把指针来源的地址放进目标寄存器
///
/// 全局用 `la`，alloc 槽是 `sp + offset`，
/// 计算出来的指针值从槽里 `lw` 出来。
fn load_source_address(
    target: Reg,
    scratch: Reg,
    src: Value,
    func: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    if let Some(var_name) = ctx.globals.get(&src).cloned() {
        ctx.program.push(Instruction::La(target, var_name));
        return Ok(());
    }
    if matches!(func.dfg().value(src).kind(), ValueKind::Alloc(_)) {
        let offset = ctx.slot_offset(src)?;
        if (-2048..=2047).contains(&offset) {
            ctx.program.push(Instruction::Addi(target, Reg::Sp, offset));
        } else {
            ctx.program.push(Instruction::Li(scratch, offset));
            ctx.program.push(Instruction::Add(target, Reg::Sp, scratch));
        }
        return Ok(());
    }
    let offset = ctx.slot_offset(src)?;
    load_reg_with_offset(&mut ctx.program, target, scratch, offset);
    Ok(())
}

/// 指针来源的类型：全局取 Program 里的，局部取 dfg 里的
fn source_type(src: Value, func: &FunctionData, program: &Program, ctx: &Context) -> Type {
    if ctx.globals.contains_key(&src) {
        program.borrow_value(src).ty().clone()
    } else {
        func.dfg().value(src).ty().clone()
    }
}

fn generate_get_elem_ptr(
    inst: Value,
    gep: &GetElemPtr,
    func: &FunctionData,
    program: &Program,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let elem_size = match source_type(gep.src(), func, program, ctx).kind() {
        TypeKind::Pointer(base) => match base.kind() {
            TypeKind::Array(elem_ty, _) => elem_ty.size() as i32,
            _ => {
                return Err(CompilerError::CodeGenerationError(format!(
                    "GetElemPtr source is not a pointer to array: {}",
                    base
                )));
            }
        },
        other => {
            return Err(CompilerError::CodeGenerationError(format!(
                "GetElemPtr source is not a pointer: {}",
                other
            )));
        }
    };
    generate_address_arith(inst, gep.src(), gep.index(), elem_size, func, ctx)
}

fn generate_get_ptr(
    inst: Value,
    gp: &GetPtr,
    func: &FunctionData,
    program: &Program,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    let elem_size = match source_type(gp.src(), func, program, ctx).kind() {
        TypeKind::Pointer(base) => base.size() as i32,
        other => {
            return Err(CompilerError::CodeGenerationError(format!(
                "GetPtr source is not a pointer: {}",
                other
            )));
        }
    };
    generate_address_arith(inst, gp.src(), gp.index(), elem_size, func, ctx)
}

/// 地址算术：base + index * elem_size，结果写回槽
fn generate_address_arith(
    inst: Value,
    src: Value,
    index: Value,
    elem_size: i32,
    func: &FunctionData,
    ctx: &mut Context,
) -> Result<(), CompilerError> {
    load_source_address(REG_X, REG_Z, src, func, ctx)?;
    load_operand(REG_Y, REG_Z, index, func, ctx)?;
    ctx.program.push(Instruction::Li(REG_Z, elem_size));
    ctx.program.push(Instruction::Mul(REG_Y, REG_Y, REG_Z));
    ctx.program.push(Instruction::Add(REG_X, REG_X, REG_Y));

    let offset = ctx.slot_offset(inst)?;
    store_reg_with_offset(&mut ctx.program, REG_X, REG_Z, offset);
    Ok(())
}
