//! # 后端模块
//!
//! 后端负责将 Koopa IR 程序翻译为 RISC-V (RV32IM) 汇编代码。
//!
//! ## 主要功能
//!
//! 1. **指令选择**
//!    - 将每种 Koopa IR 指令映射到 RISC-V 指令序列
//!    - 大立即数 / 大偏移经由暂存寄存器合成
//!
//! 2. **栈帧管理**
//!    - 所有产生值的指令在栈上占槽（spill-everything）
//!    - 出参区 + 指令槽区 + 返回地址，总量对齐到 16 字节
//!
//! 3. **寄存器方案**
//!    - 固定四个寄存器：a0 传返回值，t1/t2/t3 做暂存
//!    - 没有寄存器分配器
//!
//! 4. **全局变量**
//!    - 生成 `.data` 段与初始化数据
//!
//! ## 模块结构
//!
//! - `asm`: 逐指令的汇编生成
//! - `insts`: RISC-V 指令定义与打印
//! - `regs`: 固定寄存器方案
//! - `frame`: 栈帧规划
//! - `program`: 汇编程序缓冲与输出
//! - `context`: 代码生成上下文
//! - `utils`: 带大偏移处理的访存辅助

pub mod asm;
pub mod context;
pub mod frame;
pub mod insts;
pub mod program;
pub mod regs;
pub mod utils;

use koopa::ir::Program;

use crate::back::asm::GenerateAsm;
use crate::back::context::Context;
use crate::CompilerError;

/// 从 Koopa IR 程序生成 RISC-V 汇编文本
pub fn generate_asm(program: &Program) -> Result<String, CompilerError> {
    let mut ctx = Context::new();
    program.generate(program, &mut ctx)?;
    Ok(ctx.program.dump())
}
