//! 固定寄存器方案
//!
//! 所有值都在栈上，寄存器只做中转，因此四个固定寄存器就够了：
//! `a0` 传递返回值，`t1`/`t2`/`t3` 做运算和寻址的暂存。
//! 这是正确性基线，不是优化。

use crate::back::insts::Reg;

/// 返回值寄存器
pub const REG_RET: Reg = Reg::A0;
/// 暂存：运算结果 / 基地址
pub const REG_X: Reg = Reg::T1;
/// 暂存：左操作数 / 偏移量
pub const REG_Y: Reg = Reg::T2;
/// 暂存：右操作数 / 临时
pub const REG_Z: Reg = Reg::T3;

/// 调用约定的前八个参数寄存器
pub const ARG_REGS: [Reg; 8] = [
    Reg::A0, Reg::A1, Reg::A2, Reg::A3, Reg::A4, Reg::A5, Reg::A6, Reg::A7,
];
