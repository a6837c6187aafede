use crate::back::insts::{Instruction, Reg};
use crate::back::program::AsmProgram;

// 栈偏移超出 imm12 范围时经由暂存寄存器合成地址，sp 本身不动。
// scratch 不能和 reg 相同。

pub fn store_reg_with_offset(program: &mut AsmProgram, reg: Reg, scratch: Reg, offset: i32) {
    if (-2048..=2047).contains(&offset) {
        program.push(Instruction::Sw(reg, offset, Reg::Sp));
    } else {
        program.push(Instruction::Li(scratch, offset));
        program.push(Instruction::Add(scratch, Reg::Sp, scratch));
        program.push(Instruction::Sw(reg, 0, scratch));
    }
}

pub fn load_reg_with_offset(program: &mut AsmProgram, reg: Reg, scratch: Reg, offset: i32) {
    if (-2048..=2047).contains(&offset) {
        program.push(Instruction::Lw(reg, offset, Reg::Sp));
    } else {
        program.push(Instruction::Li(scratch, offset));
        program.push(Instruction::Add(scratch, Reg::Sp, scratch));
        program.push(Instruction::Lw(reg, 0, scratch));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_offsets_use_direct_addressing() {
        let mut program = AsmProgram::new();
        load_reg_with_offset(&mut program, Reg::T1, Reg::T2, 2047);
        assert_eq!(program.dump(), "  lw t1, 2047(sp)");
    }

    #[test]
    fn large_offsets_go_through_the_scratch_register() {
        let mut program = AsmProgram::new();
        store_reg_with_offset(&mut program, Reg::T1, Reg::T2, 4096);
        let asm = program.dump();
        assert!(asm.contains("li t2, 4096"));
        assert!(asm.contains("add t2, sp, t2"));
        assert!(asm.contains("sw t1, 0(t2)"));
        // sp 不被修改
        assert!(!asm.contains("add sp"));
    }
}
