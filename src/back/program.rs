use crate::back::insts::Instruction;

/// 汇编程序缓冲：顺序累积指令，最后一次性输出
pub struct AsmProgram {
    instructions: Vec<Instruction>,
}

impl AsmProgram {
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
        }
    }

    pub fn push(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    pub fn dump(&self) -> String {
        self.instructions
            .iter()
            .map(|inst| inst.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for AsmProgram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::insts::Reg;

    #[test]
    fn instructions_dump_line_by_line() {
        let mut program = AsmProgram::new();
        program.push(Instruction::Label("main".to_string()));
        program.push(Instruction::Li(Reg::A0, 0));
        program.push(Instruction::Ret);
        assert_eq!(program.dump(), "main:\n  li a0, 0\n  ret");
    }
}
