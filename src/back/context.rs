use std::collections::HashMap;

use koopa::ir::{BasicBlock, Value};

use crate::back::frame::StackFrameManager;
use crate::back::program::AsmProgram;
use crate::CompilerError;

/// 汇编代码生成上下文
///
/// 全局变量名表跨函数存活，栈帧和标签映射每个函数重置。
pub struct Context {
    /// 生成的汇编程序
    pub program: AsmProgram,
    /// 当前函数的栈帧
    pub frame: StackFrameManager,
    /// 全局 alloc 到汇编符号名的映射
    pub globals: HashMap<Value, String>,
    /// 基本块到汇编标签的映射
    pub bb_labels: HashMap<BasicBlock, String>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            program: AsmProgram::new(),
            frame: StackFrameManager::new(),
            globals: HashMap::new(),
            bb_labels: HashMap::new(),
        }
    }

    pub fn reset_for_function(&mut self) {
        self.frame.clear();
        self.bb_labels.clear();
    }

    /// 查槽偏移，查不到说明前面扫描漏了值，是后端自身的错误
    pub fn slot_offset(&self, value: Value) -> Result<i32, CompilerError> {
        self.frame.offset(value).ok_or_else(|| {
            CompilerError::CodeGenerationError(format!("Value {:?} has no stack slot", value))
        })
    }

    pub fn bb_label(&self, bb: BasicBlock) -> Result<String, CompilerError> {
        self.bb_labels.get(&bb).cloned().ok_or_else(|| {
            CompilerError::CodeGenerationError(format!("Basic block {:?} has no label", bb))
        })
    }
}
