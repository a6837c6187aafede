use koopa::ir::builder_traits::*;
use koopa::ir::dfg::DataFlowGraph;
use koopa::ir::layout::Layout;
use koopa::ir::*;

use crate::front::ast::Span;
use crate::front::symbol::SymbolTable;
use crate::utils::SourceMap;
use crate::CompilerError;

/// 基本块标签铸造器
///
/// 所有计数器在整个翻译单元内单调递增，因此每个标签只会定义一次。
/// `if`/`while`/短路运算的配对标签共享同一个编号。
#[derive(Default)]
pub struct LabelGen {
    seq: u32,
    if_: u32,
    land: u32,
    lor: u32,
    while_: u32,
}

impl LabelGen {
    /// 顺序块标签 `%seq_k`，用在分支汇合点和终结指令之后
    pub fn next_seq(&mut self) -> String {
        self.seq += 1;
        format!("%seq_{}", self.seq)
    }

    /// (`%if_k`, `%else_k`)
    pub fn next_if(&mut self) -> (String, String) {
        self.if_ += 1;
        (format!("%if_{}", self.if_), format!("%else_{}", self.if_))
    }

    /// (`%land_k`, `%land_sc_k`)：求值分支与短路分支
    pub fn next_land(&mut self) -> (String, String) {
        self.land += 1;
        (
            format!("%land_{}", self.land),
            format!("%land_sc_{}", self.land),
        )
    }

    /// (`%lor_k`, `%lor_sc_k`)：求值分支与短路分支
    pub fn next_lor(&mut self) -> (String, String) {
        self.lor += 1;
        (
            format!("%lor_{}", self.lor),
            format!("%lor_sc_{}", self.lor),
        )
    }

    /// (`%while_k`, `%while_body_k`)：条件块与循环体
    pub fn next_while(&mut self) -> (String, String) {
        self.while_ += 1;
        (
            format!("%while_{}", self.while_),
            format!("%while_body_{}", self.while_),
        )
    }
}

pub struct IrContext {
    pub program: Program,
    pub symbols: SymbolTable,
    pub labels: LabelGen,
    pub current_func: Option<Function>,
    pub current_bb: Option<BasicBlock>,
    /// 当前函数入口块，一次性 alloc（短路临时槽等）放在这里
    pub entry_bb: Option<BasicBlock>,
    /// 循环栈：每层是 (continue 目标 = 条件块, break 目标 = 出口块)
    pub loop_stack: Vec<(BasicBlock, BasicBlock)>,
    pub source_map: Option<SourceMap>,
}

impl IrContext {
    pub fn new(source_map: Option<SourceMap>) -> Self {
        Self {
            program: Program::new(),
            symbols: SymbolTable::new(),
            labels: LabelGen::default(),
            current_func: None,
            current_bb: None,
            entry_bb: None,
            loop_stack: Vec::new(),
            source_map,
        }
    }

    pub fn format_location(&self, offset: usize) -> Option<String> {
        self.source_map.as_ref().map(|sm| sm.format_location(offset))
    }

    pub fn error_at_span(&self, message: impl Into<String>, span: Span) -> CompilerError {
        let mut msg = message.into();
        if let Some(loc) = self.format_location(span.begin) {
            msg = format!("{} at {}", msg, loc);
        }
        CompilerError::IRGenerationError(msg)
    }

    pub fn dfg_mut(&mut self) -> Result<&mut DataFlowGraph, CompilerError> {
        let f = self
            .current_func
            .ok_or_else(|| CompilerError::IRGenerationError("No current function".to_string()))?;
        Ok(self.program.func_mut(f).dfg_mut())
    }

    pub fn layout(&mut self) -> Result<&mut Layout, CompilerError> {
        let f = self
            .current_func
            .ok_or_else(|| CompilerError::IRGenerationError("No current function".to_string()))?;
        Ok(self.program.func_mut(f).layout_mut())
    }

    pub fn get_current_bb(&self) -> Result<BasicBlock, CompilerError> {
        self.current_bb
            .ok_or_else(|| CompilerError::IRGenerationError("No current basic block".to_string()))
    }

    /// 新建一个带名字的基本块并挂入函数布局
    pub fn new_bb(&mut self, name: String) -> Result<BasicBlock, CompilerError> {
        let bb = self.dfg_mut()?.new_bb().basic_block(Some(name));
        self.layout()?
            .bbs_mut()
            .push_key_back(bb)
            .map_err(|_| CompilerError::IRGenerationError("Failed to add basic block".to_string()))?;
        Ok(bb)
    }

    pub fn set_current_bb(&mut self, bb: BasicBlock) {
        self.current_bb = Some(bb);
    }

    /// 把指令追加到当前基本块末尾
    pub fn push_inst(&mut self, inst: Value) -> Result<(), CompilerError> {
        let bb = self.get_current_bb()?;
        self.layout()?
            .bb_mut(bb)
            .insts_mut()
            .push_key_back(inst)
            .map_err(|_| CompilerError::IRGenerationError("Failed to insert instruction".to_string()))
    }

    /// 在函数入口块最前插入 alloc
    ///
    /// 短路表达式的结果槽必须只分配一次，放在循环体内会反复 alloc。
    pub fn alloc_in_entry(&mut self, ty: Type) -> Result<Value, CompilerError> {
        let entry_bb = self.entry_bb.ok_or_else(|| {
            CompilerError::IRGenerationError("No entry basic block for current function".to_string())
        })?;
        let alloc_inst = self.dfg_mut()?.new_value().alloc(ty);
        self.layout()?
            .bb_mut(entry_bb)
            .insts_mut()
            .push_key_front(alloc_inst)
            .map_err(|_| {
                CompilerError::IRGenerationError("Failed to add alloc to entry block".to_string())
            })?;
        Ok(alloc_inst)
    }
}
