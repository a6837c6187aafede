use std::collections::HashMap;

use koopa::ir::{Function, Type, Value};

use crate::CompilerError;

/// 符号表中的一个条目
///
/// - `Const`：标量常量，编译期求值后只保留整数值，不产生 IR
/// - `Var`：变量或数组常量，`value` 是对应的 alloc / global alloc，
///   `ty` 是声明类型（非指针包装）
/// - `Func`：函数，内部名与源码名一致（ABI 可见）
#[derive(Debug, Clone)]
pub enum Symbol {
    Const {
        value: i32,
    },
    Var {
        internal_name: String,
        value: Value,
        ty: Type,
        is_const: bool,
    },
    Func(Function),
}

/// 作用域栈式符号表
///
/// 每进入一个块压入一层，离开弹出；查找从内层向外层。
/// 常量和变量在插入时被改写为全局唯一的内部名
/// `<原名>_<层深>_<序号>`，函数保留源码名。
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Symbol>>,
    use_count: HashMap<String, u32>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            // 最外层是全局作用域
            scopes: vec![HashMap::new()],
            use_count: HashMap::new(),
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop(&mut self) -> Result<(), CompilerError> {
        if self.scopes.len() <= 1 {
            return Err(CompilerError::IRGenerationError(
                "Cannot pop the global scope".to_string(),
            ));
        }
        self.scopes.pop();
        Ok(())
    }

    /// 当前作用域深度，全局作用域为 1
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// 为一个原名铸造内部名：`<raw>_<depth>_<N>`
    ///
    /// 同一 `<raw>_<depth>` 前缀下的计数单调递增，
    /// 同名遮蔽也不会产生重复的内部名。
    pub fn mint_internal_name(&mut self, raw_name: &str) -> String {
        let base = format!("{}_{}", raw_name, self.depth());
        let count = self.use_count.entry(base.clone()).or_insert(0);
        *count += 1;
        format!("{}_{}", base, count)
    }

    /// 在当前作用域插入符号，重复声明是错误
    pub fn insert(&mut self, raw_name: &str, symbol: Symbol) -> Result<(), CompilerError> {
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| CompilerError::IRGenerationError("No scope on stack".to_string()))?;
        if scope.contains_key(raw_name) {
            return Err(CompilerError::IRGenerationError(format!(
                "`{}` already declared in this scope",
                raw_name
            )));
        }
        scope.insert(raw_name.to_string(), symbol);
        Ok(())
    }

    /// 从内层向外层查找，最近的声明优先
    pub fn lookup(&self, raw_name: &str) -> Option<&Symbol> {
        for scope in self.scopes.iter().rev() {
            if let Some(symbol) = scope.get(raw_name) {
                return Some(symbol);
            }
        }
        None
    }

    /// 名字是否解析到全局作用域的条目
    pub fn is_global(&self, raw_name: &str) -> bool {
        for (idx, scope) in self.scopes.iter().enumerate().rev() {
            if scope.contains_key(raw_name) {
                return idx == 0;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_names_are_unique_across_shadowing() {
        let mut st = SymbolTable::new();
        st.push();
        let a1 = st.mint_internal_name("x");
        st.push();
        let a2 = st.mint_internal_name("x");
        st.pop().unwrap();
        st.push();
        let a3 = st.mint_internal_name("x");
        assert_eq!(a1, "x_2_1");
        assert_eq!(a2, "x_3_1");
        // 同一层深再次声明，计数递增
        assert_eq!(a3, "x_3_2");
    }

    #[test]
    fn lookup_prefers_innermost_scope() {
        let mut st = SymbolTable::new();
        st.insert("a", Symbol::Const { value: 1 }).unwrap();
        st.push();
        st.insert("a", Symbol::Const { value: 2 }).unwrap();
        match st.lookup("a") {
            Some(Symbol::Const { value }) => assert_eq!(*value, 2),
            _ => panic!("expected const symbol"),
        }
        st.pop().unwrap();
        match st.lookup("a") {
            Some(Symbol::Const { value }) => assert_eq!(*value, 1),
            _ => panic!("expected const symbol"),
        }
    }

    #[test]
    fn is_global_sees_through_inner_scopes() {
        let mut st = SymbolTable::new();
        st.insert("g", Symbol::Const { value: 0 }).unwrap();
        st.push();
        assert!(st.is_global("g"));
        st.insert("l", Symbol::Const { value: 0 }).unwrap();
        assert!(!st.is_global("l"));
        assert!(!st.is_global("missing"));
    }

    #[test]
    fn redeclaration_in_one_scope_is_an_error() {
        let mut st = SymbolTable::new();
        st.insert("a", Symbol::Const { value: 1 }).unwrap();
        assert!(st.insert("a", Symbol::Const { value: 2 }).is_err());
    }

    #[test]
    fn variable_symbols_carry_their_internal_name() {
        use koopa::ir::builder_traits::*;
        use koopa::ir::{FunctionData, Program};

        let mut program = Program::new();
        let f = program.new_func(FunctionData::new(
            "@symbol_test".to_string(),
            vec![],
            Type::get_unit(),
        ));
        let alloc = program
            .func_mut(f)
            .dfg_mut()
            .new_value()
            .alloc(Type::get_i32());

        let mut st = SymbolTable::new();
        st.push();
        let internal_name = st.mint_internal_name("v");
        st.insert(
            "v",
            Symbol::Var {
                internal_name: internal_name.clone(),
                value: alloc,
                ty: Type::get_i32(),
                is_const: true,
            },
        )
        .unwrap();
        match st.lookup("v") {
            Some(Symbol::Var {
                internal_name: stored,
                is_const,
                ..
            }) => {
                assert_eq!(stored, &internal_name);
                assert!(*is_const);
            }
            _ => panic!("expected a variable symbol"),
        }
    }
}
