pub mod context;
pub mod expr_ir;
pub mod stmt_ir;

use koopa::ir::builder_traits::*;
use koopa::ir::*;

use crate::front::ast::*;
use crate::front::ir::expr_ir::*;
use crate::front::ir::stmt_ir::*;
use crate::front::symbol::Symbol;
use crate::CompilerError;

pub use crate::front::ir::context::IrContext;

pub trait GenerateIR {
    type Output;
    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError>;
}

impl GenerateIR for CompUnit {
    type Output = ();

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        declare_library_functions(ctx)?;

        // 按源码顺序处理，函数和全局声明都要求先声明后使用
        for item in &self.items {
            match item {
                GlobalItem::Decl(decl) => decl.generate_ir(ctx)?,
                GlobalItem::FuncDef(func) => func.generate_ir(ctx)?,
            }
        }
        Ok(())
    }
}

/// SysY 运行时库的八个函数，预先放进全局作用域
///
/// 不带基本块的函数在输出时就是 decl 声明行。
fn declare_library_functions(ctx: &mut IrContext) -> Result<(), CompilerError> {
    let int_ty = Type::get_i32;
    let unit_ty = Type::get_unit;
    let int_ptr = || Type::get_pointer(Type::get_i32());

    let lib_functions: [(&str, Vec<Type>, Type); 8] = [
        ("getint", vec![], int_ty()),
        ("getch", vec![], int_ty()),
        ("getarray", vec![int_ptr()], int_ty()),
        ("putint", vec![int_ty()], unit_ty()),
        ("putch", vec![int_ty()], unit_ty()),
        ("putarray", vec![int_ty(), int_ptr()], unit_ty()),
        ("starttime", vec![], unit_ty()),
        ("stoptime", vec![], unit_ty()),
    ];

    for (name, param_tys, ret_ty) in lib_functions {
        let func_data = FunctionData::new(format!("@{}", name), param_tys, ret_ty);
        let f = ctx.program.new_func(func_data);
        ctx.symbols.insert(name, Symbol::Func(f))?;
    }
    Ok(())
}

/// 求值数组维度表达式，必须折叠成正整数
fn evaluate_dims(dim_exprs: &[Expr], ctx: &IrContext) -> Result<Vec<usize>, CompilerError> {
    let mut dims = Vec::with_capacity(dim_exprs.len());
    for dim_expr in dim_exprs {
        let dim = evaluate_const_expr(dim_expr, ctx)?;
        if dim <= 0 {
            return Err(ctx.error_at_span(
                "Array dimension must be a positive constant".to_string(),
                dim_expr.span(),
            ));
        }
        dims.push(dim as usize);
    }
    Ok(dims)
}

fn product_dims(dims: &[usize]) -> usize {
    dims.iter().product()
}

fn build_array_type_from_dims(dims: &[usize]) -> Type {
    let mut ty = Type::get_i32();
    for dim in dims.iter().rev() {
        ty = Type::get_array(ty, *dim);
    }
    ty
}

fn build_param_type(param: &FuncFParam, ctx: &IrContext) -> Result<Type, CompilerError> {
    if !param.is_array {
        return Ok(Type::get_i32());
    }
    // 形参数组首维省略，剩余维度决定指针的基类型
    let dims = evaluate_dims(&param.dims, ctx)?;
    let base_ty = if dims.is_empty() {
        Type::get_i32()
    } else {
        build_array_type_from_dims(&dims)
    };
    Ok(Type::get_pointer(base_ty))
}

/// 嵌套花括号必须对齐到某个子数组边界，取满足对齐的最大子数组
fn pick_aligned_sub_dims<'a>(filled: usize, dims: &'a [usize]) -> Option<&'a [usize]> {
    for k in 1..dims.len() {
        let sub_size = product_dims(&dims[k..]);
        if filled % sub_size == 0 {
            return Some(&dims[k..]);
        }
    }
    None
}

/// 常量数组初始化列表：展平成全部折叠好的整数，不足补零
fn eval_const_init_list(
    elems: &[ConstInitVal],
    dims: &[usize],
    ctx: &IrContext,
) -> Result<Vec<i32>, CompilerError> {
    if dims.is_empty() {
        return Err(CompilerError::IRGenerationError(
            "Braces around scalar initializer are not allowed".to_string(),
        ));
    }
    let total = product_dims(dims);
    let mut vals = Vec::with_capacity(total);
    for elem in elems {
        if vals.len() >= total {
            return Err(CompilerError::IRGenerationError(
                "Too many elements in array initializer".to_string(),
            ));
        }
        match elem {
            ConstInitVal::Single(expr) => {
                vals.push(evaluate_const_expr(expr, ctx)?);
            }
            ConstInitVal::List(list) => {
                let sub_dims = pick_aligned_sub_dims(vals.len(), dims).ok_or_else(|| {
                    CompilerError::IRGenerationError(
                        "Initializer list is not aligned with array dimensions".to_string(),
                    )
                })?;
                let mut sub_vals = eval_const_init_list(list, sub_dims, ctx)?;
                vals.append(&mut sub_vals);
            }
        }
    }
    vals.resize(total, 0);
    Ok(vals)
}

/// 变量数组初始化列表：展平成表达式，空位（补零）为 None
fn eval_init_list(
    elems: &[InitVal],
    dims: &[usize],
) -> Result<Vec<Option<Expr>>, CompilerError> {
    if dims.is_empty() {
        return Err(CompilerError::IRGenerationError(
            "Braces around scalar initializer are not allowed".to_string(),
        ));
    }
    let total = product_dims(dims);
    let mut vals = Vec::with_capacity(total);
    for elem in elems {
        if vals.len() >= total {
            return Err(CompilerError::IRGenerationError(
                "Too many elements in array initializer".to_string(),
            ));
        }
        match elem {
            InitVal::Single(expr) => {
                vals.push(Some(expr.clone()));
            }
            InitVal::List(list) => {
                let sub_dims = pick_aligned_sub_dims(vals.len(), dims).ok_or_else(|| {
                    CompilerError::IRGenerationError(
                        "Initializer list is not aligned with array dimensions".to_string(),
                    )
                })?;
                let mut sub_vals = eval_init_list(list, sub_dims)?;
                vals.append(&mut sub_vals);
            }
        }
    }
    vals.resize(total, None);
    Ok(vals)
}

/// 展平下标转回逐维下标
fn linear_to_indices(mut idx: usize, dims: &[usize]) -> Vec<usize> {
    let mut indices = Vec::with_capacity(dims.len());
    for i in 0..dims.len() {
        let stride = product_dims(&dims[i + 1..]).max(1);
        indices.push(idx / stride);
        idx %= stride;
    }
    indices
}

/// 把展平的整数序列还原成嵌套 aggregate（全局初始化用）
fn build_global_aggregate_from_flat(
    flat_vals: &[i32],
    dims: &[usize],
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    if dims.is_empty() {
        return Err(CompilerError::IRGenerationError(
            "Invalid aggregate dimensions".to_string(),
        ));
    }
    if dims.len() == 1 {
        let vals: Vec<Value> = flat_vals
            .iter()
            .take(dims[0])
            .map(|v| ctx.program.new_value().integer(*v))
            .collect();
        return Ok(ctx.program.new_value().aggregate(vals));
    }
    let sub_size = product_dims(&dims[1..]);
    let mut elems = Vec::with_capacity(dims[0]);
    for i in 0..dims[0] {
        let start = i * sub_size;
        let sub_val = build_global_aggregate_from_flat(&flat_vals[start..start + sub_size], &dims[1..], ctx)?;
        elems.push(sub_val);
    }
    Ok(ctx.program.new_value().aggregate(elems))
}

/// 全局数组初始化值：全零退化成 zeroinit
fn build_global_array_init(
    flat_vals: &[i32],
    dims: &[usize],
    array_type: &Type,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    if flat_vals.iter().all(|v| *v == 0) {
        Ok(ctx.program.new_value().zero_init(array_type.clone()))
    } else {
        build_global_aggregate_from_flat(flat_vals, dims, ctx)
    }
}

fn create_local_array_alloc(
    internal_name: &str,
    array_type: Type,
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let alloc_inst = ctx.dfg_mut()?.new_value().alloc(array_type);
    ctx.dfg_mut()?
        .set_value_name(alloc_inst, Some(format!("@{}", internal_name)));
    ctx.push_inst(alloc_inst)?;
    Ok(alloc_inst)
}

/// 沿 getelemptr 链给每个元素生成一条 store
fn store_local_array_i32(
    alloc_inst: Value,
    vals: &[i32],
    dims: &[usize],
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    for (idx, val) in vals.iter().enumerate() {
        let ptr = build_element_ptr(alloc_inst, idx, dims, ctx)?;
        let int_val = ctx.dfg_mut()?.new_value().integer(*val);
        let store_inst = ctx.dfg_mut()?.new_value().store(int_val, ptr);
        ctx.push_inst(store_inst)?;
    }
    Ok(())
}

fn store_local_array_exprs(
    alloc_inst: Value,
    elems: &[Option<Expr>],
    dims: &[usize],
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    for (idx, elem) in elems.iter().enumerate() {
        let val = match elem {
            Some(expr) => expr.generate_ir(ctx)?,
            None => ctx.dfg_mut()?.new_value().integer(0),
        };
        let ptr = build_element_ptr(alloc_inst, idx, dims, ctx)?;
        let store_inst = ctx.dfg_mut()?.new_value().store(val, ptr);
        ctx.push_inst(store_inst)?;
    }
    Ok(())
}

fn build_element_ptr(
    alloc_inst: Value,
    flat_index: usize,
    dims: &[usize],
    ctx: &mut IrContext,
) -> Result<Value, CompilerError> {
    let mut ptr = alloc_inst;
    for index in linear_to_indices(flat_index, dims) {
        let idx_val = ctx.dfg_mut()?.new_value().integer(index as i32);
        let next_ptr = ctx.dfg_mut()?.new_value().get_elem_ptr(ptr, idx_val);
        ctx.push_inst(next_ptr)?;
        ptr = next_ptr;
    }
    Ok(ptr)
}

impl GenerateIR for FuncDef {
    type Output = ();

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        let mut param_tys = Vec::with_capacity(self.params.len());
        let mut param_data = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let param_ty = build_param_type(param, ctx)?;
            param_data.push((Some(format!("@{}", param.name)), param_ty.clone()));
            param_tys.push(param_ty);
        }
        let ret_ty = match self.ty {
            DataType::Int => Type::get_i32(),
            DataType::Void => Type::get_unit(),
        };

        let func_data =
            FunctionData::with_param_names(format!("@{}", self.name), param_data, ret_ty);
        let f = ctx.program.new_func(func_data);
        // 函数进全局作用域，内部名就是源码名；先插入，递归调用才能解析
        ctx.symbols
            .insert(&self.name, Symbol::Func(f))
            .map_err(|_| ctx.error_at_span(format!("`{}` already declared", self.name), self.span))?;

        ctx.current_func = Some(f);
        ctx.symbols.push();

        let entry_bb = ctx.new_bb(format!("%{}_entry", self.name))?;
        ctx.set_current_bb(entry_bb);
        ctx.entry_bb = Some(entry_bb);

        // 形参逐个落到局部槽里，之后按普通变量寻址
        let param_values: Vec<Value> = ctx.program.func(f).params().to_vec();
        for (idx, param) in self.params.iter().enumerate() {
            let internal_name = ctx.symbols.mint_internal_name(&param.name);
            let param_alloc = ctx.dfg_mut()?.new_value().alloc(param_tys[idx].clone());
            ctx.dfg_mut()?
                .set_value_name(param_alloc, Some(format!("@{}", internal_name)));
            ctx.push_inst(param_alloc)?;
            let store_inst = ctx
                .dfg_mut()?
                .new_value()
                .store(param_values[idx], param_alloc);
            ctx.push_inst(store_inst)?;
            ctx.symbols.insert(
                &param.name,
                Symbol::Var {
                    internal_name,
                    value: param_alloc,
                    ty: param_tys[idx].clone(),
                    is_const: false,
                },
            )?;
        }

        for item in &self.body {
            match item {
                BlockItem::Decl(decl) => decl.generate_ir(ctx)?,
                BlockItem::Stmt(stmt) => stmt.generate_ir(ctx)?,
            }
        }

        // 兜底返回：当前块此时一定没有终结指令
        let ret_inst = match self.ty {
            DataType::Int => {
                let zero = ctx.dfg_mut()?.new_value().integer(0);
                ctx.dfg_mut()?.new_value().ret(Some(zero))
            }
            DataType::Void => ctx.dfg_mut()?.new_value().ret(None),
        };
        ctx.push_inst(ret_inst)?;

        ctx.symbols.pop()?;
        ctx.current_func = None;
        ctx.current_bb = None;
        ctx.entry_bb = None;
        Ok(())
    }
}

impl GenerateIR for Stmt {
    type Output = ();

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        match self {
            Stmt::Return(expr) => generate_return_stmt_ir(expr, ctx),
            Stmt::Assign(lval, expr) => generate_assign_stmt_ir(lval, expr, ctx),
            Stmt::Block(block) => generate_block_stmt_ir(block, ctx),
            Stmt::Expr(expr) => generate_expr_stmt_ir(expr, ctx),
            Stmt::If {
                cond,
                then_stmt,
                else_stmt,
                ..
            } => generate_if_stmt_ir(cond, then_stmt, else_stmt.as_deref(), ctx),
            Stmt::While { cond, body, .. } => generate_while_stmt_ir(cond, body, ctx),
            Stmt::Break(span) => generate_break_stmt_ir(span, ctx),
            Stmt::Continue(span) => generate_continue_stmt_ir(span, ctx),
        }
    }
}

impl GenerateIR for Expr {
    type Output = Value;

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        // 能折叠就内联字面量
        if let Some(val) = inline_number(self, ctx) {
            return Ok(ctx.dfg_mut()?.new_value().integer(val));
        }
        match self {
            Expr::IntLiteral(n, _) => Ok(ctx.dfg_mut()?.new_value().integer(*n)),
            Expr::LVal(lval) => generate_lval_ir(lval, ctx),
            Expr::Assign(lval, expr, _) => generate_assign_ir(lval, expr, ctx),
            Expr::UnaryOp(op, expr, _) => generate_unary_op_ir(op, expr, ctx),
            Expr::BinaryOp(op, lhs, rhs, _) => generate_binary_op_ir(op, lhs, rhs, ctx),
            Expr::RelOp(op, lhs, rhs, _) => generate_rel_op_ir(op, lhs, rhs, ctx),
            Expr::EqOp(op, lhs, rhs, _) => generate_eq_op_ir(op, lhs, rhs, ctx),
            Expr::LAndOp(_, lhs, rhs, _) => generate_land_op_ir(lhs, rhs, ctx),
            Expr::LOrOp(_, lhs, rhs, _) => generate_lor_op_ir(lhs, rhs, ctx),
            Expr::Call(name, args, span) => generate_call_ir(name, args, *span, ctx),
        }
    }
}

impl GenerateIR for Decl {
    type Output = ();

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        match self {
            Decl::ConstDecl(decl) => decl.generate_ir(ctx),
            Decl::VarDecl(decl) => decl.generate_ir(ctx),
        }
    }
}

impl GenerateIR for ConstDecl {
    type Output = ();

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        let is_global = ctx.current_func.is_none();
        for def in &self.defs {
            if def.dims.is_empty() {
                // 标量常量：折叠后只进符号表，不产生 IR
                match &def.init {
                    ConstInitVal::Single(expr) => {
                        let value = evaluate_const_expr(expr, ctx)?;
                        ctx.symbols.insert(&def.name, Symbol::Const { value })?;
                    }
                    ConstInitVal::List(_) => {
                        return Err(ctx.error_at_span(
                            "Scalar const cannot be initialized with a list".to_string(),
                            def.span,
                        ));
                    }
                }
                continue;
            }

            let dims = evaluate_dims(&def.dims, ctx)?;
            let array_type = build_array_type_from_dims(&dims);
            let elems = match &def.init {
                ConstInitVal::List(elems) => elems,
                ConstInitVal::Single(_) => {
                    return Err(ctx.error_at_span(
                        "Const array must be initialized with a list".to_string(),
                        def.span,
                    ));
                }
            };
            let vals = eval_const_init_list(elems, &dims, ctx)?;
            let internal_name = ctx.symbols.mint_internal_name(&def.name);

            let alloc_value = if is_global {
                let init = build_global_array_init(&vals, &dims, &array_type, ctx)?;
                let global_alloc = ctx.program.new_value().global_alloc(init);
                ctx.program
                    .set_value_name(global_alloc, Some(format!("@{}", internal_name)));
                global_alloc
            } else {
                let alloc_inst = create_local_array_alloc(&internal_name, array_type.clone(), ctx)?;
                store_local_array_i32(alloc_inst, &vals, &dims, ctx)?;
                alloc_inst
            };
            ctx.symbols.insert(
                &def.name,
                Symbol::Var {
                    internal_name,
                    value: alloc_value,
                    ty: array_type,
                    is_const: true,
                },
            )?;
        }
        Ok(())
    }
}

impl GenerateIR for VarDecl {
    type Output = ();

    fn generate_ir(&self, ctx: &mut IrContext) -> Result<Self::Output, CompilerError> {
        let is_global = ctx.current_func.is_none();
        for def in &self.defs {
            if def.dims.is_empty() {
                generate_scalar_var(def, is_global, ctx)?;
            } else {
                generate_array_var(def, is_global, ctx)?;
            }
        }
        Ok(())
    }
}

fn generate_scalar_var(
    def: &VarDef,
    is_global: bool,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    let internal_name = ctx.symbols.mint_internal_name(&def.name);
    let alloc_value = if is_global {
        // 全局变量的初始化必须是常量
        let init_val = match &def.init {
            Some(InitVal::Single(expr)) => {
                let val = evaluate_const_expr(expr, ctx)?;
                ctx.program.new_value().integer(val)
            }
            Some(InitVal::List(_)) => {
                return Err(ctx.error_at_span(
                    "Scalar variable cannot be initialized with a list".to_string(),
                    def.span,
                ));
            }
            None => ctx.program.new_value().zero_init(Type::get_i32()),
        };
        let global_alloc = ctx.program.new_value().global_alloc(init_val);
        ctx.program
            .set_value_name(global_alloc, Some(format!("@{}", internal_name)));
        global_alloc
    } else {
        let alloc_inst = ctx.dfg_mut()?.new_value().alloc(Type::get_i32());
        ctx.dfg_mut()?
            .set_value_name(alloc_inst, Some(format!("@{}", internal_name)));
        ctx.push_inst(alloc_inst)?;
        match &def.init {
            Some(InitVal::Single(expr)) => {
                let init_val = expr.generate_ir(ctx)?;
                let store_inst = ctx.dfg_mut()?.new_value().store(init_val, alloc_inst);
                ctx.push_inst(store_inst)?;
            }
            Some(InitVal::List(_)) => {
                return Err(ctx.error_at_span(
                    "Scalar variable cannot be initialized with a list".to_string(),
                    def.span,
                ));
            }
            None => {}
        }
        alloc_inst
    };
    ctx.symbols.insert(
        &def.name,
        Symbol::Var {
            internal_name,
            value: alloc_value,
            ty: Type::get_i32(),
            is_const: false,
        },
    )
}

fn generate_array_var(
    def: &VarDef,
    is_global: bool,
    ctx: &mut IrContext,
) -> Result<(), CompilerError> {
    let dims = evaluate_dims(&def.dims, ctx)?;
    let array_type = build_array_type_from_dims(&dims);
    let internal_name = ctx.symbols.mint_internal_name(&def.name);

    let alloc_value = if is_global {
        let init_val = match &def.init {
            Some(InitVal::List(elems)) => {
                let flattened = eval_init_list(elems, &dims)?;
                let mut vals = Vec::with_capacity(flattened.len());
                for elem in flattened {
                    match elem {
                        Some(expr) => vals.push(evaluate_const_expr(&expr, ctx)?),
                        None => vals.push(0),
                    }
                }
                build_global_array_init(&vals, &dims, &array_type, ctx)?
            }
            Some(InitVal::Single(_)) => {
                return Err(ctx.error_at_span(
                    "Global array must be initialized with a list".to_string(),
                    def.span,
                ));
            }
            None => ctx.program.new_value().zero_init(array_type.clone()),
        };
        let global_alloc = ctx.program.new_value().global_alloc(init_val);
        ctx.program
            .set_value_name(global_alloc, Some(format!("@{}", internal_name)));
        global_alloc
    } else {
        let alloc_inst = create_local_array_alloc(&internal_name, array_type.clone(), ctx)?;
        match &def.init {
            Some(InitVal::List(elems)) => {
                let flattened = eval_init_list(elems, &dims)?;
                store_local_array_exprs(alloc_inst, &flattened, &dims, ctx)?;
            }
            Some(InitVal::Single(_)) => {
                return Err(ctx.error_at_span(
                    "Local array must be initialized with a list".to_string(),
                    def.span,
                ));
            }
            None => {}
        }
        alloc_inst
    };
    ctx.symbols.insert(
        &def.name,
        Symbol::Var {
            internal_name,
            value: alloc_value,
            ty: array_type,
            is_const: false,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(src_dims: &[usize], init: ConstInitVal) -> Result<Vec<i32>, CompilerError> {
        let ctx = IrContext::new(None);
        match init {
            ConstInitVal::List(elems) => eval_const_init_list(&elems, src_dims, &ctx),
            _ => panic!("test expects a list"),
        }
    }

    fn num(n: i32) -> ConstInitVal {
        ConstInitVal::Single(Expr::IntLiteral(n, Span::default()))
    }

    #[test]
    fn flat_initializer_is_zero_filled() {
        let vals = fold(&[4], ConstInitVal::List(vec![num(1), num(2)])).unwrap();
        assert_eq!(vals, vec![1, 2, 0, 0]);
    }

    #[test]
    fn nested_initializer_aligns_to_inner_dimension() {
        // int a[2][3] = {{1, 2}, 3}
        let vals = fold(
            &[2, 3],
            ConstInitVal::List(vec![ConstInitVal::List(vec![num(1), num(2)]), num(3)]),
        )
        .unwrap();
        assert_eq!(vals, vec![1, 2, 0, 3, 0, 0]);
    }

    #[test]
    fn misaligned_nested_list_is_an_error() {
        // int a[2][3] = {1, {2}} —— 嵌套列表起点 1 不在维度边界上
        let result = fold(
            &[2, 3],
            ConstInitVal::List(vec![num(1), ConstInitVal::List(vec![num(2)])]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn linear_index_round_trips_through_dims() {
        assert_eq!(linear_to_indices(0, &[2, 3]), vec![0, 0]);
        assert_eq!(linear_to_indices(4, &[2, 3]), vec![1, 1]);
        assert_eq!(linear_to_indices(5, &[2, 3]), vec![1, 2]);
        assert_eq!(linear_to_indices(7, &[2, 3, 4]), vec![0, 1, 3]);
    }
}
