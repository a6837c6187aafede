use koopa::ir::Program;

use crate::front::ast::CompUnit;
use crate::front::ir::{GenerateIR, IrContext};
use crate::utils::SourceMap;
use crate::CompilerError;

pub mod ast;
pub mod ir;
pub mod symbol;

pub fn generate_ir(ast: &CompUnit, source_map: Option<SourceMap>) -> Result<Program, CompilerError> {
    let mut ctx = IrContext::new(source_map);
    ast.generate_ir(&mut ctx)?;
    Ok(ctx.program)
}
