use koopa::back::KoopaGenerator;
use koopa::ir::Type;
use lalrpop_util::lexer::Token;
use lalrpop_util::ParseError;
use std::fs::read_to_string;

use compiler::back::generate_asm;
use compiler::front::generate_ir;
use compiler::sysy;
use compiler::utils::args::Params;
use compiler::utils::logger::print_error_and_exit;
use compiler::utils::SourceMap;
use compiler::CompilerError;

fn main() {
    if let Err(e) = run() {
        print_error_and_exit(&e, 1);
    }
}

fn format_expected(expected: Vec<String>) -> String {
    if expected.is_empty() {
        "no expected tokens".to_string()
    } else {
        expected.join(", ")
    }
}

fn format_parse_error(source_map: &SourceMap, err: ParseError<usize, Token<'_>, &str>) -> String {
    match err {
        ParseError::InvalidToken { location } => {
            format!("Invalid token at {}", source_map.format_location(location))
        }
        ParseError::UnrecognizedEOF { location, expected } => {
            let expected = format_expected(expected);
            format!(
                "Unexpected end of file at {}. Expected: {}",
                source_map.format_location(location),
                expected
            )
        }
        ParseError::UnrecognizedToken { token, expected } => {
            let (start, tok, _end) = token;
            let expected = format_expected(expected);
            format!(
                "Unrecognized token {:?} at {}. Expected: {}",
                tok,
                source_map.format_location(start),
                expected
            )
        }
        ParseError::ExtraToken { token } => {
            let (start, tok, _end) = token;
            format!(
                "Extra token {:?} at {}",
                tok,
                source_map.format_location(start)
            )
        }
        ParseError::User { error } => {
            format!("Parse error: {}", error)
        }
    }
}

fn run() -> Result<(), CompilerError> {
    let params = Params::from_args()?;

    // 目标为 riscv32，指针大小 4 字节
    if params.riscv || params.perf {
        Type::set_ptr_size(4);
    }

    let input = read_to_string(&params.input)?;
    let source_map = SourceMap::new(&input);

    let ast = sysy::CompUnitParser::new()
        .parse(&input)
        .map_err(|e| CompilerError::ParseError(format_parse_error(&source_map, e)))?;

    let program = generate_ir(&ast, Some(source_map))?;

    if params.koopa {
        KoopaGenerator::from_path(&params.output)
            .map_err(|e| {
                CompilerError::CodeGenerationError(format!("Failed to create output file: {}", e))
            })?
            .generate_on(&program)
            .map_err(|e| {
                CompilerError::CodeGenerationError(format!("Failed to generate Koopa IR: {}", e))
            })?;
        return Ok(());
    }

    let asm = generate_asm(&program)?;
    std::fs::write(&params.output, asm)?;
    Ok(())
}
