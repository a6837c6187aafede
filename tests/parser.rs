use compiler::front::ast::*;
use compiler::sysy;

fn parse(src: &str) -> CompUnit {
    sysy::CompUnitParser::new().parse(src).expect("parse failed")
}

fn main_body(unit: &CompUnit) -> &Block {
    match &unit.items[0] {
        GlobalItem::FuncDef(f) => &f.body,
        _ => panic!("expected a function"),
    }
}

#[test]
fn comments_and_whitespace_are_skipped() {
    let unit = parse(
        "// 行注释\nint main() { /* 块注释\n 跨行 */ return 0; // 尾注释\n }",
    );
    assert_eq!(unit.items.len(), 1);
}

#[test]
fn integer_literal_radixes() {
    let unit = parse("int main() { return 10; } int f() { return 010; } int g() { return 0x10; }");
    let values: Vec<i32> = unit
        .items
        .iter()
        .map(|item| match item {
            GlobalItem::FuncDef(f) => match &f.body[0] {
                BlockItem::Stmt(Stmt::Return(Some(Expr::IntLiteral(n, _)))) => *n,
                _ => panic!("expected a literal return"),
            },
            _ => panic!("expected a function"),
        })
        .collect();
    assert_eq!(values, vec![10, 8, 16]);
}

#[test]
fn else_binds_to_the_nearest_if() {
    let unit = parse("int main() { if (1) if (0) return 1; else return 2; return 3; }");
    let body = main_body(&unit);
    match &body[0] {
        BlockItem::Stmt(Stmt::If {
            then_stmt,
            else_stmt,
            ..
        }) => {
            // 外层 if 没有 else
            assert!(else_stmt.is_none());
            match then_stmt.as_ref() {
                Stmt::If { else_stmt, .. } => assert!(else_stmt.is_some()),
                _ => panic!("expected the inner if"),
            }
        }
        _ => panic!("expected an if statement"),
    }
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let unit = parse("int main() { return 2 + 3 * 4; }");
    let body = main_body(&unit);
    match &body[0] {
        BlockItem::Stmt(Stmt::Return(Some(Expr::BinaryOp(BinaryOp::Add, lhs, rhs, _)))) => {
            assert!(matches!(lhs.as_ref(), Expr::IntLiteral(2, _)));
            assert!(matches!(rhs.as_ref(), Expr::BinaryOp(BinaryOp::Mul, _, _, _)));
        }
        other => panic!("unexpected statement: {:?}", other),
    }
}

#[test]
fn array_parameter_first_dimension_is_elided() {
    let unit = parse("int sum(int n, int p[], int q[][5]) { return 0; }");
    match &unit.items[0] {
        GlobalItem::FuncDef(f) => {
            assert!(!f.params[0].is_array);
            assert!(f.params[1].is_array);
            assert!(f.params[1].dims.is_empty());
            assert!(f.params[2].is_array);
            assert_eq!(f.params[2].dims.len(), 1);
        }
        _ => panic!("expected a function"),
    }
}

#[test]
fn assignment_expression_parses_in_parentheses() {
    let unit = parse("int main() { int x = 0; if (1 && (x = 5)) {} return x; }");
    let body = main_body(&unit);
    match &body[1] {
        BlockItem::Stmt(Stmt::If { cond, .. }) => match cond {
            Expr::LAndOp(_, _, rhs, _) => {
                assert!(matches!(rhs.as_ref(), Expr::Assign(_, _, _)));
            }
            other => panic!("unexpected condition: {:?}", other),
        },
        other => panic!("unexpected statement: {:?}", other),
    }
}

#[test]
fn assignment_statement_still_parses() {
    let unit = parse("int main() { int x = 0; x = x + 1; return x; }");
    let body = main_body(&unit);
    assert!(matches!(&body[1], BlockItem::Stmt(Stmt::Assign(_, _))));
}

#[test]
fn syntax_error_is_reported() {
    assert!(sysy::CompUnitParser::new().parse("int main() { return 0 }").is_err());
    assert!(sysy::CompUnitParser::new().parse("int 1x;").is_err());
}
