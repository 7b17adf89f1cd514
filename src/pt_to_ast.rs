//! Converts a pest parse tree (`crate::parser`, grammar in `sql.pest`) into
//! the `ast` types. A pest parse tree has one rule enum for every terminal
//! and non-terminal in the grammar; the AST collapses the precedence-climbing
//! rules (`or_expr`/`and_expr`/`cmp_expr`/`add_expr`/`mul_expr`/`primary`)
//! into a single recursive `Expr` tree and discards lexical detail like
//! keyword case.

use anyhow::{bail, Result};
use pest::iterators::Pair;

use crate::ast;
use crate::parser::Rule;

fn binary_op_text(text: &str) -> ast::BinaryOp {
    match text {
        "+" => ast::BinaryOp::Add,
        "-" => ast::BinaryOp::Sub,
        "*" => ast::BinaryOp::Mul,
        "/" => ast::BinaryOp::Div,
        "=" => ast::BinaryOp::Eq,
        "!=" | "<>" => ast::BinaryOp::Ne,
        "<" => ast::BinaryOp::Lt,
        "<=" => ast::BinaryOp::Le,
        ">" => ast::BinaryOp::Gt,
        ">=" => ast::BinaryOp::Ge,
        other => unreachable!("unexpected operator token {other:?}"),
    }
}

fn parse_literal(pair: Pair<'_, Rule>) -> ast::Expr {
    match pair.as_rule() {
        Rule::null_literal => ast::Expr::NullLiteral,
        Rule::true_literal => ast::Expr::BoolLiteral(true),
        Rule::false_literal => ast::Expr::BoolLiteral(false),
        Rule::integer_literal => ast::Expr::IntLiteral(pair.as_str().parse::<i64>().unwrap()),
        Rule::single_quoted_string => ast::Expr::StringLiteral(remove_single_quoting(pair.as_str())),
        other => unreachable!("parse_literal does not handle {other:?}"),
    }
}

/// Strips the surrounding quotes of a SQL single-quoted string literal and
/// unescapes `''` to `'`.
fn remove_single_quoting(s: &str) -> String {
    let inner = &s[1..s.len() - 1];
    inner.replace("''", "'")
}

#[test]
fn test_remove_single_quoting() {
    let cases = [("''", ""), ("'hi'", "hi"), ("'h''i'", "h'i"), ("'h''''i'", "h''i")];
    for (input, expected) in cases {
        assert_eq!(remove_single_quoting(input), expected);
    }
}

/// Left-folds a `head (op_rule rhs)*` chain into a left-associative binary
/// tree, as produced by `and_expr`/`or_expr`/`add_expr`/`mul_expr`.
fn left_assoc_chain(mut pairs: impl Iterator<Item = Pair<'_, Rule>>, logical_op: Option<ast::BinaryOp>) -> ast::Expr {
    let mut expr = parse_expr(pairs.next().expect("chain rule always has a first operand"));
    loop {
        let Some(op_or_next) = pairs.next() else { break };
        let op = match logical_op {
            Some(op) => op,
            None => binary_op_text(op_or_next.as_str()),
        };
        let rhs = if logical_op.is_some() {
            parse_expr(op_or_next)
        } else {
            parse_expr(pairs.next().expect("binary op token always has a right operand"))
        };
        expr = ast::Expr::Binary(Box::new(expr), op, Box::new(rhs));
    }
    expr
}

pub fn parse_expr(pair: Pair<'_, Rule>) -> ast::Expr {
    match pair.as_rule() {
        Rule::expr => parse_expr(pair.into_inner().next().unwrap()),
        Rule::or_expr => left_assoc_chain(pair.into_inner(), Some(ast::BinaryOp::Or)),
        Rule::and_expr => left_assoc_chain(pair.into_inner(), Some(ast::BinaryOp::And)),
        Rule::cmp_expr => {
            let mut inner = pair.into_inner();
            let lhs = parse_expr(inner.next().unwrap());
            match (inner.next(), inner.next()) {
                (Some(op), Some(rhs)) => {
                    ast::Expr::Binary(Box::new(lhs), binary_op_text(op.as_str()), Box::new(parse_expr(rhs)))
                }
                _ => lhs,
            }
        }
        Rule::add_expr | Rule::mul_expr => left_assoc_chain(pair.into_inner(), None),
        Rule::unary_expr => {
            let text = pair.as_str().trim_start();
            let op = if text.to_ascii_uppercase().starts_with("NOT") {
                ast::UnaryOp::Not
            } else {
                ast::UnaryOp::Neg
            };
            let operand = parse_expr(pair.into_inner().next().unwrap());
            ast::Expr::Unary(op, Box::new(operand))
        }
        Rule::primary => parse_expr(pair.into_inner().next().unwrap()),
        Rule::literal => parse_literal(pair.into_inner().next().unwrap()),
        Rule::identifier => ast::Expr::Identifier(pair.as_str().to_string()),
        other => unreachable!("parse_expr does not handle {other:?}"),
    }
}

pub fn pt_create_statement_to_ast(input: &str) -> Result<ast::CreateStatement> {
    let create_stmt = crate::parser::parse_statement(input)?;
    let mut table = String::new();
    let mut columns = vec![];
    for c in create_stmt.into_inner() {
        match c.as_rule() {
            Rule::identifier => table = c.as_str().to_string(),
            Rule::column_defs => {
                for column_def in c.into_inner() {
                    let mut parts = column_def.into_inner();
                    let name = parts.next().unwrap().as_str().to_string();
                    let type_name = parts.next().unwrap().as_str().to_string();
                    columns.push(ast::ColumnDef { name, type_name });
                }
            }
            Rule::EOI => (),
            other => bail!("unexpected syntax in CREATE TABLE: {other:?}"),
        }
    }
    Ok(ast::CreateStatement { table, columns })
}

#[test]
fn test_pt_create_statement_to_ast() {
    let input = "CREATE TABLE t (a int64, b varchar(16))";
    let actual = pt_create_statement_to_ast(input).unwrap();
    assert_eq!(
        actual,
        ast::CreateStatement {
            table: "t".to_string(),
            columns: vec![
                ast::ColumnDef { name: "a".to_string(), type_name: "int64".to_string() },
                ast::ColumnDef { name: "b".to_string(), type_name: "varchar(16)".to_string() },
            ],
        }
    );
}

pub fn pt_drop_statement_to_ast(input: &str) -> Result<ast::DropStatement> {
    let drop_stmt = crate::parser::parse_statement(input)?;
    let mut table = String::new();
    for c in drop_stmt.into_inner() {
        match c.as_rule() {
            Rule::identifier => table = c.as_str().to_string(),
            Rule::EOI => (),
            other => bail!("unexpected syntax in DROP TABLE: {other:?}"),
        }
    }
    Ok(ast::DropStatement { table })
}

#[test]
fn test_pt_drop_statement_to_ast() {
    let actual = pt_drop_statement_to_ast("DROP TABLE t").unwrap();
    assert_eq!(actual, ast::DropStatement { table: "t".to_string() });
}

pub fn pt_insert_statement_to_ast(input: &str) -> Result<ast::InsertStatement> {
    let insert_stmt = crate::parser::parse_statement(input)?;
    let mut table = String::new();
    let mut rows = vec![];
    for c in insert_stmt.into_inner() {
        match c.as_rule() {
            Rule::identifier => table = c.as_str().to_string(),
            Rule::expr_list_list => {
                for expr_list in c.into_inner() {
                    let row = expr_list.into_inner().map(parse_expr).collect();
                    rows.push(row);
                }
            }
            Rule::EOI => (),
            other => bail!("unexpected syntax in INSERT: {other:?}"),
        }
    }
    Ok(ast::InsertStatement { table, rows })
}

#[test]
fn test_pt_insert_statement_to_ast() {
    let actual = pt_insert_statement_to_ast("INSERT t VALUES (1, 'two'), (3, 'four')").unwrap();
    assert_eq!(actual.table, "t");
    assert_eq!(
        actual.rows,
        vec![
            vec![ast::Expr::IntLiteral(1), ast::Expr::StringLiteral("two".to_string())],
            vec![ast::Expr::IntLiteral(3), ast::Expr::StringLiteral("four".to_string())],
        ]
    );
}

pub fn pt_select_statement_to_ast(input: &str) -> Result<ast::SelectStatement> {
    let select_stmt = crate::parser::parse_statement(input)?;
    let mut projection = vec![];
    let mut from = vec![];
    let mut r#where = None;
    let mut order_by = vec![];
    for s in select_stmt.into_inner() {
        match s.as_rule() {
            Rule::select_items => {
                for item in s.into_inner() {
                    let inner = item.into_inner().next().unwrap();
                    projection.push(match inner.as_rule() {
                        Rule::star => ast::SelectItem::Star,
                        Rule::expr => ast::SelectItem::Expr(parse_expr(inner)),
                        other => bail!("unexpected syntax in select item: {other:?}"),
                    });
                }
            }
            Rule::from_clause => {
                for t in s.into_inner() {
                    from.push(t.as_str().to_string());
                }
            }
            Rule::where_clause => {
                r#where = Some(parse_expr(s.into_inner().next().unwrap()));
            }
            Rule::order_by_clause => {
                for item in s.into_inner() {
                    let mut parts = item.into_inner();
                    let expr = parse_expr(parts.next().unwrap());
                    let desc = matches!(parts.next().map(|p| p.as_rule()), Some(Rule::desc));
                    order_by.push(ast::OrderByItem { expr, desc });
                }
            }
            Rule::EOI => (),
            other => bail!("unexpected syntax in SELECT: {other:?}"),
        }
    }
    Ok(ast::SelectStatement { projection, from, r#where, order_by })
}

#[test]
fn test_pt_select_statement_to_ast_star() {
    let actual = pt_select_statement_to_ast("SELECT * FROM t").unwrap();
    assert_eq!(actual.projection, vec![ast::SelectItem::Star]);
    assert_eq!(actual.from, vec!["t".to_string()]);
    assert!(actual.r#where.is_none());
    assert!(actual.order_by.is_empty());
}

#[test]
fn test_pt_select_statement_to_ast_where_and_order_by() {
    let actual = pt_select_statement_to_ast("select a, b from t where a > 1 and b < 9 order by a desc, b").unwrap();
    assert_eq!(
        actual.projection,
        vec![
            ast::SelectItem::Expr(ast::Expr::Identifier("a".to_string())),
            ast::SelectItem::Expr(ast::Expr::Identifier("b".to_string())),
        ]
    );
    assert_eq!(
        actual.r#where,
        Some(ast::Expr::Binary(
            Box::new(ast::Expr::Binary(
                Box::new(ast::Expr::Identifier("a".to_string())),
                ast::BinaryOp::Gt,
                Box::new(ast::Expr::IntLiteral(1)),
            )),
            ast::BinaryOp::And,
            Box::new(ast::Expr::Binary(
                Box::new(ast::Expr::Identifier("b".to_string())),
                ast::BinaryOp::Lt,
                Box::new(ast::Expr::IntLiteral(9)),
            )),
        ))
    );
    assert_eq!(actual.order_by.len(), 2);
    assert!(actual.order_by[0].desc);
    assert!(!actual.order_by[1].desc);
}

#[test]
fn test_pt_select_statement_to_ast_no_from() {
    // `SELECT 1 + 2` is valid without a FROM clause: it evaluates the
    // projection against a single synthetic empty row.
    let actual = pt_select_statement_to_ast("SELECT 1 + 2").unwrap();
    assert!(actual.from.is_empty());
    assert_eq!(
        actual.projection,
        vec![ast::SelectItem::Expr(ast::Expr::Binary(
            Box::new(ast::Expr::IntLiteral(1)),
            ast::BinaryOp::Add,
            Box::new(ast::Expr::IntLiteral(2)),
        ))]
    );
}

pub fn parse_statement_to_ast(input: &str) -> Result<ast::Statement> {
    let first_word = input.trim_start().split_whitespace().next().unwrap_or("").to_ascii_uppercase();
    match first_word.as_str() {
        "CREATE" => Ok(ast::Statement::Create(pt_create_statement_to_ast(input)?)),
        "DROP" => Ok(ast::Statement::Drop(pt_drop_statement_to_ast(input)?)),
        "INSERT" => Ok(ast::Statement::Insert(pt_insert_statement_to_ast(input)?)),
        "SELECT" => Ok(ast::Statement::Select(pt_select_statement_to_ast(input)?)),
        _ => bail!("expected CREATE, DROP, INSERT or SELECT, got {input:?}"),
    }
}
