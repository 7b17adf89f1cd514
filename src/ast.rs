//! Abstract syntax tree types for the supported SQL subset:
//! `CREATE TABLE`, `DROP TABLE`, `INSERT`, and `SELECT` with an optional
//! `WHERE`/`ORDER BY` and a full expression grammar.

use enum_as_inner::EnumAsInner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStatement {
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropStatement {
    pub table: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub rows: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum SelectItem {
    Star,
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub projection: Vec<SelectItem>,
    pub from: Vec<String>,
    pub r#where: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
}

#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum Statement {
    Create(CreateStatement),
    Drop(DropStatement),
    Insert(InsertStatement),
    Select(SelectStatement),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Identifier(String),
    IntLiteral(i64),
    StringLiteral(String),
    BoolLiteral(bool),
    NullLiteral,
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Identifier(name) => name.fmt(f),
            Expr::IntLiteral(x) => x.fmt(f),
            Expr::StringLiteral(s) => s.fmt(f),
            Expr::BoolLiteral(true) => "TRUE".fmt(f),
            Expr::BoolLiteral(false) => "FALSE".fmt(f),
            Expr::NullLiteral => "NULL".fmt(f),
            Expr::Unary(op, e) => write!(f, "{op}{e}"),
            Expr::Binary(lhs, op, rhs) => write!(f, "{lhs} {op} {rhs}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Neg => "-".fmt(f),
            UnaryOp::Not => "NOT ".fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use BinaryOp::*;
        match self {
            Add => "+".fmt(f),
            Sub => "-".fmt(f),
            Mul => "*".fmt(f),
            Div => "/".fmt(f),
            And => "AND".fmt(f),
            Or => "OR".fmt(f),
            Eq => "=".fmt(f),
            Ne => "!=".fmt(f),
            Lt => "<".fmt(f),
            Le => "<=".fmt(f),
            Gt => ">".fmt(f),
            Ge => ">=".fmt(f),
        }
    }
}
