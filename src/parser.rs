//! Pest-generated parser for the grammar in `sql.pest`.

use pest::Parser;

#[derive(Parser)]
#[grammar = "sql.pest"]
pub struct SQLParser;

/// Parses one statement and returns the top-level `statement` pair's single
/// child (a `create_stmt`/`drop_stmt`/`insert_stmt`/`select_stmt` pair).
pub fn parse_statement(input: &str) -> Result<pest::iterators::Pair<'_, Rule>, pest::error::Error<Rule>> {
    let mut pairs = SQLParser::parse(Rule::statement, input)?;
    let statement = pairs.next().expect("statement rule always produces one pair");
    Ok(statement
        .into_inner()
        .next()
        .expect("statement always wraps exactly one alternative"))
}
