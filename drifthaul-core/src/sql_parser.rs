//! Lightweight statement splitting for drivers that cannot submit a script as
//! one call.
//!
//! Scripts are split on top-level semicolons found by the tokenizer, and each
//! statement keeps its original text so engine-specific syntax reaches the
//! engine unchanged.

use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect as SqlDialect, DuckDbDialect, SnowflakeDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};

use crate::dialect::Dialect;

/// Leading keywords of statements that return rows, for text the parser
/// does not understand.
const QUERY_KEYWORDS: [&str; 11] = [
    "SELECT", "WITH", "FROM", "VALUES", "SHOW", "DESCRIBE", "SUMMARIZE", "PRAGMA", "EXPLAIN", "CALL",
    "TABLE",
];

/// One statement of a split script.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    sql: String,
    is_query: bool,
}

impl ParsedStatement {
    /// Check if this statement returns a result set.
    pub fn is_query(&self) -> bool {
        self.is_query
    }

    /// Statement text as written in the script, without the separator.
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

fn sql_dialect(dialect: Dialect) -> Box<dyn SqlDialect> {
    match dialect {
        Dialect::Snowflake => Box::new(SnowflakeDialect),
        Dialect::DuckDb => Box::new(DuckDbDialect),
    }
}

/// Split a script into statements in textual order.
///
/// Separators inside string literals and comments do not split. Pieces that
/// hold only whitespace or comments are dropped. Only tokenizer errors, such
/// as an unterminated literal, fail the split.
pub fn split_statements(script: &str, dialect: Dialect) -> Result<Vec<ParsedStatement>, String> {
    let sql_dialect = sql_dialect(dialect);
    let tokens = Tokenizer::new(sql_dialect.as_ref(), script)
        .tokenize_with_location()
        .map_err(|err| format!("failed to tokenize script: {err}"))?;
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(script.match_indices('\n').map(|(index, _)| index + 1))
        .collect();

    let mut statements = Vec::new();
    let mut first: Option<&TokenWithSpan> = None;
    for token in &tokens {
        match &token.token {
            Token::SemiColon => {
                if let Some(head) = first.take() {
                    let from = byte_offset(script, &line_starts, head.span.start);
                    let to = byte_offset(script, &line_starts, token.span.start);
                    statements.push(piece(sql_dialect.as_ref(), head, &script[from..to]));
                }
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => {
                if first.is_none() {
                    first = Some(token);
                }
            }
        }
    }
    if let Some(head) = first {
        let from = byte_offset(script, &line_starts, head.span.start);
        statements.push(piece(sql_dialect.as_ref(), head, &script[from..]));
    }
    Ok(statements)
}

fn piece(dialect: &dyn SqlDialect, head: &TokenWithSpan, text: &str) -> ParsedStatement {
    let sql = text.trim_end().to_string();
    let is_query = match Parser::parse_sql(dialect, &sql) {
        Ok(parsed) if parsed.len() == 1 => returns_rows(&parsed[0]),
        _ => match &head.token {
            Token::Word(word) => QUERY_KEYWORDS.contains(&word.value.to_ascii_uppercase().as_str()),
            Token::LParen => true,
            _ => false,
        },
    };
    ParsedStatement { sql, is_query }
}

fn returns_rows(statement: &Statement) -> bool {
    matches!(
        statement,
        Statement::Query(_)
            | Statement::Call(_)
            | Statement::ShowTables { .. }
            | Statement::ShowColumns { .. }
            | Statement::ShowCreate { .. }
            | Statement::ShowVariable { .. }
            | Statement::ShowVariables { .. }
            | Statement::Explain { .. }
            | Statement::ExplainTable { .. }
            | Statement::Pragma { .. }
    )
}

/// Byte offset of a 1-based line and character column.
fn byte_offset(script: &str, line_starts: &[usize], location: Location) -> usize {
    let Some(&start) = line_starts.get((location.line as usize).saturating_sub(1)) else {
        return script.len();
    };
    script[start..]
        .char_indices()
        .nth((location.column as usize).saturating_sub(1))
        .map(|(index, _)| start + index)
        .unwrap_or(script.len())
}
