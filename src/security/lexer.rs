//! Lexical layer shared by the query guards.
//!
//! Wraps `sqlparser`'s tokenizer (BigQuery dialect) and reduces its token
//! vocabulary to the handful of kinds the guards care about. Tokenization is
//! flat: nesting (subqueries, CTE bodies, parenthesized expressions) needs no
//! special handling because every token of every statement is visited.

use super::validation::GuardViolation;
use sqlparser::dialect::BigQueryDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace, Word};
use std::fmt;

/// Coarse classification of a lexical token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted word recognised as a SQL keyword (`SELECT`, `FROM`, `TABLE`, ...).
    Keyword,
    /// Unquoted word that is not a keyword.
    Identifier,
    /// Back-tick quoted identifier. `text` holds the unquoted content.
    QuotedIdentifier,
    /// String, byte, raw or numeric literal.
    Literal,
    /// Query parameter such as `@start_date` or `?`.
    Parameter,
    /// Spaces, tabs, newlines.
    Whitespace,
    /// `--`, `#` or `/* */` comment.
    Comment,
    /// Statement separator `;`.
    Semicolon,
    /// Path separator `.`.
    Period,
    /// Any other operator or punctuation.
    Punctuation,
}

/// 1-based source position of a token start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u64,
    pub column: u64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A single token of SQL source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlToken {
    pub kind: TokenKind,
    pub text: String,
    pub position: Position,
}

impl SqlToken {
    /// Whitespace and comments are insignificant: they never take part in
    /// statement-type or dataset checks.
    pub fn is_significant(&self) -> bool {
        !matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    /// Unquoted word (keyword or plain identifier).
    pub fn is_bare_word(&self) -> bool {
        matches!(self.kind, TokenKind::Keyword | TokenKind::Identifier)
    }

    /// Anything that can be one part of a dotted name.
    pub fn is_name_part(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Keyword | TokenKind::Identifier | TokenKind::QuotedIdentifier
        )
    }

    /// Case-insensitive comparison of an unquoted word.
    pub fn is_word(&self, word: &str) -> bool {
        self.is_bare_word() && self.text.eq_ignore_ascii_case(word)
    }

    /// Case-insensitive membership test of an unquoted word.
    pub fn is_any_word(&self, words: &[&str]) -> bool {
        self.is_bare_word() && words.iter().any(|w| self.text.eq_ignore_ascii_case(w))
    }

    pub fn is_punct(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.text == symbol
    }
}

/// Tokenize SQL source into [`SqlToken`]s.
///
/// Fails with [`GuardViolation::Unparseable`] when the tokenizer cannot read
/// the input, e.g. an unterminated string literal or block comment.
pub fn tokenize(sql: &str) -> Result<Vec<SqlToken>, GuardViolation> {
    let dialect = BigQueryDialect {};
    let raw = Tokenizer::new(&dialect, sql)
        .tokenize_with_location()
        .map_err(|e| GuardViolation::Unparseable(e.to_string()))?;

    let mut tokens: Vec<SqlToken> = Vec::with_capacity(raw.len());
    let mut pending_at: Option<Position> = None;

    for spanned in raw {
        let position = Position {
            line: spanned.span.start.line,
            column: spanned.span.start.column,
        };

        // `@name` may arrive as an at-sign followed by a word.
        if let Some(at) = pending_at.take() {
            if let Token::Word(w) = &spanned.token {
                tokens.push(SqlToken {
                    kind: TokenKind::Parameter,
                    text: format!("@{}", w.value),
                    position: at,
                });
                continue;
            }
            tokens.push(SqlToken {
                kind: TokenKind::Punctuation,
                text: "@".to_string(),
                position: at,
            });
        }

        match &spanned.token {
            Token::EOF => {}
            Token::AtSign => pending_at = Some(position),
            other => tokens.push(classify(other, position)),
        }
    }

    if let Some(at) = pending_at {
        tokens.push(SqlToken {
            kind: TokenKind::Punctuation,
            text: "@".to_string(),
            position: at,
        });
    }

    Ok(tokens)
}

fn classify(token: &Token, position: Position) -> SqlToken {
    let (kind, text) = match token {
        Token::Word(w) => classify_word(w),
        Token::Whitespace(Whitespace::SingleLineComment { .. })
        | Token::Whitespace(Whitespace::MultiLineComment(_)) => {
            (TokenKind::Comment, token.to_string())
        }
        Token::Whitespace(_) => (TokenKind::Whitespace, token.to_string()),
        Token::SemiColon => (TokenKind::Semicolon, ";".to_string()),
        Token::Period => (TokenKind::Period, ".".to_string()),
        Token::Placeholder(p) => (TokenKind::Parameter, p.clone()),
        Token::Number(..)
        | Token::SingleQuotedString(_)
        | Token::DoubleQuotedString(_)
        | Token::TripleSingleQuotedString(_)
        | Token::TripleDoubleQuotedString(_)
        | Token::SingleQuotedByteStringLiteral(_)
        | Token::DoubleQuotedByteStringLiteral(_)
        | Token::SingleQuotedRawStringLiteral(_)
        | Token::DoubleQuotedRawStringLiteral(_)
        | Token::NationalStringLiteral(_)
        | Token::HexStringLiteral(_) => (TokenKind::Literal, token.to_string()),
        other => (TokenKind::Punctuation, other.to_string()),
    };

    SqlToken {
        kind,
        text,
        position,
    }
}

fn classify_word(word: &Word) -> (TokenKind, String) {
    match word.quote_style {
        Some(_) => (TokenKind::QuotedIdentifier, word.value.clone()),
        None if word.value.starts_with('@') => (TokenKind::Parameter, word.value.clone()),
        None if word.keyword != Keyword::NoKeyword => (TokenKind::Keyword, word.value.clone()),
        None => (TokenKind::Identifier, word.value.clone()),
    }
}

/// Split a token stream into statements on top-level semicolons.
///
/// Always yields at least one (possibly empty) statement. A semicolon inside
/// a string or comment is part of that token and never splits.
pub fn split_statements(tokens: &[SqlToken]) -> Vec<&[SqlToken]> {
    tokens
        .split(|t| t.kind == TokenKind::Semicolon)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<(TokenKind, String)> {
        tokenize(sql)
            .unwrap()
            .into_iter()
            .filter(|t| t.kind != TokenKind::Whitespace)
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let tokens = kinds("SELECT field1 FROM t");
        assert_eq!(tokens[0], (TokenKind::Keyword, "SELECT".to_string()));
        assert_eq!(tokens[1], (TokenKind::Identifier, "field1".to_string()));
        assert_eq!(tokens[2], (TokenKind::Keyword, "FROM".to_string()));
    }

    #[test]
    fn test_backtick_path_is_single_quoted_identifier() {
        let tokens = kinds("SELECT * FROM `project.dataset.table`");
        let last = tokens.last().unwrap();
        assert_eq!(last.0, TokenKind::QuotedIdentifier);
        assert_eq!(last.1, "project.dataset.table");
    }

    #[test]
    fn test_string_literal_keeps_its_content() {
        let tokens = kinds("SELECT 'INSERT INTO x' AS msg");
        assert_eq!(tokens[1].0, TokenKind::Literal);
        assert!(tokens[1].1.contains("INSERT INTO x"));
    }

    #[test]
    fn test_comments_are_classified() {
        let tokens = kinds("-- DROP this\nSELECT /* UPDATE */ 1");
        assert_eq!(tokens[0].0, TokenKind::Comment);
        assert_eq!(tokens[2].0, TokenKind::Comment);
        assert!(tokens[2].1.contains("UPDATE"));
    }

    #[test]
    fn test_semicolon_inside_string_does_not_split() {
        let tokens = tokenize("SELECT 'a;b'; SELECT 2").unwrap();
        let statements = split_statements(&tokens);
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn test_split_always_yields_a_statement() {
        let tokens = tokenize("").unwrap();
        assert_eq!(split_statements(&tokens).len(), 1);
    }

    #[test]
    fn test_query_parameter() {
        let tokens = kinds("SELECT * FROM t WHERE d >= @start_date");
        let last = tokens.last().unwrap();
        assert_eq!(last.0, TokenKind::Parameter);
        assert_eq!(last.1, "@start_date");
    }

    #[test]
    fn test_positions_are_one_based() {
        let tokens = tokenize("SELECT\n  id").unwrap();
        assert_eq!(tokens[0].position, Position { line: 1, column: 1 });
        let id = tokens.iter().find(|t| t.text == "id").unwrap();
        assert_eq!(id.position, Position { line: 2, column: 3 });
    }

    #[test]
    fn test_unterminated_string_is_unparseable() {
        let err = tokenize("SELECT 'oops").unwrap_err();
        assert!(matches!(err, GuardViolation::Unparseable(_)));
    }

    #[test]
    fn test_word_helpers() {
        let tokens = tokenize("from").unwrap();
        assert!(tokens[0].is_word("FROM"));
        assert!(tokens[0].is_any_word(&["JOIN", "FROM"]));
        assert!(!tokens[0].is_punct(","));
    }
}
