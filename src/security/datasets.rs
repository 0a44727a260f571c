//! Dataset-reference guard.
//!
//! Every dotted name of two or three parts is a candidate table path: two
//! parts name `dataset.table`, three name `project.dataset.table`. Other
//! lengths (bare names, `INFORMATION_SCHEMA` views) carry no dataset and are
//! ignored.
//!
//! A candidate is dropped only when its first part is a range variable the
//! query declares itself: a table alias, a table name, or a CTE name. That
//! keeps `alias.column` out of the check without ever deciding which names
//! are tables by their position, so a path the scan does not understand is
//! still checked. A path read in table position is never dropped, whatever
//! aliases the query declares.

use super::lexer::{tokenize, SqlToken, TokenKind};
use super::validation::{GuardViolation, ValidationVerdict};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

/// Words after which the next name is a table.
const TABLE_INTRODUCERS: [&str; 6] = ["JOIN", "INTO", "TABLE", "UPDATE", "MERGE", "USING"];

/// Words that close a `FROM` list.
const CLAUSE_ENDERS: [&str; 14] = [
    "SELECT", "WITH", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "QUALIFY", "WINDOW", "UNION",
    "INTERSECT", "EXCEPT", "SET", "VALUES",
];

/// Words that may sit between an introducer and its table.
const TABLE_MODIFIERS: [&str; 3] = ["IF", "NOT", "EXISTS"];

/// Words that can follow a table without being its alias.
const NOT_ALIASES: [&str; 44] = [
    "AS", "ON", "USING", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "NATURAL",
    "LATERAL", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "QUALIFY", "WINDOW", "UNION",
    "INTERSECT", "EXCEPT", "SELECT", "FROM", "WITH", "SET", "VALUES", "FOR", "TABLESAMPLE",
    "PIVOT", "UNPIVOT", "AND", "OR", "NOT", "IS", "IN", "BETWEEN", "LIKE", "WHEN", "THEN",
    "ELSE", "END", "OFFSET", "DEFAULT",
];

/// Built-in function namespaces (`SAFE.DIVIDE(...)`, `NET.HOST(...)`).
const FUNCTION_NAMESPACES: [&str; 7] = [
    "SAFE",
    "NET",
    "KEYS",
    "AEAD",
    "HLL_COUNT",
    "KLL_QUANTILES",
    "ML",
];

/// Which datasets queries may reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DatasetAllowList {
    /// Every dataset is allowed.
    #[default]
    Unrestricted,
    /// Only these dataset names (case-sensitive).
    Only(BTreeSet<String>),
}

/// Error returned when an allow-list string names no dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAllowListError {
    input: String,
}

impl fmt::Display for ParseAllowListError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dataset allow-list '{}' names no dataset; leave it unset or use '*' to allow all",
            self.input
        )
    }
}

impl std::error::Error for ParseAllowListError {}

impl FromStr for DatasetAllowList {
    type Err = ParseAllowListError;

    /// Parse a comma-separated list. Empty input or `*` means unrestricted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Self::Unrestricted);
        }

        let names: BTreeSet<String> = trimmed
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();

        if names.is_empty() {
            return Err(ParseAllowListError {
                input: s.to_string(),
            });
        }

        Ok(Self::Only(names))
    }
}

impl DatasetAllowList {
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(names.into_iter().map(Into::into).collect())
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Unrestricted)
    }

    /// Whether a dataset may be referenced.
    pub fn permits(&self, dataset: &str) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Only(names) => names.contains(dataset),
        }
    }

    /// The allowed names, or `None` when unrestricted.
    pub fn datasets(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Unrestricted => None,
            Self::Only(names) => Some(names),
        }
    }

    /// Check every dataset a query references.
    pub fn check(&self, query: &str) -> Result<(), GuardViolation> {
        if self.is_unrestricted() {
            return Ok(());
        }
        check_with(query, |dataset| self.permits(dataset))
    }
}

/// Validate dataset references against a plain set of names.
///
/// An empty set allows everything.
pub fn validate_dataset_references(query: &str, allowed: &HashSet<String>) -> ValidationVerdict {
    if allowed.is_empty() {
        return ValidationVerdict::allowed();
    }
    check_with(query, |dataset| allowed.contains(dataset)).into()
}

/// Datasets the query references, in order of first appearance.
pub fn referenced_datasets(query: &str) -> Result<Vec<String>, GuardViolation> {
    let tokens = tokenize(query)?;
    let significant: Vec<&SqlToken> = tokens.iter().filter(|t| t.is_significant()).collect();
    let scope = declared_scope(&significant);

    let mut datasets: Vec<String> = Vec::new();
    for path in candidate_paths(&significant, &scope) {
        if let Some(dataset) = dataset_of(&path, &scope) {
            if !datasets.iter().any(|d| d == dataset) {
                datasets.push(dataset.to_string());
            }
        }
    }
    Ok(datasets)
}

fn check_with<F>(query: &str, permits: F) -> Result<(), GuardViolation>
where
    F: Fn(&str) -> bool,
{
    match referenced_datasets(query)?
        .into_iter()
        .find(|dataset| !permits(dataset))
    {
        Some(dataset) => Err(GuardViolation::UnauthorizedDataset(dataset)),
        None => Ok(()),
    }
}

fn dataset_of<'a>(path: &'a Path, scope: &Scope) -> Option<&'a str> {
    let dataset = match path.segments.as_slice() {
        [dataset, _] | [_, dataset, _] => dataset,
        _ => return None,
    };
    (!scope.exempts(path)).then_some(dataset.as_str())
}

/// What a query declares about its own names.
#[derive(Debug, Default)]
struct Scope {
    /// Lower-cased range variables.
    names: HashSet<String>,
    /// Token indexes where a path in table position starts.
    tables: HashSet<usize>,
}

impl Scope {
    fn declares(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    /// `alias.column` and friends: an unquoted path outside table position
    /// whose head is a declared range variable.
    fn exempts(&self, path: &Path) -> bool {
        !path.quoted && !self.tables.contains(&path.start) && self.declares(&path.segments[0])
    }
}

/// A dotted name as read from the token stream.
#[derive(Debug)]
struct Path {
    segments: Vec<String>,
    /// Index of the first token.
    start: usize,
    /// Written as one back-tick identifier containing a dot.
    quoted: bool,
    /// Index of the last token of the first segment.
    head_end: usize,
    /// Index just past the path.
    end: usize,
}

/// Every multi-part name outside member access and built-in function calls.
fn candidate_paths(tokens: &[&SqlToken], scope: &Scope) -> Vec<Path> {
    let mut paths = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        if !tokens[i].is_name_part() {
            i += 1;
            continue;
        }

        let path = read_path(tokens, i);

        // `total-o.discount`: arithmetic on an alias, not a hyphenated project.
        if path.head_end > i
            && !scope.tables.contains(&i)
            && scope.declares(&tokens[path.head_end].text)
        {
            i = path.head_end;
            continue;
        }

        // `(...).field.sub` and `arr[OFFSET(0)].a.b` continue an expression.
        let member_access = i > 0 && tokens[i - 1].kind == TokenKind::Period;
        let candidate =
            !member_access && path.segments.len() > 1 && !is_builtin_call(tokens, &path, i);
        i = path.end;
        if candidate {
            paths.push(path);
        }
    }

    paths
}

fn is_builtin_call(tokens: &[&SqlToken], path: &Path, start: usize) -> bool {
    tokens[start].is_any_word(&FUNCTION_NAMESPACES)
        && tokens.get(path.end).is_some_and(|t| t.is_punct("("))
}

/// Parenthesis level state.
#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    /// Argument list of `EXTRACT`, where `FROM` is not a clause.
    extract: bool,
    /// Currently inside this level's `FROM` list.
    in_from: bool,
}

/// Range variables the query declares (table names and aliases in
/// `FROM`/`JOIN` lists, `UNNEST` and subquery aliases, CTE names) and the
/// paths it names in table position.
///
/// Missing a declaration only makes the check stricter.
fn declared_scope(tokens: &[&SqlToken]) -> Scope {
    let mut scope = Scope::default();
    let mut frames = vec![Frame::default()];
    let mut expect_table = false;
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i];
        let top = frames.len() - 1;
        let starts_path = tokens.get(i + 1).is_some_and(|t| t.kind == TokenKind::Period);

        if token.is_word("WITH") {
            declare_ctes(tokens, i + 1, &mut scope.names);
        }

        if token.is_any_word(&TABLE_INTRODUCERS) {
            expect_table = true;
        } else if token.is_word("FROM") {
            if !frames[top].extract {
                frames[top].in_from = true;
                expect_table = true;
            }
        } else if token.is_any_word(&CLAUSE_ENDERS) && !starts_path {
            frames[top].in_from = false;
            expect_table = false;
        } else if token.is_any_word(&TABLE_MODIFIERS) {
            // `DROP TABLE IF EXISTS t` still names `t`.
        } else if expect_table && token.is_name_part() {
            let path = read_path(tokens, i);
            scope.tables.insert(i);
            if let Some(table) = path.segments.last() {
                scope.names.insert(table.to_lowercase());
            }
            i = declare_alias(tokens, path.end, &mut scope.names);
            expect_table = false;
            continue;
        } else {
            match token.kind {
                TokenKind::Semicolon => {
                    frames.clear();
                    frames.push(Frame::default());
                }
                TokenKind::Punctuation if token.text == "(" => {
                    let extract = i > 0 && tokens[i - 1].is_word("EXTRACT");
                    // `FROM (a JOIN b)` keeps listing tables; `FROM (SELECT ...)`
                    // leaves the list at `SELECT`.
                    frames.push(Frame {
                        extract,
                        in_from: expect_table,
                    });
                    i += 1;
                    continue;
                }
                TokenKind::Punctuation if token.text == ")" => {
                    if frames.len() > 1 {
                        frames.pop();
                    }
                    if frames[frames.len() - 1].in_from {
                        // `(SELECT ...) AS t`, `UNNEST(items) item`
                        i = declare_alias(tokens, i + 1, &mut scope.names);
                        expect_table = false;
                        continue;
                    }
                }
                _ => {}
            }
            expect_table = token.is_punct(",") && frames[frames.len() - 1].in_from;
        }

        i += 1;
    }

    scope
}

/// Record an optional `[AS] alias` at `i`; returns the index past it.
fn declare_alias(tokens: &[&SqlToken], mut i: usize, declared: &mut HashSet<String>) -> usize {
    let explicit = tokens.get(i).is_some_and(|t| t.is_word("AS"));
    if explicit {
        i += 1;
    }
    match tokens.get(i) {
        Some(alias) if is_alias_name(alias) => {
            declared.insert(alias.text.to_lowercase());
            i + 1
        }
        _ => i,
    }
}

fn is_alias_name(token: &SqlToken) -> bool {
    match token.kind {
        TokenKind::Keyword | TokenKind::Identifier => !token.is_any_word(&NOT_ALIASES),
        TokenKind::QuotedIdentifier => !token.text.contains('.'),
        _ => false,
    }
}

/// Record the names of a `WITH [RECURSIVE] name [(cols)] AS (...), ...` list
/// starting at `i`.
fn declare_ctes(tokens: &[&SqlToken], mut i: usize, declared: &mut HashSet<String>) {
    if tokens.get(i).is_some_and(|t| t.is_word("RECURSIVE")) {
        i += 1;
    }

    loop {
        let Some(name) = tokens.get(i).filter(|t| is_alias_name(t)) else {
            return;
        };
        i += 1;
        if tokens.get(i).is_some_and(|t| t.is_punct("(")) {
            i = skip_group(tokens, i);
        }
        if !tokens.get(i).is_some_and(|t| t.is_word("AS"))
            || !tokens.get(i + 1).is_some_and(|t| t.is_punct("("))
        {
            return;
        }
        declared.insert(name.text.to_lowercase());
        i = skip_group(tokens, i + 1);

        if !tokens.get(i).is_some_and(|t| t.is_punct(",")) {
            return;
        }
        i += 1;
    }
}

/// Index just past the parenthesized group opening at `open`.
fn skip_group(tokens: &[&SqlToken], open: usize) -> usize {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return i + 1;
            }
        }
    }
    tokens.len()
}

fn is_dotted_quoted(token: &SqlToken) -> bool {
    token.kind == TokenKind::QuotedIdentifier && token.text.contains('.')
}

/// Read a dotted name starting at `start`.
fn read_path(tokens: &[&SqlToken], start: usize) -> Path {
    let head_end = hyphenated_head_end(tokens, start);
    let mut segments = Vec::new();
    if head_end > start {
        segments.push(
            tokens[start..=head_end]
                .iter()
                .map(|t| t.text.as_str())
                .collect::<String>(),
        );
    } else {
        push_segments(&mut segments, tokens[start]);
    }

    let mut i = head_end + 1;
    while tokens.get(i).is_some_and(|t| t.kind == TokenKind::Period)
        && tokens.get(i + 1).is_some_and(|t| t.is_name_part())
    {
        push_segments(&mut segments, tokens[i + 1]);
        i += 2;
    }

    Path {
        segments,
        start,
        quoted: is_dotted_quoted(tokens[start]),
        head_end,
        end: i,
    }
}

/// Last token of an unquoted hyphenated project name such as
/// `my-project-1` in `my-project-1.dataset.table`, or `start` if there is none.
///
/// Parts must touch their hyphens and the name must be followed by a period.
fn hyphenated_head_end(tokens: &[&SqlToken], start: usize) -> usize {
    if !tokens[start].is_bare_word() {
        return start;
    }

    let mut end = start;
    while let (Some(dash), Some(part)) = (tokens.get(end + 1), tokens.get(end + 2)) {
        let joins = dash.is_punct("-")
            && touches(tokens[end], dash)
            && touches(dash, part)
            && (part.is_bare_word() || is_digits(part));
        if !joins {
            break;
        }
        end += 2;
    }

    let followed_by_period = tokens.get(end + 1).is_some_and(|t| t.kind == TokenKind::Period);
    if end > start && followed_by_period {
        end
    } else {
        start
    }
}

/// No whitespace or comment between two unquoted tokens.
fn touches(left: &SqlToken, right: &SqlToken) -> bool {
    left.position.line == right.position.line
        && left.position.column + left.text.chars().count() as u64 == right.position.column
}

fn is_digits(token: &SqlToken) -> bool {
    token.kind == TokenKind::Literal && token.text.chars().all(|c| c.is_ascii_digit())
}

fn push_segments(segments: &mut Vec<String>, part: &SqlToken) {
    if part.kind == TokenKind::QuotedIdentifier {
        segments.extend(part.text.split('.').map(String::from));
    } else {
        segments.push(part.text.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_allowed_dataset() {
        let verdict = validate_dataset_references(
            "SELECT * FROM `project.allowed_dataset.table`",
            &set(&["allowed_dataset"]),
        );
        assert_eq!(verdict, ValidationVerdict::allowed());
    }

    #[test]
    fn test_multiple_allowed_datasets() {
        let query = r#"
            SELECT a.field1, b.field2
            FROM `project.dataset1.table1` a
            JOIN `project.dataset2.table2` b
            ON a.id = b.id
        "#;
        assert!(validate_dataset_references(query, &set(&["dataset1", "dataset2"])).ok);
    }

    #[test]
    fn test_unauthorized_dataset() {
        let verdict = validate_dataset_references(
            "SELECT * FROM `project.unauthorized_dataset.table`",
            &set(&["allowed_dataset"]),
        );
        assert!(!verdict.ok);
        assert_eq!(
            verdict.reason,
            "Reference to unauthorized dataset: unauthorized_dataset"
        );
    }

    #[test]
    fn test_split_backtick_notation() {
        let verdict = validate_dataset_references(
            "SELECT * FROM `project`.`allowed_dataset`.`table`",
            &set(&["allowed_dataset"]),
        );
        assert!(verdict.ok, "{verdict:?}");
    }

    #[test]
    fn test_unquoted_notation() {
        let allowed = set(&["allowed_dataset"]);
        assert!(
            validate_dataset_references("SELECT * FROM project.allowed_dataset.table", &allowed)
                .ok
        );
        assert!(!validate_dataset_references("SELECT * FROM project.other.table", &allowed).ok);
    }

    #[test]
    fn test_two_segment_path_names_dataset() {
        let verdict = validate_dataset_references("SELECT * FROM other.events", &set(&["sales"]));
        assert_eq!(verdict.reason, "Reference to unauthorized dataset: other");
    }

    #[test]
    fn test_dataset_in_subquery() {
        let query = r#"
            SELECT *
            FROM `project.dataset1.table1`
            WHERE id IN (SELECT id FROM `project.unauthorized_dataset.table2`)
        "#;
        let verdict = validate_dataset_references(query, &set(&["dataset1"]));
        assert!(verdict.reason.contains("unauthorized_dataset"));
    }

    #[test]
    fn test_empty_set_allows_everything() {
        let verdict =
            validate_dataset_references("SELECT * FROM `project.any_dataset.table`", &set(&[]));
        assert_eq!(verdict, ValidationVerdict::allowed());
    }

    #[test]
    fn test_alias_columns_are_not_datasets() {
        let query = r#"
            SELECT a.id, b.name, EXTRACT(YEAR FROM a.created_at) AS y
            FROM `p.sales.orders` a
            JOIN `p.sales.customers` b ON a.customer_id = b.id
            WHERE a.total > 10
        "#;
        assert!(validate_dataset_references(query, &set(&["sales"])).ok);
    }

    #[test]
    fn test_comma_separated_from_list() {
        let query = "SELECT * FROM sales.orders o, secret.salaries s WHERE o.id = s.id";
        let verdict = validate_dataset_references(query, &set(&["sales"]));
        assert_eq!(verdict.reason, "Reference to unauthorized dataset: secret");
    }

    #[test]
    fn test_cte_names_and_information_schema_ignored() {
        let query = r#"
            WITH recent AS (SELECT * FROM sales.orders)
            SELECT * FROM recent, p.sales.INFORMATION_SCHEMA.TABLES
        "#;
        assert_eq!(referenced_datasets(query).unwrap(), vec!["sales".to_string()]);
    }

    #[test]
    fn test_references_in_order_without_duplicates() {
        let query = "SELECT * FROM a.t1 JOIN b.t2 USING (id) JOIN a.t3 USING (id)";
        assert_eq!(
            referenced_datasets(query).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_comment_between_path_parts() {
        let query = "SELECT * FROM p /* x */ . secret . t";
        assert_eq!(referenced_datasets(query).unwrap(), vec!["secret".to_string()]);
    }

    #[test]
    fn test_hyphenated_project() {
        assert_eq!(
            referenced_datasets("SELECT * FROM my-project.secret.salaries").unwrap(),
            vec!["secret".to_string()]
        );
        // Spaced out, it is subtraction of a column path.
        assert_eq!(
            referenced_datasets("SELECT a - hr.total FROM sales.t").unwrap(),
            vec!["hr".to_string(), "sales".to_string()]
        );
    }

    #[test]
    fn test_alias_never_exempts_its_own_table() {
        assert_eq!(
            referenced_datasets("SELECT * FROM secret.salaries AS secret").unwrap(),
            vec!["secret".to_string()]
        );
        assert_eq!(
            referenced_datasets("WITH secret AS (SELECT 1) SELECT * FROM secret.salaries")
                .unwrap(),
            vec!["secret".to_string()]
        );
        assert_eq!(
            referenced_datasets("SELECT * FROM my-o.secret.t o").unwrap(),
            vec!["secret".to_string()]
        );
    }

    #[test]
    fn test_arithmetic_on_alias() {
        let query = "SELECT total-o.discount AS net FROM sales.orders o";
        assert_eq!(referenced_datasets(query).unwrap(), vec!["sales".to_string()]);
    }

    #[test]
    fn test_builtin_function_namespaces() {
        let query = "SELECT SAFE.DIVIDE(o.a, o.b), NET.HOST(o.url) FROM sales.orders o";
        assert_eq!(referenced_datasets(query).unwrap(), vec!["sales".to_string()]);
    }

    #[test]
    fn test_unnest_and_subquery_aliases() {
        let query = r#"
            SELECT item.sku, s.n
            FROM sales.orders, UNNEST(items) AS item, (SELECT COUNT(*) AS n FROM sales.t) s
        "#;
        assert_eq!(referenced_datasets(query).unwrap(), vec!["sales".to_string()]);
    }

    #[test]
    fn test_member_access_after_expression() {
        let query = "SELECT arr[OFFSET(0)].x.y FROM sales.t";
        assert_eq!(referenced_datasets(query).unwrap(), vec!["sales".to_string()]);
    }

    #[test]
    fn test_undeclared_head_is_checked() {
        // Unaliased struct access cannot be told apart from a table path.
        let verdict =
            validate_dataset_references("SELECT address.city FROM sales.people", &set(&["sales"]));
        assert_eq!(verdict.reason, "Reference to unauthorized dataset: address");
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let verdict = validate_dataset_references("SELECT * FROM p.Sales.t", &set(&["sales"]));
        assert!(!verdict.ok);
    }

    #[test]
    fn test_allow_list_parsing() {
        assert_eq!(
            "".parse::<DatasetAllowList>().unwrap(),
            DatasetAllowList::Unrestricted
        );
        assert_eq!(
            " * ".parse::<DatasetAllowList>().unwrap(),
            DatasetAllowList::Unrestricted
        );
        assert_eq!(
            "sales, marketing ,".parse::<DatasetAllowList>().unwrap(),
            DatasetAllowList::only(["marketing", "sales"])
        );
        assert!(" , ,".parse::<DatasetAllowList>().is_err());
    }

    #[test]
    fn test_allow_list_check() {
        let list = DatasetAllowList::only(["sales"]);
        assert!(list.check("SELECT * FROM p.sales.t").is_ok());
        assert_eq!(
            list.check("SELECT * FROM p.hr.t"),
            Err(GuardViolation::UnauthorizedDataset("hr".to_string()))
        );
        assert!(DatasetAllowList::Unrestricted
            .check("SELECT * FROM p.hr.t")
            .is_ok());
        assert!(list.permits("sales"));
        assert!(!list.permits("hr"));
        assert!(DatasetAllowList::Unrestricted.datasets().is_none());
    }
}
