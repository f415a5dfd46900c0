use super::{
    AccessQuery, CompareOp, Condition, CountAggregate, CountTarget, Literal, OrderKey, Projection,
    SelectColumn,
};
use crate::errors::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;

static SELECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bSELECT\b").expect("valid regex"));
static FROM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bFROM\b").expect("valid regex"));
static WHERE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bWHERE\b").expect("valid regex"));
static ORDER_BY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").expect("valid regex"));
static LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\b").expect("valid regex"));
static TOP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*TOP\s+(\d+)\s+").expect("valid regex"));
static AND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+AND\s+").expect("valid regex"));
static OPERATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<>|!=|>=|<=|=|<|>").expect("valid regex"));
static COUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^COUNT\s*\(\s*([^)]*?)\s*\)(?:\s+AS\s+(.+))?$").expect("valid regex")
});
static ALIAS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(.+?)\s+AS\s+(.+)$").expect("valid regex"));

/// Constructs outside the supported grammar, matched against literal-masked text.
static UNSUPPORTED: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\bOR\b", "OR conditions"),
        (r"(?i)\bJOIN\b", "joins"),
        (r"(?i)\bLIKE\b", "LIKE"),
        (r"(?i)\bIN\s*\(", "IN lists"),
        (r"(?i)\bBETWEEN\b", "BETWEEN"),
        (r"(?i)\bNOT\b", "NOT"),
        (r"(?i)\bIS\s+(?:NOT\s+)?NULL\b", "IS NULL tests"),
        (r"(?i)\bGROUP\s+BY\b", "GROUP BY"),
        (r"(?i)\bHAVING\b", "HAVING"),
        (r"(?i)\bUNION\b", "UNION"),
        (r"(?i)\bDISTINCT\b", "DISTINCT"),
        (r"(?i)\bINTO\b", "SELECT INTO"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("valid regex"), label))
    .collect()
});

/// Parses one statement of the supported subset.
pub fn parse(sql: &str) -> AppResult<AccessQuery> {
    let text = sql.trim().trim_end_matches(';').trim_end();
    if text.is_empty() {
        return Err(query_error("empty SQL text"));
    }
    let masked = mask_literals(text)?;

    for (pattern, label) in UNSUPPORTED.iter() {
        if pattern.is_match(&masked) {
            return Err(query_error(format!("{} are not supported by the POR interpreter", label)));
        }
    }

    let selects: Vec<_> = SELECT_RE.find_iter(&masked).collect();
    match selects.as_slice() {
        [only] if masked[..only.start()].trim().is_empty() => {}
        [] | [_] => return Err(query_error("only SELECT statements are supported")),
        _ => return Err(query_error("subqueries are not supported by the POR interpreter")),
    }

    let clauses = ClauseSpans::locate(&masked)?;
    let (select_start, select_end) = clauses.body(Keyword::Select, masked.len());
    let (from_start, from_end) = clauses
        .span(Keyword::From, masked.len())
        .ok_or_else(|| query_error("missing FROM clause"))?;

    let mut select_text = &text[select_start..select_end];
    let mut select_masked = &masked[select_start..select_end];
    let mut limit = None;
    if let Some(captures) = TOP_RE.captures(select_masked) {
        let whole = captures.get(0).map(|m| m.end()).unwrap_or(0);
        limit = Some(parse_limit(&captures[1])?);
        select_text = &select_text[whole..];
        select_masked = &select_masked[whole..];
    }

    let table = parse_table(&text[from_start..from_end], &masked[from_start..from_end])?;
    let (count, projection) = parse_select_list(select_text, select_masked)?;

    let filters = match clauses.span(Keyword::Where, masked.len()) {
        Some((start, end)) => parse_where(&text[start..end], &masked[start..end])?,
        None => Vec::new(),
    };
    let order_by = match clauses.span(Keyword::OrderBy, masked.len()) {
        Some((start, end)) => parse_order_by(&text[start..end], &masked[start..end])?,
        None => Vec::new(),
    };
    if let Some((start, end)) = clauses.span(Keyword::Limit, masked.len()) {
        let explicit = parse_limit(text[start..end].trim())?;
        limit = Some(limit.map_or(explicit, |top: usize| top.min(explicit)));
    }

    Ok(AccessQuery {
        table,
        count,
        projection,
        filters,
        order_by,
        limit,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Select,
    From,
    Where,
    OrderBy,
    Limit,
}

/// Keyword positions as (keyword, match start, match end), sorted by position.
struct ClauseSpans {
    found: Vec<(Keyword, usize, usize)>,
}

impl ClauseSpans {
    fn locate(masked: &str) -> AppResult<Self> {
        let mut found = Vec::new();
        for (keyword, pattern) in [
            (Keyword::Select, &*SELECT_RE),
            (Keyword::From, &*FROM_RE),
            (Keyword::Where, &*WHERE_RE),
            (Keyword::OrderBy, &*ORDER_BY_RE),
            (Keyword::Limit, &*LIMIT_RE),
        ] {
            let matches: Vec<_> = pattern.find_iter(masked).collect();
            if matches.len() > 1 {
                return Err(query_error(format!("{:?} clause appears more than once", keyword)));
            }
            if let Some(found_match) = matches.first() {
                found.push((keyword, found_match.start(), found_match.end()));
            }
        }
        found.sort_by_key(|(_, start, _)| *start);
        Ok(Self { found })
    }

    /// Body of `keyword`: from the end of the keyword to the start of the next one.
    fn span(&self, keyword: Keyword, len: usize) -> Option<(usize, usize)> {
        let index = self.found.iter().position(|(candidate, _, _)| *candidate == keyword)?;
        let (_, _, body_start) = self.found[index];
        let body_end = self
            .found
            .get(index + 1)
            .map(|(_, start, _)| *start)
            .unwrap_or(len);
        Some((body_start, body_end))
    }

    fn body(&self, keyword: Keyword, len: usize) -> (usize, usize) {
        self.span(keyword, len).unwrap_or((0, 0))
    }
}

fn parse_table(text: &str, masked: &str) -> AppResult<String> {
    if masked.contains(',') {
        return Err(query_error("only a single table is supported in FROM"));
    }
    let name = clean_identifier(text);
    if name.is_empty() {
        return Err(query_error("missing table name after FROM"));
    }
    let bracketed = text.trim().starts_with('[');
    if !bracketed && name.split_whitespace().count() > 1 {
        return Err(query_error(format!("table aliases are not supported: {}", text.trim())));
    }
    Ok(name)
}

fn parse_select_list(text: &str, masked: &str) -> AppResult<(Option<CountAggregate>, Projection)> {
    let trimmed_masked = masked.trim();
    if trimmed_masked.is_empty() {
        return Err(query_error("empty SELECT list"));
    }
    if trimmed_masked == "*" {
        return Ok((None, Projection::All));
    }

    let parts = split_on(text, masked, ',');
    if parts.len() == 1 {
        let (part_text, part_masked) = &parts[0];
        if let Some(captures) = COUNT_RE.captures(part_masked.trim()) {
            let offset = part_masked.len() - part_masked.trim_start().len();
            let original = &part_text[offset..offset + part_masked.trim().len()];
            let target_range = captures.get(1).map(|m| m.range()).unwrap_or(0..0);
            let target_raw = original[target_range].trim();
            let target = if target_raw == "*" {
                CountTarget::All
            } else if target_raw.is_empty() {
                return Err(query_error("COUNT requires * or a column"));
            } else {
                CountTarget::Column(clean_identifier(target_raw))
            };
            let alias = captures
                .get(2)
                .map(|m| clean_identifier(&original[m.range()]))
                .unwrap_or_else(|| "value".to_string());
            return Ok((Some(CountAggregate { target, alias }), Projection::All));
        }
    }

    let mut columns = Vec::with_capacity(parts.len());
    for (part_text, part_masked) in parts {
        if part_masked.contains('(') {
            return Err(query_error(format!(
                "functions are not supported in the select list: {}",
                part_text.trim()
            )));
        }
        if part_masked.trim() == "*" {
            return Err(query_error("* cannot be combined with other columns"));
        }
        let column = match ALIAS_RE.captures(part_masked.trim()) {
            Some(captures) => {
                let offset = part_masked.len() - part_masked.trim_start().len();
                let original = &part_text[offset..];
                let column_range = captures.get(1).map(|m| m.range()).unwrap_or(0..0);
                let alias_range = captures.get(2).map(|m| m.range()).unwrap_or(0..0);
                SelectColumn {
                    column: clean_identifier(&original[column_range]),
                    alias: Some(clean_identifier(&original[alias_range])),
                }
            }
            None => SelectColumn {
                column: clean_identifier(part_text),
                alias: None,
            },
        };
        if column.column.is_empty() {
            return Err(query_error("empty column in SELECT list"));
        }
        columns.push(column);
    }
    Ok((None, Projection::Columns(columns)))
}

fn parse_where(text: &str, masked: &str) -> AppResult<Vec<Condition>> {
    if masked.contains('(') {
        return Err(query_error("parenthesized conditions are not supported"));
    }
    let mut conditions = Vec::new();
    let mut cursor = 0usize;
    let mut pieces = Vec::new();
    for separator in AND_RE.find_iter(masked) {
        pieces.push((cursor, separator.start()));
        cursor = separator.end();
    }
    pieces.push((cursor, masked.len()));

    for (start, end) in pieces {
        let clause_text = &text[start..end];
        let clause_masked = &masked[start..end];
        let operator = OPERATOR_RE
            .find(clause_masked)
            .ok_or_else(|| query_error(format!("unsupported WHERE condition: {}", clause_text.trim())))?;
        let column = clean_identifier(&clause_text[..operator.start()]);
        let raw_value = clause_text[operator.end()..].trim();
        if column.is_empty() || raw_value.is_empty() {
            return Err(query_error(format!("incomplete WHERE condition: {}", clause_text.trim())));
        }
        let op = match operator.as_str() {
            "=" => CompareOp::Eq,
            "<>" | "!=" => CompareOp::NotEq,
            ">" => CompareOp::Gt,
            "<" => CompareOp::Lt,
            ">=" => CompareOp::GtEq,
            "<=" => CompareOp::LtEq,
            other => return Err(query_error(format!("unsupported operator {}", other))),
        };
        conditions.push(Condition {
            column,
            op,
            value: parse_literal(raw_value),
        });
    }
    Ok(conditions)
}

fn parse_order_by(text: &str, masked: &str) -> AppResult<Vec<OrderKey>> {
    let mut keys = Vec::new();
    for (part_text, _) in split_on(text, masked, ',') {
        let trimmed = part_text.trim();
        if trimmed.is_empty() {
            return Err(query_error("empty ORDER BY key"));
        }
        let (column, descending) = match trimmed.rsplit_once(char::is_whitespace) {
            Some((head, tail)) if tail.eq_ignore_ascii_case("DESC") => (head, true),
            Some((head, tail)) if tail.eq_ignore_ascii_case("ASC") => (head, false),
            _ => (trimmed, false),
        };
        keys.push(OrderKey {
            column: clean_identifier(column),
            descending,
        });
    }
    Ok(keys)
}

fn parse_limit(raw: &str) -> AppResult<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| query_error(format!("LIMIT expects a row count, got {}", raw.trim())))
}

/// Quote-strips a literal, then reads it as a number when it parses as one.
fn parse_literal(raw: &str) -> Literal {
    let stripped = strip_quotes(raw);
    match stripped.trim().parse::<f64>() {
        Ok(number) if number.is_finite() => Literal::Number(number),
        _ => Literal::Text(stripped.trim().to_string()),
    }
}

fn strip_quotes(raw: &str) -> String {
    let trimmed = raw.trim();
    for (open, close) in [('\'', '\''), ('"', '"'), ('#', '#')] {
        if trimmed.len() >= 2 && trimmed.starts_with(open) && trimmed.ends_with(close) {
            let inner = &trimmed[1..trimmed.len() - 1];
            return if open == '\'' {
                inner.replace("''", "'")
            } else {
                inner.to_string()
            };
        }
    }
    trimmed.to_string()
}

/// Unwraps `[bracketed]`, `"quoted"` or back-ticked identifiers.
pub(super) fn clean_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    for (open, close) in [('[', ']'), ('"', '"'), ('`', '`')] {
        if trimmed.len() >= 2 && trimmed.starts_with(open) && trimmed.ends_with(close) {
            return trimmed[1..trimmed.len() - 1].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Splits `text` wherever `masked` holds `separator`, returning aligned pairs.
fn split_on<'a>(text: &'a str, masked: &'a str, separator: char) -> Vec<(&'a str, &'a str)> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    for (index, ch) in masked.char_indices() {
        if ch == separator {
            parts.push((&text[start..index], &masked[start..index]));
            start = index + ch.len_utf8();
        }
    }
    parts.push((&text[start..], &masked[start..]));
    parts
}

/// Replaces the contents of string literals and bracketed identifiers with `_`
/// so keyword and operator searches ignore them. Byte offsets are preserved.
fn mask_literals(sql: &str) -> AppResult<String> {
    let mut masked = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut closing: Option<char> = None;

    while let Some(ch) = chars.next() {
        match closing {
            None => {
                masked.push(ch);
                closing = match ch {
                    '\'' => Some('\''),
                    '"' => Some('"'),
                    '[' => Some(']'),
                    '#' => Some('#'),
                    _ => None,
                };
            }
            Some(close) if ch == close => {
                if close == '\'' && chars.peek() == Some(&'\'') {
                    chars.next();
                    masked.push_str("__");
                    continue;
                }
                masked.push(ch);
                closing = None;
            }
            Some(_) => {
                for _ in 0..ch.len_utf8() {
                    masked.push('_');
                }
            }
        }
    }

    if let Some(close) = closing {
        return Err(query_error(format!("unterminated literal, expected {}", close)));
    }
    Ok(masked)
}

fn query_error(message: impl Into<String>) -> AppError {
    AppError::QueryExecution(message.into())
}
