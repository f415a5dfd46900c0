use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

// ─── Catalog ────────────────────────────────────────────────────────────────

/// Backend a metric is refreshed from. Unknown names are kept verbatim so the
/// catalog round-trips, and such rows are skipped by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServerName {
    P21,
    Por,
    Other(String),
}

impl ServerName {
    pub fn as_str(&self) -> &str {
        match self {
            Self::P21 => "P21",
            Self::Por => "POR",
            Self::Other(raw) => raw.as_str(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for ServerName {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "P21" => Self::P21,
            "POR" => Self::Por,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for ServerName {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<ServerName> for String {
    fn from(value: ServerName) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshMode {
    Test,
    Production,
}

impl RefreshMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Production => "production",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "test" => Some(Self::Test),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

impl fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    pub id: String,
    pub chart_group: String,
    pub variable_name: String,
    pub server_name: ServerName,
    #[serde(default)]
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_expression_test: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_expression_production: Option<String>,
}

impl MetricDefinition {
    /// Resolves the single SQL text a tick runs in `mode`. Blank text counts as absent.
    pub fn active_query(&self, mode: RefreshMode) -> Option<ActiveQuery<'_>> {
        let raw = match mode {
            RefreshMode::Test => self.sql_expression_test.as_deref(),
            RefreshMode::Production => self.sql_expression_production.as_deref(),
        }?;
        let sql = raw.trim();
        if sql.is_empty() {
            return None;
        }
        Some(match mode {
            RefreshMode::Test => ActiveQuery::Test(sql),
            RefreshMode::Production => ActiveQuery::Production(sql),
        })
    }

    pub fn apply_patch(&mut self, patch: &MetricPatch) {
        if let Some(chart_group) = &patch.chart_group {
            self.chart_group = chart_group.clone();
        }
        if let Some(variable_name) = &patch.variable_name {
            self.variable_name = variable_name.clone();
        }
        if let Some(server_name) = &patch.server_name {
            self.server_name = server_name.clone();
        }
        if let Some(table_name) = &patch.table_name {
            self.table_name = table_name.clone();
        }
        if let Some(axis_step) = &patch.axis_step {
            self.axis_step = non_blank(axis_step);
        }
        if let Some(sql) = &patch.sql_expression_test {
            self.sql_expression_test = non_blank(sql);
        }
        if let Some(sql) = &patch.sql_expression_production {
            self.sql_expression_production = non_blank(sql);
        }
    }
}

fn non_blank(raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// The SQL text selected for one tick, tagged with the mode that selected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveQuery<'a> {
    Test(&'a str),
    Production(&'a str),
}

impl<'a> ActiveQuery<'a> {
    pub fn sql(&self) -> &'a str {
        match self {
            Self::Test(sql) | Self::Production(sql) => sql,
        }
    }

    pub fn mode(&self) -> RefreshMode {
        match self {
            Self::Test(_) => RefreshMode::Test,
            Self::Production(_) => RefreshMode::Production,
        }
    }
}

/// Admin edit. Empty strings clear optional fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPatch {
    pub chart_group: Option<String>,
    pub variable_name: Option<String>,
    pub server_name: Option<ServerName>,
    pub table_name: Option<String>,
    pub axis_step: Option<String>,
    pub sql_expression_test: Option<String>,
    pub sql_expression_production: Option<String>,
}

// ─── Cache ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Never refreshed, or reset by a mode switch.
    Unset,
    /// The query ran but produced no row or a non-numeric scalar.
    NoData,
    Value(f64),
}

impl MetricValue {
    pub fn as_number(self) -> f64 {
        match self {
            Self::Value(value) if value.is_finite() => value,
            _ => 0.0,
        }
    }

    pub fn state_str(self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::NoData => "no_data",
            Self::Value(_) => "value",
        }
    }

    pub fn to_stored_text(self) -> Option<String> {
        match self {
            Self::Unset => None,
            Self::NoData => Some("0".to_string()),
            Self::Value(value) => Some(value.to_string()),
        }
    }

    pub fn from_stored(state: &str, text: Option<&str>) -> Self {
        match state {
            "value" => text
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|value| value.is_finite())
                .map(Self::Value)
                .unwrap_or(Self::NoData),
            "no_data" => Self::NoData,
            _ => Self::Unset,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheRow {
    pub position: i64,
    pub definition: MetricDefinition,
    pub value: MetricValue,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_type: Option<String>,
}

/// Serializable view of a cache row for the admin surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRowView {
    #[serde(flatten)]
    pub definition: MetricDefinition,
    pub value: f64,
    pub value_state: &'static str,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_type: Option<String>,
}

impl From<&CacheRow> for CacheRowView {
    fn from(row: &CacheRow) -> Self {
        Self {
            definition: row.definition.clone(),
            value: row.value.as_number(),
            value_state: row.value.state_str(),
            last_updated: row.last_updated,
            error: row.error.clone(),
            error_type: row.error_type.clone(),
        }
    }
}

// ─── Query results ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl Cell {
    /// Types a raw text field the way a CSV export or ODBC text buffer delivers it.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Null;
        }
        if let Ok(integer) = trimmed.parse::<i64>() {
            return Self::Integer(integer);
        }
        if let Ok(number) = trimmed.parse::<f64>() {
            if number.is_finite() {
                return Self::Number(number);
            }
        }
        Self::Text(raw.to_string())
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(flag) => Self::Bool(*flag),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(integer) => Self::Integer(integer),
                None => number.as_f64().map(Self::Number).unwrap_or(Self::Null),
            },
            serde_json::Value::String(text) => Self::Text(text.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Null => None,
            Self::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            Self::Integer(integer) => Some(*integer as f64),
            Self::Number(number) => Some(*number),
            Self::Text(text) => text.trim().parse::<f64>().ok(),
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(flag) => Some(flag.to_string()),
            Self::Integer(integer) => Some(integer.to_string()),
            Self::Number(number) => Some(number.to_string()),
            Self::Text(text) => Some(text.clone()),
        }
    }
}

/// One result row with column order preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    columns: Vec<(String, Cell)>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Cell)>,
        K: Into<String>,
    {
        Self {
            columns: pairs
                .into_iter()
                .map(|(name, cell)| (name.into(), cell))
                .collect(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, cell: Cell) {
        self.columns.push((name.into(), cell));
    }

    /// Case-insensitive column lookup.
    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(_, cell)| cell)
    }

    pub fn column_name(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(name))
            .map(|(column, _)| column.as_str())
    }

    pub fn first(&self) -> Option<(&str, &Cell)> {
        self.columns
            .first()
            .map(|(name, cell)| (name.as_str(), cell))
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.columns.iter().map(|(name, cell)| (name.as_str(), cell))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, cell) in &self.columns {
            map.serialize_entry(name, cell)?;
        }
        map.end()
    }
}

// ─── Responses ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRunResponse {
    pub metric_id: String,
    pub mode: RefreshMode,
    pub outcome: String,
    pub value: f64,
    pub value_state: &'static str,
    pub rows: Vec<ResultRow>,
    pub error: Option<String>,
}
