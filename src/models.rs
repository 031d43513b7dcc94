use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Role a decomposed sub-query plays in the overall search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Primary,
    Normalization,
    Filter,
    Related,
    /// Anything the model emitted that we don't recognize.
    #[serde(other)]
    Unknown,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Primary => "primary",
            Purpose::Normalization => "normalization",
            Purpose::Filter => "filter",
            Purpose::Related => "related",
            Purpose::Unknown => "unknown",
        }
    }
}

/// One decomposed search term plus its declared purpose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    pub query: String,
    #[serde(default = "unknown_purpose")]
    pub purpose: Purpose,
}

fn unknown_purpose() -> Purpose {
    Purpose::Unknown
}

impl SubQuery {
    pub fn primary(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            purpose: Purpose::Primary,
        }
    }
}

/// Geographic granularity the model may classify a query at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeographicLevel {
    County,
    State,
    Tract,
    #[serde(rename = "blockgroup")]
    BlockGroup,
}

/// Optional {start, end} time range attached to a decomposition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalFilter {
    #[serde(default, deserialize_with = "lenient_string")]
    pub start: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub end: Option<String>,
}

/// Full decomposition of one natural-language query.
///
/// Only `search_queries` drives the pipeline; the concept lists and
/// classification fields are carried through for observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    #[serde(default)]
    pub primary_concepts: Vec<String>,
    #[serde(default)]
    pub normalization_concepts: Vec<String>,
    #[serde(default)]
    pub filter_concepts: Vec<String>,
    #[serde(default, deserialize_with = "lenient_level")]
    pub geographic_level: Option<GeographicLevel>,
    #[serde(default)]
    pub temporal_filter: Option<TemporalFilter>,
    #[serde(default)]
    pub related_concepts: Vec<String>,
    #[serde(default)]
    pub search_queries: Vec<SubQuery>,
}

impl Decomposition {
    /// Single-subquery substitute used whenever decomposition fails: the
    /// original text searched as-is with primary purpose.
    pub fn fallback(query: &str) -> Self {
        Self {
            primary_concepts: vec![query.to_string()],
            search_queries: vec![SubQuery::primary(query)],
            ..Default::default()
        }
    }
}

/// Accept a string or a bare number (models often emit years unquoted).
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Parse a geographic level, treating anything unrecognized (including the
/// literal "null" some models emit) as absent rather than a parse failure.
fn lenient_level<'de, D>(deserializer: D) -> Result<Option<GeographicLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::String(s)) = value else {
        return Ok(None);
    };
    Ok(match s.trim().to_lowercase().as_str() {
        "county" => Some(GeographicLevel::County),
        "state" => Some(GeographicLevel::State),
        "tract" => Some(GeographicLevel::Tract),
        "blockgroup" | "block group" => Some(GeographicLevel::BlockGroup),
        _ => None,
    })
}

/// One row of the `dataset_metadata` catalog table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CatalogEntry {
    pub id: i32,
    pub dataset_name: String,
    pub table_name: String,
    pub source_path: Option<String>,
    pub geometry_type: Option<String>,
    pub row_count: Option<i64>,
    pub column_list: Vec<String>,
    pub crs: Option<String>,
    /// Bounding box rendered as text; geometry semantics stay in PostGIS.
    pub bbox: Option<String>,
    pub date_ingested: Option<DateTime<Utc>>,
}

/// A catalog row stamped with the sub-query that found it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataMatch {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    pub search_query: String,
    pub search_purpose: Purpose,
}

/// A (table, pattern) group from a column-pattern search, with every column
/// of that table matching the pattern aggregated together.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ColumnMatch {
    pub table_name: String,
    pub dataset_name: String,
    pub geometry_type: Option<String>,
    pub matching_columns: Vec<String>,
    /// The pattern that produced this group; stamped after the fetch.
    #[sqlx(default)]
    pub search_pattern: String,
}

/// Head-N sample of one data table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSample {
    pub table_name: String,
    pub sample_data: Vec<Map<String, Value>>,
    /// Column names in the order the database returned them.
    pub columns: Vec<String>,
}

/// Final envelope of one pipeline run. Built fresh per request; an empty
/// `errors` list signals a clean run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub decomposition: Vec<SubQuery>,
    pub results_by_purpose: BTreeMap<String, Vec<MetadataMatch>>,
    pub available_tables: Vec<String>,
    pub total_matches: usize,
    pub errors: Vec<String>,
}

// ─── HTTP request types ──────────────────────────────────

/// Search / decompose request
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

/// Raw catalog search request
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataSearchRequest {
    pub terms: Vec<String>,
    pub geometry_type: Option<String>,
    #[serde(default = "default_metadata_limit")]
    pub limit: i64,
}

fn default_metadata_limit() -> i64 {
    20
}

/// Column-pattern search request
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSearchRequest {
    pub patterns: Vec<String>,
    #[serde(default = "default_column_limit")]
    pub limit: i64,
}

fn default_column_limit() -> i64 {
    50
}

/// Keyed inner-join request
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    pub left_table: String,
    pub right_table: String,
    #[serde(default = "default_join_column")]
    pub join_column: String,
    pub left_columns: Option<Vec<String>>,
    pub right_columns: Option<Vec<String>>,
    #[serde(default = "default_join_limit")]
    pub limit: i64,
}

fn default_join_column() -> String {
    "fips".to_string()
}

fn default_join_limit() -> i64 {
    100
}

/// Spatial feature request
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureRequest {
    pub table_name: String,
    #[serde(default = "default_geometry_column")]
    pub geometry_column: String,
    /// Optional (minx, miny, maxx, maxy) intersection filter, SRID 4326.
    pub bbox: Option<[f64; 4]>,
    pub attributes: Option<Vec<String>>,
    #[serde(default = "default_feature_limit")]
    pub limit: i64,
}

fn default_geometry_column() -> String {
    "geom".to_string()
}

fn default_feature_limit() -> i64 {
    100
}

/// LLM config update request
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfigUpdate {
    pub provider: Option<String>,
    // base_url intentionally omitted: immutable at runtime to prevent SSRF
    pub chat_model: Option<String>,
    pub temperature: Option<f32>,
    pub api_key: Option<String>,
}
