use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::models::{
    CatalogEntry, ColumnMatch, ColumnSearchRequest, FeatureRequest, JoinRequest,
    MetadataSearchRequest, TableSample,
};
use crate::state::AppState;

/// POST /api/metadata/search - Raw catalog search by terms, with an optional
/// geometry-type filter. An empty list means "no matches or query failed";
/// the store does not distinguish the two.
pub async fn metadata_search(
    State(state): State<AppState>,
    Json(req): Json<MetadataSearchRequest>,
) -> Result<Json<Vec<CatalogEntry>>, (StatusCode, String)> {
    if req.terms.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "At least one search term is required".to_string(),
        ));
    }

    let entries = state
        .store
        .search_metadata(&req.terms, req.geometry_type.as_deref(), req.limit)
        .await;
    Ok(Json(entries))
}

/// POST /api/columns/search - Resolve column-name patterns to the tables
/// containing a matching column.
pub async fn column_search(
    State(state): State<AppState>,
    Json(req): Json<ColumnSearchRequest>,
) -> Result<Json<Vec<ColumnMatch>>, (StatusCode, String)> {
    if req.patterns.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "At least one column pattern is required".to_string(),
        ));
    }

    Ok(Json(state.store.search_columns(&req.patterns, req.limit).await))
}

#[derive(Debug, Deserialize)]
pub struct SampleParams {
    /// Comma-separated column subset
    pub columns: Option<String>,
    pub limit: Option<i64>,
}

/// GET /api/tables/{table}/sample - First N rows of a table in natural
/// storage order.
pub async fn table_sample(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<SampleParams>,
) -> Json<TableSample> {
    let columns: Option<Vec<String>> = params
        .columns
        .map(|c| c.split(',').map(|s| s.trim().to_string()).collect());
    let limit = params.limit.unwrap_or(5);

    Json(state.store.table_sample(&table, columns.as_deref(), limit).await)
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub column: String,
    pub group_by: Option<String>,
}

/// GET /api/tables/{table}/stats - Summary statistics for one numeric column,
/// optionally grouped by another column.
pub async fn table_stats(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<StatsParams>,
) -> Json<Value> {
    Json(
        state
            .store
            .column_statistics(&table, &params.column, params.group_by.as_deref())
            .await,
    )
}

/// POST /api/join - Inner join of two tables on a shared key column
/// (default "fips").
pub async fn join(
    State(state): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> Json<Vec<Map<String, Value>>> {
    Json(
        state
            .store
            .join_tables(
                &req.left_table,
                &req.right_table,
                &req.join_column,
                req.left_columns.as_deref(),
                req.right_columns.as_deref(),
                req.limit,
            )
            .await,
    )
}

/// POST /api/features - Spatial feature fetch with GeoJSON geometry and an
/// optional bounding-box filter.
pub async fn features(
    State(state): State<AppState>,
    Json(req): Json<FeatureRequest>,
) -> Json<Vec<Map<String, Value>>> {
    Json(
        state
            .store
            .spatial_features(
                &req.table_name,
                &req.geometry_column,
                req.bbox,
                req.attributes.as_deref(),
                req.limit,
            )
            .await,
    )
}

/// GET /api/health - Liveness plus catalog reachability.
pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, (StatusCode, String)> {
    match state.store.ping().await {
        Ok(()) => Ok(Json(serde_json::json!({"status": "ok"}))),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Catalog unreachable: {e}"),
        )),
    }
}
