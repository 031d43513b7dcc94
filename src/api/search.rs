use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::llm::QueryDecomposer;
use crate::models::{Decomposition, SearchRequest, SearchResult};
use crate::pipeline::SearchPipeline;
use crate::state::AppState;

/// POST /api/search - Full pipeline:
///   1. LLM query decomposition (fallback to the raw query on failure)
///   2. Per-subquery catalog search, stamped with query text and purpose
///   3. Sample up to 5 referenced tables (3 rows each)
///   4. Aggregate matches by purpose into the final envelope
///
/// Always returns 200 with a `SearchResult`; partial failures surface only in
/// its `errors` list.
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResult>, (StatusCode, String)> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }

    let llm_config = state.llm_config.read().clone();
    let decomposer = QueryDecomposer::new(state.http_client.clone(), llm_config);
    let pipeline = SearchPipeline::new(decomposer, state.store.clone());

    Ok(Json(pipeline.run(&query).await))
}

/// POST /api/decompose - Decomposition only, without any catalog searches.
pub async fn decompose(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Decomposition>, (StatusCode, String)> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }

    let llm_config = state.llm_config.read().clone();
    let decomposer = QueryDecomposer::new(state.http_client.clone(), llm_config);

    Ok(Json(decomposer.decompose(&query).await))
}
