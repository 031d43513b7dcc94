//! Four-stage search pipeline:
//!
//! ```text
//! decompose → search_variables → search_database → aggregate
//! ```
//!
//! Each stage transforms the accumulating [`RunState`]; no stage is revisited
//! and no branch depends on content. Failures never abort a run — they append
//! to the error list and the next stage proceeds with whatever accumulated.
//! The terminal state is rendered into a [`SearchResult`].

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    CatalogEntry, Decomposition, MetadataMatch, SearchResult, SubQuery, TableSample,
};

/// Catalog rows fetched per sub-query.
pub const SUBQUERY_SEARCH_LIMIT: i64 = 10;
/// At most this many distinct tables get sampled.
pub const MAX_SAMPLE_TABLES: usize = 5;
/// Rows per table sample.
pub const SAMPLE_ROW_LIMIT: i64 = 3;

/// Seam for the query decomposer. The live implementation falls back
/// internally and never errors; the `Err` path exists so the pipeline can
/// absorb failures from any implementation.
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, query: &str) -> Result<Decomposition>;
}

/// Seam for the catalog operations the pipeline consumes.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn search(
        &self,
        terms: &[String],
        geometry_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<CatalogEntry>>;

    async fn sample(&self, table: &str, limit: i64) -> Result<TableSample>;
}

#[async_trait]
impl<C: Catalog + ?Sized> Catalog for Arc<C> {
    async fn search(
        &self,
        terms: &[String],
        geometry_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<CatalogEntry>> {
        (**self).search(terms, geometry_type, limit).await
    }

    async fn sample(&self, table: &str, limit: i64) -> Result<TableSample> {
        (**self).sample(table, limit).await
    }
}

/// Accumulating record threaded through the pipeline's sequential stages.
#[derive(Debug, Default)]
pub struct RunState {
    pub original_query: String,
    pub decomposed_queries: Vec<SubQuery>,
    pub variable_results: Vec<MetadataMatch>,
    pub database_results: Vec<TableSample>,
    pub errors: Vec<String>,
}

pub struct SearchPipeline<D, C> {
    decomposer: D,
    catalog: C,
}

impl<D: Decomposer, C: Catalog> SearchPipeline<D, C> {
    pub fn new(decomposer: D, catalog: C) -> Self {
        Self { decomposer, catalog }
    }

    /// Execute the full pipeline for one query. Never fails: partial failure
    /// shows up only in the result's `errors` list.
    pub async fn run(&self, query: &str) -> SearchResult {
        aggregate(self.run_to_state(query).await)
    }

    /// Run the first three stages and return the terminal run-state.
    pub async fn run_to_state(&self, query: &str) -> RunState {
        let mut state = RunState {
            original_query: query.to_string(),
            ..Default::default()
        };
        self.decompose(&mut state).await;
        self.search_variables(&mut state).await;
        self.search_database(&mut state).await;
        state
    }

    /// Stage 1: decompose the query into sub-queries. Always leaves a
    /// non-empty sub-query list behind.
    async fn decompose(&self, state: &mut RunState) {
        match self.decomposer.decompose(&state.original_query).await {
            Ok(decomposition) => {
                state.decomposed_queries = decomposition.search_queries;
            }
            Err(e) => {
                state.errors.push(format!("Decomposition error: {e}"));
            }
        }
        if state.decomposed_queries.is_empty() {
            state
                .decomposed_queries
                .push(SubQuery::primary(state.original_query.clone()));
        }
        tracing::info!(
            "Decomposed into {} sub-queries",
            state.decomposed_queries.len()
        );
    }

    /// Stage 2: search the catalog once per sub-query, stamping each match
    /// with the originating query text and purpose. A failed sub-query
    /// contributes one error and zero matches; the loop continues.
    async fn search_variables(&self, state: &mut RunState) {
        let sub_queries = state.decomposed_queries.clone();
        for sub in &sub_queries {
            match self
                .catalog
                .search(std::slice::from_ref(&sub.query), None, SUBQUERY_SEARCH_LIMIT)
                .await
            {
                Ok(entries) => {
                    for entry in entries {
                        state.variable_results.push(MetadataMatch {
                            entry,
                            search_query: sub.query.clone(),
                            search_purpose: sub.purpose,
                        });
                    }
                }
                Err(e) => {
                    state
                        .errors
                        .push(format!("Variable search error for '{}': {e}", sub.query));
                }
            }
        }
        tracing::info!("Found {} variable matches", state.variable_results.len());
    }

    /// Stage 3: sample up to [`MAX_SAMPLE_TABLES`] of the tables referenced by
    /// the accumulated matches. Distinct table names are taken in lexical
    /// order so runs are deterministic.
    async fn search_database(&self, state: &mut RunState) {
        let mut tables: Vec<String> = state
            .variable_results
            .iter()
            .map(|m| m.entry.table_name.clone())
            .collect();
        tables.sort();
        tables.dedup();

        for table in tables.into_iter().take(MAX_SAMPLE_TABLES) {
            match self.catalog.sample(&table, SAMPLE_ROW_LIMIT).await {
                Ok(sample) => state.database_results.push(sample),
                Err(e) => {
                    state
                        .errors
                        .push(format!("Database search error for '{table}': {e}"));
                }
            }
        }
        tracing::info!("Retrieved samples from {} tables", state.database_results.len());
    }
}

/// Stage 4: group matches by their stamped purpose and assemble the final
/// envelope. Pure function of the terminal run-state.
pub fn aggregate(state: RunState) -> SearchResult {
    let total_matches = state.variable_results.len();

    let mut results_by_purpose: BTreeMap<String, Vec<MetadataMatch>> = BTreeMap::new();
    for m in state.variable_results {
        results_by_purpose
            .entry(m.search_purpose.as_str().to_string())
            .or_default()
            .push(m);
    }

    SearchResult {
        query: state.original_query,
        decomposition: state.decomposed_queries,
        results_by_purpose,
        available_tables: state
            .database_results
            .iter()
            .map(|s| s.table_name.clone())
            .collect(),
        total_matches,
        errors: state.errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Purpose;
    use std::collections::HashMap;

    /// Decomposer stub: canned decomposition, or an error.
    enum FakeDecomposer {
        Returns(Decomposition),
        Fails,
    }

    #[async_trait]
    impl Decomposer for FakeDecomposer {
        async fn decompose(&self, query: &str) -> Result<Decomposition> {
            match self {
                FakeDecomposer::Returns(d) => Ok(d.clone()),
                FakeDecomposer::Fails => {
                    let _ = query;
                    anyhow::bail!("model unavailable")
                }
            }
        }
    }

    /// Catalog stub: term → entries map, with per-term and per-table
    /// failure injection.
    #[derive(Default)]
    struct FakeCatalog {
        entries_by_term: HashMap<String, Vec<CatalogEntry>>,
        failing_terms: Vec<String>,
        failing_tables: Vec<String>,
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn search(
            &self,
            terms: &[String],
            _geometry_type: Option<&str>,
            _limit: i64,
        ) -> Result<Vec<CatalogEntry>> {
            let term = &terms[0];
            if self.failing_terms.contains(term) {
                anyhow::bail!("connection reset");
            }
            Ok(self.entries_by_term.get(term).cloned().unwrap_or_default())
        }

        async fn sample(&self, table: &str, limit: i64) -> Result<TableSample> {
            if self.failing_tables.contains(&table.to_string()) {
                anyhow::bail!("relation does not exist");
            }
            Ok(TableSample {
                table_name: table.to_string(),
                sample_data: vec![serde_json::Map::new(); limit as usize],
                columns: vec!["fips".to_string(), "value".to_string()],
            })
        }
    }

    fn entry(id: i32, table: &str) -> CatalogEntry {
        CatalogEntry {
            id,
            dataset_name: format!("dataset {table}"),
            table_name: table.to_string(),
            source_path: None,
            geometry_type: Some("POLYGON".to_string()),
            row_count: Some(100),
            column_list: vec!["fips".to_string()],
            crs: Some("EPSG:4326".to_string()),
            bbox: None,
            date_ingested: None,
        }
    }

    fn decomposition(subs: &[(&str, Purpose)]) -> Decomposition {
        Decomposition {
            search_queries: subs
                .iter()
                .map(|(q, p)| SubQuery {
                    query: q.to_string(),
                    purpose: *p,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_failed_decomposition_falls_back_to_single_primary() {
        let pipeline = SearchPipeline::new(FakeDecomposer::Fails, FakeCatalog::default());
        let result = pipeline.run("poverty rate").await;

        assert_eq!(result.decomposition, vec![SubQuery::primary("poverty rate")]);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("Decomposition error"));
    }

    #[tokio::test]
    async fn test_empty_decomposition_never_yields_zero_subqueries() {
        let pipeline = SearchPipeline::new(
            FakeDecomposer::Returns(Decomposition::default()),
            FakeCatalog::default(),
        );
        let result = pipeline.run("housing").await;

        assert_eq!(result.decomposition, vec![SubQuery::primary("housing")]);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_poverty_population_scenario() {
        // Decomposer: poverty (primary) + population (normalization).
        // Store: poverty → tables A, B; population → table B.
        let mut catalog = FakeCatalog::default();
        catalog.entries_by_term.insert(
            "poverty".to_string(),
            vec![entry(1, "A"), entry(2, "B")],
        );
        catalog
            .entries_by_term
            .insert("population".to_string(), vec![entry(3, "B")]);

        let pipeline = SearchPipeline::new(
            FakeDecomposer::Returns(decomposition(&[
                ("poverty", Purpose::Primary),
                ("population", Purpose::Normalization),
            ])),
            catalog,
        );
        let result = pipeline.run("poverty rate").await;

        assert_eq!(result.total_matches, 3);
        let mut tables = result.available_tables.clone();
        tables.sort();
        assert_eq!(tables, vec!["A", "B"]);
        assert_eq!(result.results_by_purpose["primary"].len(), 2);
        assert_eq!(result.results_by_purpose["normalization"].len(), 1);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_failed_subquery_records_error_and_keeps_other_matches() {
        let mut catalog = FakeCatalog::default();
        catalog
            .entries_by_term
            .insert("poverty".to_string(), vec![entry(1, "A")]);
        catalog.failing_terms.push("population".to_string());

        let pipeline = SearchPipeline::new(
            FakeDecomposer::Returns(decomposition(&[
                ("poverty", Purpose::Primary),
                ("population", Purpose::Normalization),
            ])),
            catalog,
        );
        let result = pipeline.run("poverty per capita").await;

        assert_eq!(result.total_matches, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("'population'"));
        assert_eq!(result.results_by_purpose["primary"].len(), 1);
        assert!(!result.results_by_purpose.contains_key("normalization"));
    }

    #[tokio::test]
    async fn test_matches_are_stamped_with_subquery_and_purpose() {
        let mut catalog = FakeCatalog::default();
        catalog
            .entries_by_term
            .insert("income".to_string(), vec![entry(1, "A"), entry(2, "B")]);

        let pipeline = SearchPipeline::new(
            FakeDecomposer::Returns(decomposition(&[("income", Purpose::Primary)])),
            catalog,
        );
        let state = pipeline.run_to_state("median income").await;

        assert_eq!(state.variable_results.len(), 2);
        for m in &state.variable_results {
            assert_eq!(m.search_query, "income");
            assert_eq!(m.search_purpose, Purpose::Primary);
        }
    }

    #[tokio::test]
    async fn test_at_most_five_tables_sampled() {
        let mut catalog = FakeCatalog::default();
        let entries: Vec<CatalogEntry> = (0..8).map(|i| entry(i, &format!("t{i}"))).collect();
        catalog.entries_by_term.insert("wide".to_string(), entries);

        let pipeline = SearchPipeline::new(
            FakeDecomposer::Returns(decomposition(&[("wide", Purpose::Primary)])),
            catalog,
        );
        let state = pipeline.run_to_state("wide").await;

        assert_eq!(state.database_results.len(), MAX_SAMPLE_TABLES);
        // Lexical order: t0..t4
        let sampled: Vec<&str> = state
            .database_results
            .iter()
            .map(|s| s.table_name.as_str())
            .collect();
        assert_eq!(sampled, vec!["t0", "t1", "t2", "t3", "t4"]);
    }

    #[tokio::test]
    async fn test_sampled_tables_are_deduplicated() {
        let mut catalog = FakeCatalog::default();
        catalog.entries_by_term.insert(
            "a".to_string(),
            vec![entry(1, "shared"), entry(2, "shared")],
        );
        catalog
            .entries_by_term
            .insert("b".to_string(), vec![entry(3, "shared")]);

        let pipeline = SearchPipeline::new(
            FakeDecomposer::Returns(decomposition(&[
                ("a", Purpose::Primary),
                ("b", Purpose::Related),
            ])),
            catalog,
        );
        let result = pipeline.run("q").await;

        assert_eq!(result.total_matches, 3);
        assert_eq!(result.available_tables, vec!["shared"]);
    }

    #[tokio::test]
    async fn test_failed_table_sample_omits_entry_and_records_error() {
        let mut catalog = FakeCatalog::default();
        catalog
            .entries_by_term
            .insert("x".to_string(), vec![entry(1, "good"), entry(2, "broken")]);
        catalog.failing_tables.push("broken".to_string());

        let pipeline = SearchPipeline::new(
            FakeDecomposer::Returns(decomposition(&[("x", Purpose::Primary)])),
            catalog,
        );
        let result = pipeline.run("x").await;

        assert_eq!(result.available_tables, vec!["good"]);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("'broken'"));
    }

    #[tokio::test]
    async fn test_purpose_grouping_partitions_matches() {
        let mut catalog = FakeCatalog::default();
        catalog
            .entries_by_term
            .insert("a".to_string(), vec![entry(1, "A"), entry(2, "B")]);
        catalog
            .entries_by_term
            .insert("b".to_string(), vec![entry(3, "C")]);
        catalog.entries_by_term.insert("c".to_string(), vec![entry(4, "D")]);

        let pipeline = SearchPipeline::new(
            FakeDecomposer::Returns(decomposition(&[
                ("a", Purpose::Primary),
                ("b", Purpose::Filter),
                ("c", Purpose::Unknown),
            ])),
            catalog,
        );
        let result = pipeline.run("q").await;

        let group_total: usize = result.results_by_purpose.values().map(Vec::len).sum();
        assert_eq!(group_total, result.total_matches);
        assert_eq!(result.results_by_purpose["unknown"].len(), 1);
    }

    #[tokio::test]
    async fn test_run_with_no_matches_is_clean() {
        let pipeline = SearchPipeline::new(
            FakeDecomposer::Returns(decomposition(&[("nothing", Purpose::Primary)])),
            FakeCatalog::default(),
        );
        let result = pipeline.run("nothing here").await;

        assert_eq!(result.total_matches, 0);
        assert!(result.results_by_purpose.is_empty());
        assert!(result.available_tables.is_empty());
        assert!(result.errors.is_empty());
    }
}
