//! PostGIS catalog client.
//!
//! All operations are read-only and parameterized: values are bound with `$n`
//! placeholders and identifiers pass through [`quote_ident`], never raw string
//! interpolation. Every query failure is caught, logged, and surfaced as an
//! empty result, so callers cannot distinguish "no rows" from "query failed" —
//! that is the contract, and the pipeline layers its own error reporting on
//! top of it.

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::models::{CatalogEntry, ColumnMatch, TableSample};

/// Handle to the catalog database. Opened once at startup and shared by all
/// runs; each statement commits or rolls back independently, so no transaction
/// state leaks between concurrent requests.
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("Failed to connect to the catalog database")?;
        tracing::info!("Catalog connection established");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Catalog connection closed");
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Search the `dataset_metadata` catalog. Each term matches
    /// case-insensitively as a substring of the dataset name, table name, or
    /// any column name; terms combine with OR, a geometry filter ANDs over the
    /// whole disjunction. Ordered by row count descending, nulls last.
    pub async fn search_metadata(
        &self,
        terms: &[String],
        geometry_type: Option<&str>,
        limit: i64,
    ) -> Vec<CatalogEntry> {
        match self.try_search_metadata(terms, geometry_type, limit).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Metadata search failed: {e}");
                Vec::new()
            }
        }
    }

    async fn try_search_metadata(
        &self,
        terms: &[String],
        geometry_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<CatalogEntry>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let sql = metadata_search_sql(terms.len(), geometry_type.is_some());
        let mut query = sqlx::query_as::<_, CatalogEntry>(&sql);
        for term in terms {
            let pattern = format!("%{}%", term.to_lowercase());
            query = query.bind(pattern.clone()).bind(pattern.clone()).bind(pattern);
        }
        if let Some(geom) = geometry_type {
            query = query.bind(geom.to_string());
        }
        Ok(query.bind(limit).fetch_all(&self.pool).await?)
    }

    /// Resolve column-name patterns to the tables containing a matching
    /// column, one group per (table, pattern) pair.
    pub async fn search_columns(&self, patterns: &[String], limit: i64) -> Vec<ColumnMatch> {
        match self.try_search_columns(patterns, limit).await {
            Ok(matches) => matches,
            Err(e) => {
                tracing::error!("Column search failed: {e}");
                Vec::new()
            }
        }
    }

    async fn try_search_columns(&self, patterns: &[String], limit: i64) -> Result<Vec<ColumnMatch>> {
        let mut results = Vec::new();
        for pattern in patterns {
            let rows = sqlx::query_as::<_, ColumnMatch>(
                "SELECT table_name, dataset_name, geometry_type, \
                        array_agg(col) AS matching_columns \
                 FROM dataset_metadata, unnest(column_list) AS col \
                 WHERE LOWER(col) LIKE $1 \
                 GROUP BY table_name, dataset_name, geometry_type \
                 LIMIT $2",
            )
            .bind(format!("%{}%", pattern.to_lowercase()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            for mut row in rows {
                row.search_pattern = pattern.clone();
                results.push(row);
            }
        }
        Ok(results)
    }

    /// First N rows of a named table in natural storage order, optionally
    /// restricted to a column subset.
    pub async fn table_sample(
        &self,
        table: &str,
        columns: Option<&[String]>,
        limit: i64,
    ) -> TableSample {
        match self.try_table_sample(table, columns, limit).await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::error!("Failed to sample table {table}: {e}");
                TableSample {
                    table_name: table.to_string(),
                    ..Default::default()
                }
            }
        }
    }

    async fn try_table_sample(
        &self,
        table: &str,
        columns: Option<&[String]>,
        limit: i64,
    ) -> Result<TableSample> {
        let col_str = match columns {
            Some(cols) if !cols.is_empty() => quoted_list(cols),
            _ => "*".to_string(),
        };
        let sql = format!(
            "SELECT row_to_json(t) FROM (SELECT {col_str} FROM {} LIMIT $1) t",
            quote_ident(table)
        );
        let rows: Vec<Value> = sqlx::query_scalar(&sql).bind(limit).fetch_all(&self.pool).await?;

        let sample_data: Vec<Map<String, Value>> = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        let columns = sample_data
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();

        Ok(TableSample {
            table_name: table.to_string(),
            sample_data,
            columns,
        })
    }

    /// count/mean/min/max/stddev/median for one numeric column, nulls filtered
    /// out, optionally grouped by another column. Returns `{}` on failure and
    /// `{"grouped_statistics": [...]}` when grouped.
    pub async fn column_statistics(
        &self,
        table: &str,
        column: &str,
        group_by: Option<&str>,
    ) -> Value {
        match self.try_column_statistics(table, column, group_by).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!("Statistics query failed: {e}");
                json!({})
            }
        }
    }

    async fn try_column_statistics(
        &self,
        table: &str,
        column: &str,
        group_by: Option<&str>,
    ) -> Result<Value> {
        let col = quote_ident(column);
        let tbl = quote_ident(table);
        let measures = format!(
            "COUNT({col}) AS count, \
             AVG({col}::numeric) AS mean, \
             MIN({col}::numeric) AS min, \
             MAX({col}::numeric) AS max, \
             STDDEV({col}::numeric) AS stddev, \
             PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY {col}::numeric) AS median"
        );

        match group_by {
            Some(group) => {
                let grp = quote_ident(group);
                let sql = format!(
                    "SELECT row_to_json(t) FROM ( \
                         SELECT {grp}, {measures} FROM {tbl} \
                         WHERE {col} IS NOT NULL \
                         GROUP BY {grp} ORDER BY {grp} \
                     ) t"
                );
                let rows: Vec<Value> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;
                Ok(json!({ "grouped_statistics": rows }))
            }
            None => {
                let sql = format!(
                    "SELECT row_to_json(t) FROM ( \
                         SELECT {measures} FROM {tbl} WHERE {col} IS NOT NULL \
                     ) t"
                );
                Ok(sqlx::query_scalar::<_, Value>(&sql).fetch_one(&self.pool).await?)
            }
        }
    }

    /// Inner join of two tables on a shared key column (typically a FIPS
    /// code), returning the requested columns or all columns of both sides.
    pub async fn join_tables(
        &self,
        left: &str,
        right: &str,
        key: &str,
        left_columns: Option<&[String]>,
        right_columns: Option<&[String]>,
        limit: i64,
    ) -> Vec<Map<String, Value>> {
        match self
            .try_join_tables(left, right, key, left_columns, right_columns, limit)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("Table join failed: {e}");
                Vec::new()
            }
        }
    }

    async fn try_join_tables(
        &self,
        left: &str,
        right: &str,
        key: &str,
        left_columns: Option<&[String]>,
        right_columns: Option<&[String]>,
        limit: i64,
    ) -> Result<Vec<Map<String, Value>>> {
        let l = quote_ident(left);
        let r = quote_ident(right);
        let k = quote_ident(key);

        let mut cols = Vec::new();
        for (table, selection) in [(left, left_columns), (right, right_columns)] {
            if let Some(selection) = selection {
                for column in selection {
                    cols.push(format!(
                        "{}.{} AS {}",
                        quote_ident(table),
                        quote_ident(column),
                        quote_ident(&format!("{table}_{column}"))
                    ));
                }
            }
        }
        let col_str = if cols.is_empty() {
            format!("{l}.*, {r}.*")
        } else {
            cols.join(", ")
        };

        let sql = format!(
            "SELECT row_to_json(t) FROM ( \
                 SELECT {col_str} FROM {l} \
                 INNER JOIN {r} ON {l}.{k} = {r}.{k} \
                 LIMIT $1 \
             ) t"
        );
        let rows: Vec<Value> = sqlx::query_scalar(&sql).bind(limit).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }

    /// Fetch features from a spatial table with the geometry serialized as
    /// GeoJSON, optionally restricted to a bounding box (SRID 4326) and an
    /// attribute subset.
    pub async fn spatial_features(
        &self,
        table: &str,
        geometry_column: &str,
        bbox: Option<[f64; 4]>,
        attributes: Option<&[String]>,
        limit: i64,
    ) -> Vec<Map<String, Value>> {
        match self
            .try_spatial_features(table, geometry_column, bbox, attributes, limit)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("Spatial query failed: {e}");
                Vec::new()
            }
        }
    }

    async fn try_spatial_features(
        &self,
        table: &str,
        geometry_column: &str,
        bbox: Option<[f64; 4]>,
        attributes: Option<&[String]>,
        limit: i64,
    ) -> Result<Vec<Map<String, Value>>> {
        let geom = quote_ident(geometry_column);
        let attrs = match attributes {
            Some(attrs) if !attrs.is_empty() => quoted_list(attrs),
            _ => "*".to_string(),
        };

        let sql = match bbox {
            Some(_) => format!(
                "SELECT row_to_json(t) FROM ( \
                     SELECT {attrs}, ST_AsGeoJSON({geom})::json AS geometry \
                     FROM {} \
                     WHERE {geom} && ST_MakeEnvelope($1, $2, $3, $4, 4326) \
                     LIMIT $5 \
                 ) t",
                quote_ident(table)
            ),
            None => format!(
                "SELECT row_to_json(t) FROM ( \
                     SELECT {attrs}, ST_AsGeoJSON({geom})::json AS geometry \
                     FROM {} LIMIT $1 \
                 ) t",
                quote_ident(table)
            ),
        };

        let mut query = sqlx::query_scalar::<_, Value>(&sql);
        if let Some([minx, miny, maxx, maxy]) = bbox {
            query = query.bind(minx).bind(miny).bind(maxx).bind(maxy);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl crate::pipeline::Catalog for MetadataStore {
    // These wrappers never error: the store already folds failures into
    // empty results per its contract.
    async fn search(
        &self,
        terms: &[String],
        geometry_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<CatalogEntry>> {
        Ok(self.search_metadata(terms, geometry_type, limit).await)
    }

    async fn sample(&self, table: &str, limit: i64) -> Result<TableSample> {
        Ok(self.table_sample(table, None, limit).await)
    }
}

/// Quote a SQL identifier, doubling embedded quotes. Identifiers cannot be
/// bound as parameters, so every table/column name goes through here.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quoted_list(idents: &[String]) -> String {
    idents.iter().map(|i| quote_ident(i)).collect::<Vec<_>>().join(", ")
}

/// Build the catalog search statement for `term_count` terms, each consuming
/// three LIKE placeholders, followed by an optional geometry equality bind and
/// the limit bind.
fn metadata_search_sql(term_count: usize, with_geometry: bool) -> String {
    let mut conditions = Vec::with_capacity(term_count);
    let mut arg = 1;
    for _ in 0..term_count {
        conditions.push(format!(
            "(LOWER(dataset_name) LIKE ${} OR LOWER(table_name) LIKE ${} \
             OR EXISTS (SELECT 1 FROM unnest(column_list) AS col WHERE LOWER(col) LIKE ${}))",
            arg,
            arg + 1,
            arg + 2
        ));
        arg += 3;
    }

    let mut where_clause = conditions.join(" OR ");
    if with_geometry {
        where_clause = format!("({where_clause}) AND geometry_type = ${arg}");
        arg += 1;
    }

    format!(
        "SELECT id, dataset_name, table_name, source_path, geometry_type, row_count, \
                column_list, crs, bbox::text AS bbox, date_ingested \
         FROM dataset_metadata \
         WHERE {where_clause} \
         ORDER BY row_count DESC NULLS LAST \
         LIMIT ${arg}"
    )
}
