use serde_json::{json, Value};

use super::params::Params;
use super::{HandlerResult, ToolCatalog};
use crate::adapters::sql::RowExt;
use crate::domain::models::{Row, SqlValue, ToolResponse};
use crate::domain::ports::ObjectKind;

const DESCRIBE_SAMPLE_ROWS: u32 = 5;

impl ToolCatalog {
    pub(super) fn literal(&self, text: &str) -> String {
        self.store.escape(&SqlValue::from(text), true)
    }

    pub(super) fn quoted(&self, ident: &str) -> String {
        self.store.dialect().quote_ident(ident)
    }

    /// Map a requested database name onto the connected database.
    ///
    /// The configured home label and the engine's own name for the current
    /// database both resolve; anything else is unknown.
    pub(super) async fn resolve_database(&self, requested: &str) -> Result<String, ToolResponse> {
        if requested.eq_ignore_ascii_case(&self.home_database) {
            return Ok(self.home_database.clone());
        }
        let current = self
            .store
            .execute_read(&self.store.dialect().current_database())
            .await?;
        if current
            .iter()
            .filter_map(|r| r.opt_text("name"))
            .any(|name| name.eq_ignore_ascii_case(requested))
        {
            Ok(requested.to_string())
        } else {
            Err(ToolResponse::not_found(format!("unknown database: {requested}")))
        }
    }

    /// Column metadata of `table`; an unknown table is `not_found`.
    pub(super) async fn table_columns(&self, table: &str) -> Result<Vec<Row>, ToolResponse> {
        let bare = table.rsplit('.').next().unwrap_or(table);
        let columns = self
            .store
            .execute_read(&self.store.dialect().describe_table(&self.literal(bare)))
            .await?;
        if columns.is_empty() {
            Err(ToolResponse::not_found(format!("table not found: {table}")))
        } else {
            Ok(columns)
        }
    }

    pub(super) async fn list_databases(&self) -> HandlerResult {
        let rows = self
            .store
            .execute_read(&self.store.dialect().list_databases())
            .await?;
        let mut databases = vec![self.home_database.clone()];
        for name in rows.iter().filter_map(|r| r.opt_text("name")) {
            if !databases.iter().any(|d| d.eq_ignore_ascii_case(&name)) {
                databases.push(name);
            }
        }
        Ok(json!({
            "databases": databases,
            "default_database": self.home_database,
            "backend": self.store.backend_kind(),
        }))
    }

    pub(super) async fn connect_to_database(&self, params: &Params<'_>) -> HandlerResult {
        let database = self.resolve_database(params.str("database_name")?).await?;
        self.store.ping().await?;
        Ok(json!({
            "database": database,
            "connected": true,
            "backend": self.store.backend_kind(),
            "dialect": self.store.dialect().name(),
        }))
    }

    pub(super) async fn get_schema_info(&self, params: &Params<'_>) -> HandlerResult {
        let database = self.resolve_database(params.str("database_name")?).await?;
        let kinds = match params.string_list("object_types") {
            None => vec![ObjectKind::Table, ObjectKind::View],
            Some(requested) => {
                let mut kinds = Vec::new();
                for name in requested {
                    let kind = ObjectKind::parse(name).ok_or_else(|| {
                        ToolResponse::validation(format!(
                            "get_schema_info: unknown object type '{name}' (expected tables or views)"
                        ))
                    })?;
                    if !kinds.contains(&kind) {
                        kinds.push(kind);
                    }
                }
                kinds
            }
        };

        let mut tables = Vec::new();
        let mut views = Vec::new();
        for kind in kinds {
            let names = self
                .store
                .execute_read(&self.store.dialect().list_objects(kind))
                .await?
                .iter()
                .filter_map(|r| r.opt_text("object_name"))
                .collect::<Vec<_>>();
            match kind {
                ObjectKind::Table => tables = names,
                ObjectKind::View => views = names,
            }
        }

        Ok(json!({
            "database": database,
            "table_count": tables.len(),
            "view_count": views.len(),
            "tables": tables,
            "views": views,
        }))
    }

    pub(super) async fn describe_table(&self, params: &Params<'_>) -> HandlerResult {
        let database = self.resolve_database(params.str("database_name")?).await?;
        let table = params.identifier("table_name")?;
        let columns: Vec<Value> = self
            .table_columns(table)
            .await?
            .iter()
            .map(|col| {
                json!({
                    "column_name": col.opt_text("column_name"),
                    "data_type": col.opt_text("data_type").unwrap_or_default(),
                    "nullable": col.opt_text("is_nullable").is_some_and(|v| v.eq_ignore_ascii_case("YES")),
                    "default": col.opt_text("column_default"),
                    "primary_key": col.int("is_primary_key").unwrap_or(0) > 0,
                })
            })
            .collect();

        let mut data = json!({
            "database": database,
            "table": table,
            "column_count": columns.len(),
            "columns": columns,
        });
        if params.opt_bool("include_sample_data").unwrap_or(false) {
            let sample = self
                .store
                .execute_read(&format!(
                    "SELECT * FROM {} LIMIT {DESCRIBE_SAMPLE_ROWS}",
                    self.quoted(table)
                ))
                .await?;
            data["sample_data"] = serde_json::to_value(sample).map_err(|e| ToolResponse::storage(e.to_string()))?;
        }
        Ok(data)
    }

    pub(super) async fn sample_table(&self, params: &Params<'_>) -> HandlerResult {
        let database = self.resolve_database(params.str("database_name")?).await?;
        let table = params.identifier("table_name")?;
        let row_count = params.count(
            "row_count",
            self.limits.default_sample_rows,
            self.limits.max_sample_rows,
        )?;
        self.table_columns(table).await?;

        let column_list = match params.string_list("columns") {
            Some(columns) if !columns.is_empty() => columns
                .iter()
                .map(|c| {
                    if crate::domain::ports::is_identifier(c) {
                        Ok(self.quoted(c))
                    } else {
                        Err(ToolResponse::validation(format!(
                            "sample_table: invalid column name {c:?}"
                        )))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?
                .join(", "),
            _ => "*".to_string(),
        };

        let rows = self
            .store
            .execute_read(&format!(
                "SELECT {column_list} FROM {} LIMIT {row_count}",
                self.quoted(table)
            ))
            .await?;
        Ok(json!({
            "database": database,
            "table": table,
            "row_count": rows.len(),
            "rows": rows,
        }))
    }

    pub(super) async fn get_column_stats(&self, params: &Params<'_>) -> HandlerResult {
        let database = self.resolve_database(params.str("database_name")?).await?;
        let table = params.identifier("table_name")?;
        let column = params.identifier("column_name")?;
        let known = self
            .table_columns(table)
            .await?
            .iter()
            .filter_map(|r| r.opt_text("column_name"))
            .any(|c| c.eq_ignore_ascii_case(column));
        if !known {
            return Err(ToolResponse::not_found(format!(
                "column not found: {table}.{column}"
            )));
        }

        let (table_sql, column_sql) = (self.quoted(table), self.quoted(column));
        let summary = self
            .store
            .execute_read(&format!(
                "SELECT COUNT(*) AS total_count, COUNT({column_sql}) AS non_null_count, \
                 COUNT(DISTINCT {column_sql}) AS distinct_count, \
                 MIN({column_sql}) AS min_value, MAX({column_sql}) AS max_value \
                 FROM {table_sql}"
            ))
            .await?;
        let Some(summary) = summary.first() else {
            return Err(ToolResponse::storage("column statistics returned no row"));
        };
        let most_common = self
            .store
            .execute_read(&format!(
                "SELECT {column_sql} AS value, COUNT(*) AS frequency FROM {table_sql} \
                 WHERE {column_sql} IS NOT NULL GROUP BY {column_sql} \
                 ORDER BY frequency DESC LIMIT 1"
            ))
            .await?;

        let total = summary.int("total_count").unwrap_or(0);
        let non_null = summary.int("non_null_count").unwrap_or(0);
        Ok(json!({
            "database": database,
            "table": table,
            "column": column,
            "total_count": total,
            "non_null_count": non_null,
            "null_count": total - non_null,
            "distinct_count": summary.int("distinct_count").unwrap_or(0),
            "min_value": summary.value("min_value"),
            "max_value": summary.value("max_value"),
            "most_common_value": most_common.first().map(|r| r.value("value")),
            "most_common_frequency": most_common.first().and_then(|r| r.int("frequency").ok()),
        }))
    }

    pub(super) async fn get_table_relationships(&self, params: &Params<'_>) -> HandlerResult {
        let database = self.resolve_database(params.str("database_name")?).await?;
        let table = match params.opt_str("table_name") {
            Some(_) => Some(params.identifier("table_name")?),
            None => None,
        };
        let literal = table.map(|t| self.literal(t.rsplit('.').next().unwrap_or(t)));
        let edges = self
            .store
            .execute_read(&self.store.dialect().foreign_keys(literal.as_deref()))
            .await?;
        Ok(json!({
            "database": database,
            "table": table,
            "relationship_count": edges.len(),
            "relationships": edges,
        }))
    }
}
