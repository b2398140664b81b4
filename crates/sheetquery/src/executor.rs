//! Query executor: turns compiled plans into store statements and runs them
//!
//! Both query paths share one shape. The row query and the count query are
//! built from the same predicate and parameter list, rows are ordered by the
//! primary key ascending, and every returned cell goes through the same
//! numeric stringification.

use crate::descriptor::{PRIMARY_KEY, TableDescriptor, quote_ident};
use crate::error::{EngineError, Result};
use crate::filter::{Comparison, CompiledQuery, Operand, Operator, PredicatePlan};
use crate::store::{Statement, Store};
use crate::value::{Cell, SqlParam};
use sea_query::{Alias, Cond, Expr, Order, Query, SimpleExpr, SqliteQueryBuilder};
use serde_json::{Map, Value as Json};
use std::sync::Arc;

/// One page of rows plus the count of every matching row
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Field to value maps in output column order
    pub rows: Vec<Map<String, Json>>,
    pub total_count: u64,
}

/// Values accepted for a write, after dropping unknown columns
#[derive(Debug, Clone, PartialEq)]
pub struct WriteValues {
    pub assignments: Vec<(String, SqlParam)>,
    pub dropped_fields: Vec<String>,
}

pub struct QueryExecutor {
    store: Arc<dyn Store>,
    numeric_string_threshold: f64,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn Store>, numeric_string_threshold: f64) -> Self {
        Self {
            store,
            numeric_string_threshold,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run the row and count queries for `query`
    pub async fn execute(&self, query: &CompiledQuery) -> Result<ExecutionResult> {
        let (rows_stmt, count_stmt) = select_statements(query)?;
        let total_count = self.store.fetch_count(count_stmt).await?;
        let cells = self.store.fetch_rows(rows_stmt, query.columns.len()).await?;

        let rows = cells
            .into_iter()
            .map(|row| self.row_map(&query.columns, row))
            .collect();
        Ok(ExecutionResult { rows, total_count })
    }

    fn row_map(&self, columns: &[String], row: Vec<Cell>) -> Map<String, Json> {
        let mut map = Map::with_capacity(columns.len());
        for (name, cell) in columns.iter().zip(row) {
            _ = map.insert(name.clone(), cell.into_json(self.numeric_string_threshold));
        }
        map
    }

    /// Insert rows one statement at a time. Returns the number inserted.
    pub async fn insert_rows(
        &self,
        descriptor: &TableDescriptor,
        rows: &[Map<String, Json>],
    ) -> Result<u64> {
        let mut inserted = 0;
        for row in rows {
            let values = write_values(descriptor, row)?;
            let stmt = insert_statement(descriptor, &values.assignments)?;
            inserted += self.store.execute(stmt).await?;
        }
        Ok(inserted)
    }

    /// Update every row matching `query` with `values`
    pub async fn update(&self, query: &CompiledQuery, values: &WriteValues) -> Result<u64> {
        let stmt = update_statement(query, &values.assignments)?;
        self.store.execute(stmt).await
    }

    /// Delete every row matching `query`
    pub async fn delete(&self, query: &CompiledQuery) -> Result<u64> {
        let stmt = delete_statement(query)?;
        self.store.execute(stmt).await
    }
}

/// Build the paginated row statement and the count statement
pub fn select_statements(query: &CompiledQuery) -> Result<(Statement, Statement)> {
    let limit = query.pagination.limit;
    let offset = query.pagination.offset();
    match &query.plan {
        PredicatePlan::Builder(comparisons) => {
            let cond = builder_condition(comparisons);
            let mut select = Query::select();
            select
                .columns(query.columns.iter().map(Alias::new))
                .from(Alias::new(&query.table));
            if let Some(cond) = cond.clone() {
                select.cond_where(cond);
            }
            let (sql, values) = select
                .order_by(Alias::new(PRIMARY_KEY), Order::Asc)
                .limit(limit)
                .offset(offset)
                .build(SqliteQueryBuilder);
            let rows = Statement::new(sql, sea_params(values)?);

            let mut count = Query::select();
            count
                .expr(Expr::cust("COUNT(*)"))
                .from(Alias::new(&query.table));
            if let Some(cond) = cond {
                count.cond_where(cond);
            }
            let (sql, values) = count.build(SqliteQueryBuilder);
            let count = Statement::new(sql, sea_params(values)?);
            Ok((rows, count))
        }
        PredicatePlan::Raw { sql, parameters } => {
            let columns = query
                .columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            let table = quote_ident(&query.table);
            let clause = where_clause(sql);

            let mut row_params = parameters.clone();
            row_params.push(int_param(limit)?);
            row_params.push(int_param(offset)?);
            let rows = Statement::new(
                format!(
                    "SELECT {columns} FROM {table}{clause} ORDER BY {} ASC LIMIT ? OFFSET ?",
                    quote_ident(PRIMARY_KEY)
                ),
                row_params,
            );
            let count = Statement::new(
                format!("SELECT COUNT(*) FROM {table}{clause}"),
                parameters.clone(),
            );
            Ok((rows, count))
        }
    }
}

/// Keep known columns of a written row, coerced to their semantic types.
/// The primary key is assigned by the store and never written.
pub fn write_values(descriptor: &TableDescriptor, row: &Map<String, Json>) -> Result<WriteValues> {
    let mut assignments = Vec::with_capacity(row.len());
    let mut dropped_fields = Vec::new();
    for (name, value) in row {
        match descriptor.columns.iter().find(|c| &c.name == name) {
            Some(column) => assignments.push((
                column.name.clone(),
                SqlParam::coerce(value, column.semantic_type, &column.name)?,
            )),
            None => {
                diagnostics::log_info!(
                    "Ignoring written value for unknown column {field} on {table}",
                    field: name.as_str(),
                    table: descriptor.physical_name.as_str()
                );
                dropped_fields.push(name.clone());
            }
        }
    }
    Ok(WriteValues {
        assignments,
        dropped_fields,
    })
}

pub fn insert_statement(
    descriptor: &TableDescriptor,
    assignments: &[(String, SqlParam)],
) -> Result<Statement> {
    let table = quote_ident(&descriptor.physical_name);
    let pk = quote_ident(PRIMARY_KEY);
    let next_id = Expr::cust(format!("(SELECT COALESCE(MAX({pk}), 0) + 1 FROM {table})"));

    let mut columns = vec![Alias::new(PRIMARY_KEY)];
    let mut values: Vec<SimpleExpr> = vec![next_id];
    for (name, value) in assignments {
        columns.push(Alias::new(name));
        values.push(SimpleExpr::Value(value.to_sea_value()));
    }

    let (sql, params) = Query::insert()
        .into_table(Alias::new(&descriptor.physical_name))
        .columns(columns)
        .values(values)
        .map_err(|e| EngineError::validation(format!("invalid insert: {e}")))?
        .build(SqliteQueryBuilder);
    Ok(Statement::new(sql, sea_params(params)?))
}

pub fn update_statement(query: &CompiledQuery, assignments: &[(String, SqlParam)]) -> Result<Statement> {
    if assignments.is_empty() {
        return Err(EngineError::validation("update has no known columns to set"));
    }
    match &query.plan {
        PredicatePlan::Builder(comparisons) => {
            let mut update = Query::update();
            update.table(Alias::new(&query.table)).values(
                assignments
                    .iter()
                    .map(|(name, value)| (Alias::new(name), SimpleExpr::Value(value.to_sea_value()))),
            );
            if let Some(cond) = builder_condition(comparisons) {
                update.cond_where(cond);
            }
            let (sql, values) = update.build(SqliteQueryBuilder);
            Ok(Statement::new(sql, sea_params(values)?))
        }
        PredicatePlan::Raw { sql, parameters } => {
            let sets = assignments
                .iter()
                .map(|(name, _)| format!("{} = ?", quote_ident(name)))
                .collect::<Vec<_>>()
                .join(", ");
            let mut params: Vec<SqlParam> = assignments.iter().map(|(_, v)| v.clone()).collect();
            params.extend(parameters.iter().cloned());
            Ok(Statement::new(
                format!("UPDATE {} SET {sets}{}", quote_ident(&query.table), where_clause(sql)),
                params,
            ))
        }
    }
}

pub fn delete_statement(query: &CompiledQuery) -> Result<Statement> {
    match &query.plan {
        PredicatePlan::Builder(comparisons) => {
            let mut delete = Query::delete();
            delete.from_table(Alias::new(&query.table));
            if let Some(cond) = builder_condition(comparisons) {
                delete.cond_where(cond);
            }
            let (sql, values) = delete.build(SqliteQueryBuilder);
            Ok(Statement::new(sql, sea_params(values)?))
        }
        PredicatePlan::Raw { sql, parameters } => Ok(Statement::new(
            format!("DELETE FROM {}{}", quote_ident(&query.table), where_clause(sql)),
            parameters.clone(),
        )),
    }
}

fn where_clause(predicate: &str) -> String {
    if predicate.is_empty() {
        String::new()
    } else {
        format!(" WHERE {predicate}")
    }
}

/// `None` for an empty conjunction, which sea-query would render as a
/// constant `WHERE TRUE`
fn builder_condition(comparisons: &[Comparison]) -> Option<Cond> {
    if comparisons.is_empty() {
        return None;
    }
    Some(
        comparisons
            .iter()
            .fold(Cond::all(), |cond, cmp| cond.add(builder_expr(cmp))),
    )
}

fn builder_expr(cmp: &Comparison) -> SimpleExpr {
    let col = Expr::col(Alias::new(&cmp.column));
    match &cmp.operand {
        Operand::Scalar(SqlParam::Null) if cmp.operator == Operator::Eq => col.is_null(),
        Operand::Scalar(SqlParam::Null) if cmp.operator == Operator::Ne => col.is_not_null(),
        Operand::Scalar(value) => {
            let v = value.to_sea_value();
            match cmp.operator {
                Operator::Eq => col.eq(v),
                Operator::Ne => col.ne(v),
                Operator::Gt => col.gt(v),
                Operator::Lt => col.lt(v),
                Operator::Gte => col.gte(v),
                Operator::Lte => col.lte(v),
                Operator::Like => Expr::cust_with_values(
                    format!("{} ILIKE ?", quote_ident(&cmp.column)),
                    [value.to_text()],
                ),
                // Lists never carry a scalar operand
                Operator::In => col.is_in([v]),
                Operator::NotIn => col.is_not_in([v]),
            }
        }
        Operand::List(values) => {
            let values = values.iter().map(SqlParam::to_sea_value);
            if cmp.operator == Operator::NotIn {
                col.is_not_in(values)
            } else {
                col.is_in(values)
            }
        }
    }
}

fn sea_params(values: sea_query::Values) -> Result<Vec<SqlParam>> {
    values.0.into_iter().map(SqlParam::from_sea_value).collect()
}

fn int_param(n: u64) -> Result<SqlParam> {
    i64::try_from(n)
        .map(SqlParam::Int)
        .map_err(|_| EngineError::validation(format!("pagination value {n} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{RawColumnDef, SemanticType};
    use crate::filter::{FilterCompiler, Pagination};
    use serde_json::json;

    const DS: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn descriptor() -> TableDescriptor {
        TableDescriptor::from_raw(
            DS,
            &[RawColumnDef::new("name", "string"), RawColumnDef::new("age", "number")],
        )
        .expect("descriptor")
    }

    fn compile(filter: Json, page: u64, limit: u64) -> CompiledQuery {
        FilterCompiler::default()
            .compile(&descriptor(), &filter, Pagination::new(page, limit).expect("page"))
            .expect("compile")
    }

    #[test]
    fn test_builder_select_statements() {
        let q = compile(json!({"name": "A", "age": {"$gt": 3}}), 2, 5);
        let (rows, count) = select_statements(&q).expect("statements");
        assert_eq!(
            rows.sql,
            format!(
                r#"SELECT "id", "name", "age" FROM "data_{DS}" WHERE "name" = ? AND "age" > ? ORDER BY "id" ASC LIMIT ? OFFSET ?"#
            )
        );
        assert_eq!(
            rows.params,
            vec![
                SqlParam::Text("A".into()),
                SqlParam::Int(3),
                SqlParam::Int(5),
                SqlParam::Int(5)
            ]
        );
        assert_eq!(
            count.sql,
            format!(r#"SELECT COUNT(*) FROM "data_{DS}" WHERE "name" = ? AND "age" > ?"#)
        );
        assert_eq!(count.params.len(), 2);
    }

    #[test]
    fn test_raw_select_statements_share_parameters() {
        let q = compile(json!({"$or": [{"name": "A"}, {"age": {"$like": "5"}}]}), 1, 10);
        let (rows, count) = select_statements(&q).expect("statements");
        let predicate = format!(
            r#"("name" = ? OR {} ILIKE ?)"#,
            crate::filter::text_expr(r#""age""#, SemanticType::Number)
        );
        assert_eq!(
            rows.sql,
            format!(
                r#"SELECT "id", "name", "age" FROM "data_{DS}" WHERE {predicate} ORDER BY "id" ASC LIMIT ? OFFSET ?"#
            )
        );
        assert_eq!(count.sql, format!(r#"SELECT COUNT(*) FROM "data_{DS}" WHERE {predicate}"#));
        assert_eq!(&rows.params[..2], &count.params[..]);
        assert_eq!(&rows.params[2..], &[SqlParam::Int(10), SqlParam::Int(0)]);
    }

    #[test]
    fn test_unfiltered_has_no_where() {
        let q = compile(json!({}), 1, 10);
        let (rows, count) = select_statements(&q).expect("statements");
        assert!(!rows.sql.contains("WHERE"));
        assert_eq!(count.sql, format!(r#"SELECT COUNT(*) FROM "data_{DS}""#));
        assert!(count.params.is_empty());
    }

    #[test]
    fn test_builder_like_ignores_case() {
        let q = compile(json!({"name": {"$like": "al"}}), 1, 10);
        let (_, count) = select_statements(&q).expect("statements");
        assert_eq!(
            count.sql,
            format!(r#"SELECT COUNT(*) FROM "data_{DS}" WHERE "name" ILIKE ?"#)
        );
        assert_eq!(count.params, vec![SqlParam::Text("%al%".into())]);
    }

    #[test]
    fn test_write_values_drop_unknown() {
        let row = json!({"name": "Z", "nope": 1, "id": 99, "age": "7"});
        let values = write_values(&descriptor(), row.as_object().expect("object")).expect("values");
        assert_eq!(
            values.assignments,
            vec![
                ("name".to_string(), SqlParam::Text("Z".into())),
                ("age".to_string(), SqlParam::Int(7))
            ]
        );
        assert_eq!(values.dropped_fields, vec!["nope", "id"]);
    }

    #[test]
    fn test_insert_statement_assigns_next_id() {
        let stmt = insert_statement(
            &descriptor(),
            &[("name".to_string(), SqlParam::Text("Z".into()))],
        )
        .expect("insert");
        assert_eq!(
            stmt.sql,
            format!(
                r#"INSERT INTO "data_{DS}" ("id", "name") VALUES ((SELECT COALESCE(MAX("id"), 0) + 1 FROM "data_{DS}"), ?)"#
            )
        );
        assert_eq!(stmt.params, vec![SqlParam::Text("Z".into())]);
    }

    #[test]
    fn test_update_and_delete_statements() {
        let q = compile(json!({"$or": [{"name": "A"}, {"age": 1}]}), 1, 10);
        let stmt = update_statement(&q, &[("age".to_string(), SqlParam::Int(2))]).expect("update");
        assert_eq!(
            stmt.sql,
            format!(r#"UPDATE "data_{DS}" SET "age" = ? WHERE ("name" = ? OR "age" = ?)"#)
        );
        assert_eq!(
            stmt.params,
            vec![SqlParam::Int(2), SqlParam::Text("A".into()), SqlParam::Int(1)]
        );
        assert!(update_statement(&q, &[]).is_err());

        let q = compile(json!({"name": "A"}), 1, 10);
        let stmt = delete_statement(&q).expect("delete");
        assert_eq!(stmt.sql, format!(r#"DELETE FROM "data_{DS}" WHERE "name" = ?"#));
    }
}
