//! Filter compilation: validate a parsed filter against a table descriptor
//! and produce the parameterized plan the executor runs.

use super::{FilterExpression, LogicalKind, Operator, render_predicate};
use crate::descriptor::{SemanticType, TableDescriptor};
use crate::error::{EngineError, Result};
use crate::value::{SqlParam, json_text};
use serde_json::Value as Json;

/// Page request. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
}

impl Pagination {
    pub fn new(page: u64, limit: u64) -> Result<Self> {
        if page == 0 {
            return Err(EngineError::validation("page must be at least 1"));
        }
        if limit == 0 {
            return Err(EngineError::validation("limit must be at least 1"));
        }
        Ok(Self { page, limit })
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    #[must_use]
    pub fn total_pages(&self, total_count: u64) -> u64 {
        total_count.div_ceil(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 10 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Scalar(SqlParam),
    List(Vec<SqlParam>),
}

/// One validated field comparison. `column` always names a descriptor column.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub column: String,
    pub semantic: SemanticType,
    pub operator: Operator,
    pub operand: Operand,
    /// Compare the column's text rendering instead of its native value
    pub cast_to_text: bool,
}

/// Validated predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare(Comparison),
    Group {
        kind: LogicalKind,
        children: Vec<Predicate>,
    },
}

/// How the executor expresses the predicate
#[derive(Debug, Clone, PartialEq)]
pub enum PredicatePlan {
    /// Flat conjunction, emitted through query-builder calls
    Builder(Vec<Comparison>),
    /// Pre-rendered predicate with `?` placeholders; empty `sql` means no predicate
    Raw {
        sql: String,
        parameters: Vec<SqlParam>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub dataset_id: String,
    pub table: String,
    /// Output columns in row order, primary key first
    pub columns: Vec<String>,
    pub pagination: Pagination,
    pub plan: PredicatePlan,
    /// Fields named by the filter that the table does not have
    pub dropped_fields: Vec<String>,
}

impl CompiledQuery {
    #[must_use]
    pub fn requires_raw_path(&self) -> bool {
        matches!(self.plan, PredicatePlan::Raw { .. })
    }

    /// True when no predicate survived compilation
    #[must_use]
    pub fn is_unfiltered(&self) -> bool {
        match &self.plan {
            PredicatePlan::Builder(cmp) => cmp.is_empty(),
            PredicatePlan::Raw { sql, .. } => sql.is_empty(),
        }
    }
}

/// Compiles filter JSON against table descriptors
#[derive(Debug, Clone)]
pub struct FilterCompiler {
    max_in_list: usize,
}

impl Default for FilterCompiler {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl FilterCompiler {
    #[must_use]
    pub fn new(max_in_list: usize) -> Self {
        Self {
            max_in_list: max_in_list.max(1),
        }
    }

    /// Validate and compile `filter` for a paginated read of `descriptor`
    pub fn compile(
        &self,
        descriptor: &TableDescriptor,
        filter: &Json,
        pagination: Pagination,
    ) -> Result<CompiledQuery> {
        let expressions = FilterExpression::parse(filter)?;
        self.compile_expressions(descriptor, &expressions, pagination)
    }

    pub fn compile_expressions(
        &self,
        descriptor: &TableDescriptor,
        expressions: &[FilterExpression],
        pagination: Pagination,
    ) -> Result<CompiledQuery> {
        let mut dropped = Vec::new();
        let mut predicates = Vec::with_capacity(expressions.len());
        for expr in expressions {
            if let Some(p) = self.lower(descriptor, expr, &mut dropped)? {
                predicates.push(p);
            }
        }

        let has_group = expressions.iter().any(FilterExpression::is_group);
        let has_cast = predicates.iter().any(predicate_casts);
        let plan = if has_group || has_cast {
            diagnostics::log_debug!(
                "Raw predicate path for {table} (groups: {has_group}, text casts: {has_cast})",
                table: descriptor.physical_name.as_str(),
                has_group: has_group,
                has_cast: has_cast
            );
            let (sql, parameters) = render_predicate(&predicates);
            PredicatePlan::Raw { sql, parameters }
        } else {
            let comparisons = predicates
                .into_iter()
                .filter_map(|p| match p {
                    Predicate::Compare(c) => Some(c),
                    Predicate::Group { .. } => None,
                })
                .collect();
            PredicatePlan::Builder(comparisons)
        };

        Ok(CompiledQuery {
            dataset_id: descriptor.dataset_id.clone(),
            table: descriptor.physical_name.clone(),
            columns: descriptor.output_columns(),
            pagination,
            plan,
            dropped_fields: dropped,
        })
    }

    fn lower(
        &self,
        descriptor: &TableDescriptor,
        expr: &FilterExpression,
        dropped: &mut Vec<String>,
    ) -> Result<Option<Predicate>> {
        match expr {
            FilterExpression::Field(cond) => {
                let Some(column) = descriptor.column(&cond.field) else {
                    diagnostics::log_info!(
                        "Dropping condition on unknown field {field} for {table}",
                        field: cond.field.as_str(),
                        table: descriptor.physical_name.as_str()
                    );
                    if !dropped.contains(&cond.field) {
                        dropped.push(cond.field.clone());
                    }
                    return Ok(None);
                };
                let comparison =
                    self.comparison(&column.name, column.semantic_type, cond.operator, &cond.value)?;
                Ok(Some(Predicate::Compare(comparison)))
            }
            FilterExpression::Group(group) => {
                let mut children = Vec::with_capacity(group.children.len());
                for child in &group.children {
                    if let Some(p) = self.lower(descriptor, child, dropped)? {
                        children.push(p);
                    }
                }
                Ok(match children.len() {
                    0 => None,
                    1 => children.pop(),
                    _ => Some(Predicate::Group {
                        kind: group.kind,
                        children,
                    }),
                })
            }
        }
    }

    fn comparison(
        &self,
        column: &str,
        semantic: SemanticType,
        operator: Operator,
        value: &Json,
    ) -> Result<Comparison> {
        let (operand, cast_to_text) = match operator {
            Operator::Like => {
                if value.is_null() || value.is_array() || value.is_object() {
                    return Err(EngineError::validation(format!(
                        "$like on field {column} expects a string"
                    )));
                }
                let pattern = like_pattern(&json_text(value));
                (
                    Operand::Scalar(SqlParam::Text(pattern)),
                    semantic.needs_text_cast(),
                )
            }
            Operator::In | Operator::NotIn => {
                let Json::Array(items) = value else {
                    return Err(EngineError::validation(format!(
                        "{} on field {column} expects an array",
                        operator.key()
                    )));
                };
                if items.len() > self.max_in_list {
                    diagnostics::log_warn!(
                        "Truncating {count} list values on {field} to {max}",
                        count: items.len(),
                        field: column,
                        max: self.max_in_list
                    );
                }
                let list = items
                    .iter()
                    .take(self.max_in_list)
                    .map(|v| SqlParam::coerce(v, semantic, column))
                    .collect::<Result<Vec<_>>>()?;
                (Operand::List(list), false)
            }
            Operator::Eq | Operator::Ne => {
                (Operand::Scalar(SqlParam::coerce(value, semantic, column)?), false)
            }
            Operator::Gt | Operator::Lt | Operator::Gte | Operator::Lte => {
                if value.is_null() {
                    return Err(EngineError::validation(format!(
                        "{} on field {column} expects a non-null value",
                        operator.key()
                    )));
                }
                (Operand::Scalar(SqlParam::coerce(value, semantic, column)?), false)
            }
        };
        Ok(Comparison {
            column: column.to_string(),
            semantic,
            operator,
            operand,
            cast_to_text,
        })
    }
}

fn predicate_casts(p: &Predicate) -> bool {
    match p {
        Predicate::Compare(c) => c.cast_to_text,
        Predicate::Group { children, .. } => children.iter().any(predicate_casts),
    }
}

/// Wrap a like value in `%…%` unless it already carries a wildcard
#[must_use]
pub fn like_pattern(value: &str) -> String {
    if value.contains('%') || value.contains('_') {
        value.to_string()
    } else {
        format!("%{value}%")
    }
}
