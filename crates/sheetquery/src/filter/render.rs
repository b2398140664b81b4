// Raw predicate rendering. Identifiers come only from validated comparisons;
// every value becomes a `?` placeholder in the returned parameter list.

use super::compile::{Comparison, Operand, Predicate};
use super::{LogicalKind, Operator};
use crate::descriptor::{SemanticType, quote_ident};
use crate::value::SqlParam;

/// Render a conjunction of predicates. Returns empty SQL for an empty slice.
#[must_use]
pub fn render_predicate(predicates: &[Predicate]) -> (String, Vec<SqlParam>) {
    let mut params = Vec::new();
    let parts: Vec<String> = predicates
        .iter()
        .map(|p| render_node(p, &mut params))
        .collect();
    (parts.join(&format!(" {} ", LogicalKind::And.sql())), params)
}

fn render_node(predicate: &Predicate, params: &mut Vec<SqlParam>) -> String {
    match predicate {
        Predicate::Compare(cmp) => render_comparison(cmp, params),
        Predicate::Group { kind, children } => {
            let inner: Vec<String> = children.iter().map(|c| render_node(c, params)).collect();
            format!("({})", inner.join(&format!(" {} ", kind.sql())))
        }
    }
}

fn render_comparison(cmp: &Comparison, params: &mut Vec<SqlParam>) -> String {
    let column = if cmp.cast_to_text {
        text_expr(&quote_ident(&cmp.column), cmp.semantic)
    } else {
        quote_ident(&cmp.column)
    };

    match &cmp.operand {
        Operand::Scalar(SqlParam::Null) if cmp.operator == Operator::Eq => {
            format!("{column} IS NULL")
        }
        Operand::Scalar(SqlParam::Null) if cmp.operator == Operator::Ne => {
            format!("{column} IS NOT NULL")
        }
        Operand::Scalar(value) => {
            params.push(value.clone());
            format!("{column} {} ?", sql_operator(cmp.operator))
        }
        Operand::List(values) if values.is_empty() => match cmp.operator {
            // Nothing is in the empty set; everything is outside it
            Operator::NotIn => "1 = 1".to_string(),
            _ => "1 = 0".to_string(),
        },
        Operand::List(values) => {
            params.extend(values.iter().cloned());
            let marks = vec!["?"; values.len()].join(", ");
            let keyword = if cmp.operator == Operator::NotIn {
                "NOT IN"
            } else {
                "IN"
            };
            format!("{column} {keyword} ({marks})")
        }
    }
}

/// Text form of a column for substring matching. Numbers render the way
/// rows are returned, so whole values never carry a trailing `.0`.
#[must_use]
pub fn text_expr(column: &str, semantic: SemanticType) -> String {
    match semantic {
        SemanticType::Number => format!(
            "CASE WHEN {column} = TRUNC({column}) AND ABS({column}) < 1e18 \
             THEN CAST(CAST({column} AS BIGINT) AS VARCHAR) \
             ELSE CAST({column} AS VARCHAR) END"
        ),
        _ => format!("CAST({column} AS VARCHAR)"),
    }
}

fn sql_operator(op: Operator) -> &'static str {
    match op {
        Operator::Eq => "=",
        Operator::Ne => "<>",
        Operator::Like => "ILIKE",
        Operator::Gt => ">",
        Operator::Lt => "<",
        Operator::Gte => ">=",
        Operator::Lte => "<=",
        Operator::In => "IN",
        Operator::NotIn => "NOT IN",
    }
}
