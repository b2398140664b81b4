use anyhow::Result;
use sheetquery::EngineError;
use serde_json::Value as Json;
use std::io::Write;

use crate::common::{SheetContext, parse_json_arg, write_json};

/// Insert a JSON array of row objects (or a single object)
pub async fn insert_command<W: Write>(
    ctx: &SheetContext,
    dataset_id: &str,
    rows: &str,
    out: &mut W,
) -> Result<()> {
    let rows = match parse_json_arg("rows", Some(rows))? {
        Json::Array(rows) => rows,
        row @ Json::Object(_) => vec![row],
        _ => {
            return Err(EngineError::validation("--rows must be a JSON object or array of objects").into());
        }
    };
    let engine = ctx.open_engine().await?;
    let outcome = engine.insert_rows(dataset_id, &rows).await?;
    write_json(out, &outcome)
}

pub async fn update_command<W: Write>(
    ctx: &SheetContext,
    dataset_id: &str,
    filter: &str,
    values: &str,
    out: &mut W,
) -> Result<()> {
    let filter = parse_json_arg("filter", Some(filter))?;
    let values = parse_json_arg("values", Some(values))?;
    let engine = ctx.open_engine().await?;
    let outcome = engine.update_where(dataset_id, &filter, &values).await?;
    write_json(out, &outcome)
}

pub async fn delete_command<W: Write>(
    ctx: &SheetContext,
    dataset_id: &str,
    filter: &str,
    out: &mut W,
) -> Result<()> {
    let filter = parse_json_arg("filter", Some(filter))?;
    let engine = ctx.open_engine().await?;
    let outcome = engine.delete_where(dataset_id, &filter).await?;
    write_json(out, &outcome)
}
