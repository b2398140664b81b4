use anyhow::Result;
use std::io::Write;

use crate::common::{SheetContext, write_json};

/// List every dataset table in the database with its inferred columns
pub async fn tables_command<W: Write>(ctx: &SheetContext, out: &mut W) -> Result<()> {
    let engine = ctx.open_engine().await?;
    let descriptors: Vec<_> = engine
        .registry()
        .list()
        .iter()
        .map(|d| d.as_ref().clone())
        .collect();
    write_json(out, &descriptors)
}
