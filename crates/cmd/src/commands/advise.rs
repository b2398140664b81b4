use anyhow::Result;
use std::io::Write;

use crate::common::{SheetContext, write_json};

/// Create the advised indexes for one dataset and print the report
pub async fn advise_command<W: Write>(
    ctx: &SheetContext,
    dataset_id: &str,
    out: &mut W,
) -> Result<()> {
    let engine = ctx.open_engine().await?;
    let report = engine.advise(dataset_id).await?;
    diagnostics::log_info!(
        "Advised {table}: {created} created, {skipped} skipped",
        table: report.table_name.as_str(),
        created: report.created.len(),
        skipped: report.skipped.len()
    );
    write_json(out, &report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::{DATASET, output, seeded_db};

    #[tokio::test]
    async fn test_advise_twice_skips_everything() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("sheets.duckdb");
        seeded_db(&db).await?;
        let ctx = SheetContext::new(db, None);

        let mut buf = Vec::new();
        advise_command(&ctx, DATASET, &mut buf).await?;
        let first = output(buf)?;
        // id, price, created_at
        assert_eq!(first["created"].as_array().map(Vec::len), Some(3));

        let mut buf = Vec::new();
        advise_command(&ctx, DATASET, &mut buf).await?;
        let second = output(buf)?;
        assert_eq!(second["created"].as_array().map(Vec::len), Some(0));
        assert_eq!(second["skipped"].as_array().map(Vec::len), Some(3));
        Ok(())
    }
}
