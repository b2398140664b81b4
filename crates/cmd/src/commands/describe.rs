use anyhow::Result;
use serde::Serialize;
use sheetquery::{Store, TableDescriptor};
use sheetquery::store::ExistingIndex;
use std::io::Write;

use crate::common::{SheetContext, write_json};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Description {
    #[serde(flatten)]
    descriptor: TableDescriptor,
    row_count: u64,
    indexes: Vec<ExistingIndex>,
}

/// Show one dataset's columns, current row count and existing indexes
pub async fn describe_command<W: Write>(
    ctx: &SheetContext,
    dataset_id: &str,
    out: &mut W,
) -> Result<()> {
    let engine = ctx.open_engine().await?;
    // An unfiltered first page refreshes the row count
    let page = engine.query(dataset_id, &serde_json::Value::Null, 1, 1).await?;
    let descriptor = engine.registry().get(dataset_id)?;
    let indexes = engine.store().list_indexes(&descriptor.physical_name).await?;
    write_json(
        out,
        &Description {
            descriptor: descriptor.as_ref().clone(),
            row_count: page.total_count,
            indexes,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::{DATASET, output, seeded_db};

    #[tokio::test]
    async fn test_describe_reports_rows_and_indexes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("sheets.duckdb");
        seeded_db(&db).await?;
        let ctx = SheetContext::new(db, None);

        let mut buf = Vec::new();
        describe_command(&ctx, DATASET, &mut buf).await?;
        let described = output(buf)?;
        assert_eq!(described["rowCount"], 3);
        assert_eq!(described["rowCountHint"], 3);
        assert_eq!(described["indexes"].as_array().map(Vec::len), Some(0));

        let err = describe_command(&ctx, "not-a-dataset", &mut Vec::new()).await;
        assert!(err.is_err());
        Ok(())
    }
}
