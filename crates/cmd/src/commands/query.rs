use anyhow::Result;
use serde::Serialize;
use sheetquery::{CacheStats, QueryPage};
use std::io::Write;

use crate::common::{SheetContext, parse_json_arg, write_json};

pub struct QueryArgs {
    pub filter: Option<String>,
    pub page: u64,
    pub limit: u64,
    /// Include cache statistics in the output
    pub stats: bool,
}

impl Default for QueryArgs {
    fn default() -> Self {
        Self {
            filter: None,
            page: 1,
            limit: 50,
            stats: false,
        }
    }
}

#[derive(Serialize)]
struct WithStats {
    #[serde(flatten)]
    page: QueryPage,
    cache: CacheStats,
}

/// Run one filtered, paginated read and print the page as JSON
pub async fn query_command<W: Write>(
    ctx: &SheetContext,
    dataset_id: &str,
    args: &QueryArgs,
    out: &mut W,
) -> Result<()> {
    let filter = parse_json_arg("filter", args.filter.as_deref())?;
    let engine = ctx.open_engine().await?;
    let page = engine.query(dataset_id, &filter, args.page, args.limit).await?;

    if args.stats {
        let cache = engine.stats();
        write_json(out, &WithStats { page, cache })
    } else {
        write_json(out, &page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::{DATASET, output, seeded_db};

    #[tokio::test]
    async fn test_query_filters_and_paginates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("sheets.duckdb");
        seeded_db(&db).await?;
        let ctx = SheetContext::new(db, None);

        let args = QueryArgs {
            filter: Some(r#"{"sku": {"$like": "a-"}}"#.to_string()),
            limit: 1,
            page: 2,
            ..QueryArgs::default()
        };
        let mut buf = Vec::new();
        query_command(&ctx, DATASET, &args, &mut buf).await?;
        let page = output(buf)?;
        assert_eq!(page["totalCount"], 2);
        assert_eq!(page["totalPages"], 2);
        assert_eq!(page["rows"][0]["sku"], "a-2");
        assert_eq!(page["rows"][0]["created_at"], "2024-05-01");
        assert!(page.get("cache").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_query_with_stats_and_large_numbers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("sheets.duckdb");
        seeded_db(&db).await?;
        let ctx = SheetContext::new(db, None);

        let args = QueryArgs {
            filter: Some(r#"{"price": {"$gt": 100}}"#.to_string()),
            stats: true,
            ..QueryArgs::default()
        };
        let mut buf = Vec::new();
        query_command(&ctx, DATASET, &args, &mut buf).await?;
        let page = output(buf)?;
        assert_eq!(page["rows"][0]["price"], "250000");
        assert_eq!(page["cache"]["overall"]["totalQueries"], 1);
        assert_eq!(page["cache"]["overall"]["misses"], 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_query_rejects_bad_filter_text() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("sheets.duckdb");
        seeded_db(&db).await?;
        let ctx = SheetContext::new(db, None);

        let args = QueryArgs {
            filter: Some("{not json".to_string()),
            ..QueryArgs::default()
        };
        let err = query_command(&ctx, DATASET, &args, &mut Vec::new()).await;
        assert!(err.is_err());
        Ok(())
    }
}
