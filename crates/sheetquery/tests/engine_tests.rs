use anyhow::Result;
use serde_json::{Value, json};
use sheetquery::testing::{create_table, seed_rows};
use sheetquery::{DuckStore, Engine, EngineConfig, EngineError, RawColumnDef, Store, TableDescriptor};
use std::sync::Arc;

const DS1: &str = "d5100000000000000000000000000001";

fn people_columns() -> Vec<RawColumnDef> {
    vec![
        RawColumnDef::new("name", "string"),
        RawColumnDef::new("age", "number"),
        RawColumnDef::new("joined", "date"),
        RawColumnDef::new("active", "boolean"),
    ]
}

async fn engine_with_rows(rows: &[Value]) -> Result<(Engine, Arc<TableDescriptor>)> {
    let store = Arc::new(DuckStore::open_in_memory()?);
    let mut config = EngineConfig::default();
    config.advisor.enabled = false;
    let engine = Engine::open(store.clone(), config).await?;
    let descriptor = engine.register(DS1, &people_columns()).await?;
    create_table(store.as_ref(), &descriptor).await?;
    seed_rows(store.as_ref(), &descriptor, rows).await?;
    Ok((engine, descriptor))
}

fn ids(rows: &[serde_json::Map<String, Value>]) -> Vec<i64> {
    rows.iter()
        .map(|r| r["id"].as_i64().expect("numeric id"))
        .collect()
}

#[tokio::test]
async fn test_like_on_number_matches_text_and_stringifies_large_values() -> Result<()> {
    let (engine, _) = engine_with_rows(&[
        json!({"name": "A", "age": 5}),
        json!({"name": "B", "age": 50000001}),
    ])
    .await?;

    let page = engine.query(DS1, &json!({"age": {"$like": "5"}}), 1, 10).await?;
    assert_eq!(page.total_count, 2);
    assert_eq!(page.rows.len(), 2);
    assert_eq!(page.rows[0]["name"], json!("A"));
    assert_eq!(page.rows[0]["age"], json!(5));
    assert_eq!(page.rows[1]["age"], json!("50000001"));
    assert_eq!(page.total_pages, 1);
    Ok(())
}

#[tokio::test]
async fn test_like_on_number_matches_returned_text() -> Result<()> {
    let (engine, _) = engine_with_rows(&[
        json!({"name": "A", "age": 5}),
        json!({"name": "B", "age": 10}),
        json!({"name": "C", "age": 2.5}),
    ])
    .await?;

    // Whole numbers come back as 5 and 10, so only 10 holds a zero
    let page = engine.query(DS1, &json!({"age": {"$like": "0"}}), 1, 10).await?;
    assert_eq!(ids(&page.rows), vec![2]);
    assert_eq!(page.rows[0]["age"], json!(10));

    let page = engine.query(DS1, &json!({"age": {"$like": "5."}}), 1, 10).await?;
    assert!(page.rows.is_empty());

    let page = engine.query(DS1, &json!({"age": {"$like": "2.5"}}), 1, 10).await?;
    assert_eq!(ids(&page.rows), vec![3]);
    Ok(())
}

#[tokio::test]
async fn test_like_ignores_case() -> Result<()> {
    let (engine, _) = engine_with_rows(&[
        json!({"name": "Alice"}),
        json!({"name": "MALCOLM"}),
        json!({"name": "Bob"}),
    ])
    .await?;

    let page = engine.query(DS1, &json!({"name": {"$like": "al"}}), 1, 10).await?;
    assert_eq!(ids(&page.rows), vec![1, 2]);

    let filter = json!({"$or": [{"name": {"$like": "BOB"}}, {"age": 99}]});
    let page = engine.query(DS1, &filter, 1, 10).await?;
    assert_eq!(ids(&page.rows), vec![3]);
    Ok(())
}

#[tokio::test]
async fn test_rows_keep_column_order() -> Result<()> {
    let (engine, _) = engine_with_rows(&[json!({"active": true, "name": "A", "age": 1})]).await?;
    let page = engine.query(DS1, &Value::Null, 1, 10).await?;
    let keys: Vec<&String> = page.rows[0].keys().collect();
    assert_eq!(keys, vec!["id", "name", "age", "joined", "active"]);
    assert_eq!(page.rows[0]["joined"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn test_pagination_reproduces_key_order() -> Result<()> {
    let rows: Vec<Value> = (1..=23)
        .map(|i| json!({"name": format!("n{i}"), "age": i}))
        .collect();
    let (engine, _) = engine_with_rows(&rows).await?;
    let filter = json!({"age": {"$gte": 3}});

    let first = engine.query(DS1, &filter, 1, 5).await?;
    assert_eq!(first.total_count, 21);
    assert_eq!(first.total_pages, 5);

    let mut seen = Vec::new();
    for page in 1..=first.total_pages {
        let result = engine.query(DS1, &filter, page, 5).await?;
        assert!(result.rows.len() <= 5);
        seen.extend(ids(&result.rows));
    }
    assert_eq!(seen.len() as u64, first.total_count);
    assert_eq!(seen, (3..=23).collect::<Vec<i64>>());

    let past_end = engine.query(DS1, &filter, 6, 5).await?;
    assert!(past_end.rows.is_empty());
    assert_eq!(past_end.total_count, 21);
    Ok(())
}

#[tokio::test]
async fn test_every_row_satisfies_grouped_filter() -> Result<()> {
    let rows: Vec<Value> = (1..=12)
        .map(|i| {
            json!({
                "name": if i % 3 == 0 { "fizz" } else { "plain" },
                "age": i,
                "active": i % 2 == 0,
            })
        })
        .collect();
    let (engine, _) = engine_with_rows(&rows).await?;
    let filter = json!({
        "active": true,
        "$or": [{"name": "fizz"}, {"age": {"$in": [1, 2, 10]}}]
    });

    let page = engine.query(DS1, &filter, 1, 50).await?;
    for row in &page.rows {
        assert_eq!(row["active"], json!(true));
        let age = row["age"].as_i64().expect("age");
        assert!(row["name"] == json!("fizz") || [1, 2, 10].contains(&age));
    }
    assert_eq!(ids(&page.rows), vec![2, 6, 10, 12]);
    Ok(())
}

#[tokio::test]
async fn test_unknown_fields_are_ignored() -> Result<()> {
    let (engine, _) = engine_with_rows(&[json!({"name": "A"}), json!({"name": "B"})]).await?;
    let page = engine
        .query(DS1, &json!({"nmae": "typo", "name": "A"}), 1, 10)
        .await?;
    assert_eq!(page.total_count, 1);

    let page = engine.query(DS1, &json!({"nope": 1}), 1, 10).await?;
    assert_eq!(page.total_count, 2);
    Ok(())
}

#[tokio::test]
async fn test_null_and_text_cast_filters() -> Result<()> {
    let (engine, _) = engine_with_rows(&[
        json!({"name": "A", "joined": "2024-03-01", "active": true}),
        json!({"name": null, "joined": "2023-12-31", "active": false}),
    ])
    .await?;

    let page = engine.query(DS1, &json!({"name": null}), 1, 10).await?;
    assert_eq!(ids(&page.rows), vec![2]);
    let page = engine.query(DS1, &json!({"name": {"$ne": null}}), 1, 10).await?;
    assert_eq!(ids(&page.rows), vec![1]);

    let page = engine.query(DS1, &json!({"joined": {"$like": "2024-03"}}), 1, 10).await?;
    assert_eq!(ids(&page.rows), vec![1]);
    assert_eq!(page.rows[0]["joined"], json!("2024-03-01"));

    let page = engine.query(DS1, &json!({"joined": {"$lt": "2024-01-01"}}), 1, 10).await?;
    assert_eq!(ids(&page.rows), vec![2]);
    Ok(())
}

#[tokio::test]
async fn test_rejections() -> Result<()> {
    let (engine, _) = engine_with_rows(&[]).await?;
    let err = engine.query(DS1, &json!([1]), 1, 10).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let err = engine.query(DS1, &json!({"age": {"$regex": "x"}}), 1, 10).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let err = engine.query(DS1, &json!({}), 0, 10).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let err = engine.query("DS1", &json!({}), 1, 10).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidDatasetId(_)));
    let err = engine
        .query("ffffffffffffffffffffffffffffffff", &json!({}), 1, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(err.is_client_error());
    Ok(())
}

#[tokio::test]
async fn test_write_invalidates_cached_reads() -> Result<()> {
    let (engine, _) = engine_with_rows(&[json!({"name": "A"}), json!({"name": "B"})]).await?;
    let filter = json!({"name": {"$ne": "Z"}});

    assert_eq!(engine.query(DS1, &filter, 1, 10).await?.total_count, 2);
    assert_eq!(engine.query(DS1, &filter, 1, 10).await?.total_count, 2);
    assert_eq!(engine.stats().overall.hits, 1);

    let outcome = engine
        .insert_rows(DS1, &[json!({"name": "C", "bogus": 1})])
        .await?;
    assert_eq!(outcome.affected, 1);
    assert_eq!(outcome.dropped_fields, vec!["bogus"]);
    assert_eq!(engine.stats().memory.entries, 0);

    let after = engine.query(DS1, &filter, 1, 10).await?;
    assert_eq!(after.total_count, 3);
    assert_eq!(ids(&after.rows), vec![1, 2, 3]);
    Ok(())
}

#[tokio::test]
async fn test_update_and_delete() -> Result<()> {
    let rows: Vec<Value> = (1..=6).map(|i| json!({"name": format!("n{i}"), "age": i})).collect();
    let (engine, _) = engine_with_rows(&rows).await?;

    let outcome = engine
        .update_where(
            DS1,
            &json!({"$or": [{"age": 1}, {"age": {"$gt": 5}}]}),
            &json!({"name": "edge", "ghost": true}),
        )
        .await?;
    assert_eq!(outcome.affected, 2);
    assert_eq!(outcome.dropped_fields, vec!["ghost"]);
    let page = engine.query(DS1, &json!({"name": "edge"}), 1, 10).await?;
    assert_eq!(ids(&page.rows), vec![1, 6]);

    let outcome = engine.delete_where(DS1, &json!({"age": {"$lte": 2}})).await?;
    assert_eq!(outcome.affected, 2);
    assert_eq!(engine.query(DS1, &json!({}), 1, 10).await?.total_count, 4);

    // Empty predicates never reach the store
    assert!(engine.delete_where(DS1, &json!({})).await.is_err());
    assert!(engine.delete_where(DS1, &json!({"unknown": 1})).await.is_err());
    assert!(engine.update_where(DS1, &json!({}), &json!({"name": "x"})).await.is_err());
    assert!(engine.update_where(DS1, &json!({"age": 3}), &json!({"ghost": 1})).await.is_err());
    assert_eq!(engine.query(DS1, &json!({}), 1, 10).await?.total_count, 4);
    Ok(())
}

#[tokio::test]
async fn test_register_from_store_matches_declared_shape() -> Result<()> {
    let store = Arc::new(DuckStore::open_in_memory()?);
    let engine = Engine::open(store.clone(), EngineConfig::default()).await?;
    let declared = TableDescriptor::from_raw(DS1, &people_columns())?;
    create_table(store.as_ref(), &declared).await?;

    let discovered = engine.register_from_store(DS1).await?;
    assert!(discovered.same_shape(&declared));
    let again = engine.register(DS1, &people_columns()).await?;
    assert!(Arc::ptr_eq(&discovered, &again));

    let missing = engine
        .register_from_store("0000000000000000000000000000000f")
        .await
        .unwrap_err();
    assert!(matches!(missing, EngineError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn test_read_triggers_index_advice_once() -> Result<()> {
    let store = Arc::new(DuckStore::open_in_memory()?);
    let engine = Engine::open(store.clone(), EngineConfig::default()).await?;
    let descriptor = engine.register(DS1, &people_columns()).await?;
    create_table(store.as_ref(), &descriptor).await?;

    _ = engine.query(DS1, &json!({}), 1, 10).await?;
    assert!(engine.advisor().is_advised(&descriptor.physical_name));

    let report = engine.advise(DS1).await?;
    assert!(report.errors.is_empty());
    // Background run and this one together cover every planned index:
    // id, name, age and joined, but not the boolean flag
    let planned = sheetquery::advisor::plan(&descriptor);
    assert_eq!(planned.len(), 4);
    assert!(planned.iter().all(|p| p.column != "active"));
    assert_eq!(report.created.len() + report.skipped.len(), planned.len());
    assert_eq!(store.list_indexes(&descriptor.physical_name).await?.len(), planned.len());
    Ok(())
}

#[tokio::test]
async fn test_drop_dataset() -> Result<()> {
    let (engine, _) = engine_with_rows(&[json!({"name": "A"})]).await?;
    _ = engine.query(DS1, &json!({}), 1, 10).await?;
    assert_eq!(engine.stats().memory.entries, 1);

    assert!(engine.drop_dataset(DS1).await?);
    assert_eq!(engine.stats().memory.entries, 0);
    assert!(matches!(
        engine.query(DS1, &json!({}), 1, 10).await,
        Err(EngineError::NotFound(_))
    ));
    Ok(())
}
