pub mod advise;
pub mod describe;
pub mod query;
pub mod tables;
pub mod write;

pub use advise::advise_command;
pub use describe::describe_command;
pub use query::{QueryArgs, query_command};
pub use tables::tables_command;
pub use write::{delete_command, insert_command, update_command};

#[cfg(test)]
pub(crate) mod fixtures {
    use anyhow::Result;
    use serde_json::{Value, json};
    use sheetquery::testing::{create_table, seed_rows};
    use sheetquery::{DuckStore, RawColumnDef, TableDescriptor};
    use std::path::Path;

    pub const DATASET: &str = "abcdefabcdefabcdefabcdefabcdef01";

    /// Create a database file holding one seeded dataset table
    pub async fn seeded_db(path: &Path) -> Result<()> {
        let store = DuckStore::open(path)?;
        let descriptor = TableDescriptor::from_raw(
            DATASET,
            &[
                RawColumnDef::new("sku", "string"),
                RawColumnDef::new("price", "number"),
                RawColumnDef::new("created_at", "date"),
            ],
        )?;
        create_table(&store, &descriptor).await?;
        let rows: Vec<Value> = [("a-1", 10.5), ("a-2", 20.0), ("b-1", 250_000.0)]
            .iter()
            .map(|(sku, price)| json!({"sku": sku, "price": price, "created_at": "2024-05-01"}))
            .collect();
        seed_rows(&store, &descriptor, &rows).await?;
        Ok(())
    }

    pub fn output(buf: Vec<u8>) -> Result<Value> {
        Ok(serde_json::from_slice(&buf)?)
    }
}
