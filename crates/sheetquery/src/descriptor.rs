//! Table descriptors: the registry's record of one dataset's physical table

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Implicit primary key present on every dataset table
pub const PRIMARY_KEY: &str = "id";

/// Prefix of every physical dataset table
pub const TABLE_PREFIX: &str = "data_";

/// Length of a dataset identity (hex characters)
pub const DATASET_ID_LEN: usize = 32;

/// Semantic type of a column, as seen by the filter compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    String,
    Number,
    Date,
    Boolean,
}

impl SemanticType {
    /// Infer from a declared type string. Accepts the ingestion vocabulary
    /// (`string`, `number`, `date`, `boolean`) and common SQL type names.
    /// Anything unrecognized is a string.
    #[must_use]
    pub fn infer(declared: &str) -> Self {
        let declared = declared.trim().to_ascii_lowercase();
        // Strip precision suffixes such as DECIMAL(18,3) or VARCHAR(255)
        let base = declared.split('(').next().unwrap_or("").trim();
        match base {
            "number" | "numeric" | "decimal" | "int" | "integer" | "bigint" | "smallint"
            | "tinyint" | "hugeint" | "ubigint" | "uinteger" | "usmallint" | "utinyint"
            | "float" | "double" | "real" | "double precision" => SemanticType::Number,
            "date" | "datetime" | "timestamp" | "time" | "timestamp with time zone"
            | "timestamptz" => SemanticType::Date,
            "boolean" | "bool" => SemanticType::Boolean,
            _ => SemanticType::String,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::String => "string",
            SemanticType::Number => "number",
            SemanticType::Date => "date",
            SemanticType::Boolean => "boolean",
        }
    }

    /// Whether substring matching needs a cast to text first
    #[must_use]
    pub fn needs_text_cast(&self) -> bool {
        !matches!(self, SemanticType::String)
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column definition as supplied by the ingestion collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawColumnDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub declared_type: String,
    #[serde(default)]
    pub nullable: Option<bool>,
}

impl RawColumnDef {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, declared_type: T) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            nullable: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "semanticType")]
    pub semantic_type: SemanticType,
    pub nullable: bool,
}

impl ColumnDescriptor {
    fn primary_key() -> Self {
        Self {
            name: PRIMARY_KEY.to_string(),
            semantic_type: SemanticType::Number,
            nullable: false,
        }
    }
}

/// Queryable shape of one dataset. Owned by the registry, read-only elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub dataset_id: String,
    pub physical_name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub row_count_hint: u64,
    #[serde(skip, default = "ColumnDescriptor::primary_key")]
    primary_key: ColumnDescriptor,
}

impl TableDescriptor {
    /// Build a descriptor from raw column definitions.
    ///
    /// A raw column named like the primary key is skipped; the key is implicit.
    pub fn from_raw(dataset_id: &str, raw: &[RawColumnDef]) -> Result<Self> {
        validate_dataset_id(dataset_id)?;

        let mut columns: Vec<ColumnDescriptor> = Vec::with_capacity(raw.len());
        for def in raw {
            if def.name.is_empty() {
                return Err(EngineError::validation("column name must not be empty"));
            }
            if def.name == PRIMARY_KEY {
                continue;
            }
            if columns.iter().any(|c| c.name == def.name) {
                return Err(EngineError::validation(format!(
                    "duplicate column name: {}",
                    def.name
                )));
            }
            columns.push(ColumnDescriptor {
                name: def.name.clone(),
                semantic_type: SemanticType::infer(&def.declared_type),
                nullable: def.nullable.unwrap_or(true),
            });
        }

        Ok(Self {
            dataset_id: dataset_id.to_string(),
            physical_name: physical_table_name(dataset_id),
            columns,
            row_count_hint: 0,
            primary_key: ColumnDescriptor::primary_key(),
        })
    }

    /// Look up a queryable field. The primary key is always queryable.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        if name == PRIMARY_KEY {
            return Some(&self.primary_key);
        }
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names returned for each row: primary key first, then columns in order
    #[must_use]
    pub fn output_columns(&self) -> Vec<String> {
        std::iter::once(PRIMARY_KEY.to_string())
            .chain(self.columns.iter().map(|c| c.name.clone()))
            .collect()
    }

    /// True when both descriptors expose the same columns
    #[must_use]
    pub fn same_shape(&self, other: &TableDescriptor) -> bool {
        self.dataset_id == other.dataset_id && self.columns == other.columns
    }
}

/// Physical table name for a dataset: `data_<datasetId>`
#[must_use]
pub fn physical_table_name(dataset_id: &str) -> String {
    format!("{TABLE_PREFIX}{dataset_id}")
}

/// Dataset identities are 32 lowercase hex characters
pub fn validate_dataset_id(dataset_id: &str) -> Result<()> {
    let valid = dataset_id.len() == DATASET_ID_LEN
        && dataset_id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidDatasetId(dataset_id.to_string()))
    }
}

/// Quote an identifier for SQL, doubling embedded quotes
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
