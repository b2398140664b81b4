use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value as Json;
use sheetquery::{DuckStore, Engine, EngineConfig, EngineError, Registry};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Where the database and configuration live for one invocation
#[derive(Debug, Clone)]
pub struct SheetContext {
    pub db_path: PathBuf,
    pub config_path: Option<PathBuf>,
}

impl SheetContext {
    #[must_use]
    pub fn new(db_path: PathBuf, config_path: Option<PathBuf>) -> Self {
        Self {
            db_path,
            config_path,
        }
    }

    /// Configuration file (if any) with environment overrides applied on top
    pub fn load_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config_path {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => EngineConfig::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        // A one-shot process would abort background index builds on exit
        config.advisor.enabled = false;
        Ok(config)
    }

    /// Open the database and register every dataset table it contains
    pub async fn open_engine(&self) -> Result<Engine> {
        let config = self.load_config()?;
        let store = Arc::new(
            DuckStore::open(&self.db_path)
                .with_context(|| format!("opening {}", self.db_path.display()))?,
        );
        let engine = Engine::open(store.clone(), config).await?;

        let ids = Registry::discover(store.as_ref()).await?;
        for id in &ids {
            _ = engine.register_from_store(id).await?;
        }
        diagnostics::log_debug!(
            "Registered {count} datasets from {path}",
            count: ids.len(),
            path: self.db_path.display().to_string()
        );
        Ok(engine)
    }
}

/// Parse JSON given on the command line. Absent or blank text is `null`.
pub fn parse_json_arg(name: &str, text: Option<&str>) -> Result<Json> {
    match text.map(str::trim) {
        None | Some("") => Ok(Json::Null),
        Some(text) => {
            serde_json::from_str(text)
                .map_err(|e| EngineError::validation(format!("--{name} is not valid JSON: {e}")))
                .map_err(anyhow::Error::from)
        }
    }
}

/// Pretty-print `value` followed by a newline
pub fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Process exit status for a failed command: 2 when the caller's input was at
/// fault, 1 for everything else
#[must_use]
pub fn exit_status(err: &anyhow::Error) -> u8 {
    let client = err.chain().any(|cause| {
        cause
            .downcast_ref::<EngineError>()
            .is_some_and(EngineError::is_client_error)
    });
    if client { 2 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status() {
        let err = parse_json_arg("filter", Some("{nope")).unwrap_err();
        assert!(err.to_string().contains("--filter is not valid JSON"));
        assert_eq!(exit_status(&err), 2);

        let wrapped = anyhow::Error::from(EngineError::NotFound("ds".into())).context("querying");
        assert_eq!(exit_status(&wrapped), 2);

        let backend = anyhow::Error::from(EngineError::backend_unavailable("down"));
        assert_eq!(exit_status(&backend), 1);
        assert_eq!(exit_status(&anyhow::anyhow!("plain")), 1);
        assert_eq!(parse_json_arg("filter", Some("  ")).expect("blank"), Json::Null);
    }
}
