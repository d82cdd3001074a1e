//! CLI helper functions

use crate::{config::ExportConfig, etl::Exporter, storage::CsvWriter};
use eyre::{Context, Result};
use owo_colors::OwoColorize;
use std::path::PathBuf;

/// Export every configured table to CSV
///
/// Pipeline: BigQueryClient → Exporter → CsvWriter
///
/// Returns the paths written, in table order
pub async fn export_tables(config: &ExportConfig) -> Result<Vec<PathBuf>> {
    config.validate()?;
    if config.tables.is_empty() {
        log::warn!("No tables selected, nothing to export");
        return Ok(Vec::new());
    }

    log::info!("Connecting to BigQuery...");
    let client = config.client()?;
    log::info!("Billing project: {}", client.project().cyan());

    let exporter = Exporter::new(
        client,
        CsvWriter::new(),
        config.dataset.clone(),
        config.tables.clone(),
    )
    .with_output_dir(&config.output_dir);

    exporter.run().await
}

/// Verify credentials and access to the source dataset
pub async fn test_auth(config: &ExportConfig) -> Result<()> {
    let (project, dataset) = config.dataset_parts()?;

    log::info!("Connecting to BigQuery...");
    let client = config.client()?;

    let metadata = client
        .test_connection(project, dataset)
        .await
        .context("Authorization test failed")?;

    let location = metadata
        .get("location")
        .and_then(|l| l.as_str())
        .unwrap_or("unknown");
    log::info!(
        "✓ Authorized as billing project {}; dataset {} is readable (location {})",
        client.project().cyan(),
        config.dataset.cyan(),
        location
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_export_rejects_invalid_config() {
        let config = ExportConfig {
            tables: vec!["orders".to_string(), "orders".to_string()],
            ..ExportConfig::default()
        };
        let result = export_tables(&config).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("more than once"));
    }

    #[tokio::test]
    async fn test_export_nothing_selected() {
        // Credentials are never touched when there is nothing to do
        let config = ExportConfig {
            tables: vec![],
            credentials_path: PathBuf::from("/nonexistent/credentials.json"),
            ..ExportConfig::default()
        };
        let written = export_tables(&config).await.unwrap();
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn test_export_missing_credentials() {
        let config = ExportConfig {
            credentials_path: PathBuf::from("/nonexistent/credentials.json"),
            ..ExportConfig::default()
        };
        let err = export_tables(&config).await.unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/credentials.json"));
    }

    #[tokio::test]
    async fn test_auth_invalid_dataset() {
        let config = ExportConfig {
            dataset: "no_project".to_string(),
            ..ExportConfig::default()
        };
        assert!(test_auth(&config).await.is_err());
    }
}
