//! Export configuration
//!
//! Configuration is assembled from environment variables (optionally sourced
//! from a dotenv file) and then overridden by command line flags. The result
//! is passed explicitly to the client and exporter; nothing here writes to the
//! process environment.
//!
//! Recognized variables:
//! - GOOGLE_APPLICATION_CREDENTIALS: credential file path (default `credentials.json`)
//! - BIGQUERY_ACCESS_TOKEN: pre-minted access token, skips the credential file
//! - BIGQUERY_PROJECT: billing project (defaults to the credential's project)
//! - BIGQUERY_DATASET: source dataset as `project.dataset`
//! - BIGQUERY_TABLES: comma-separated list of tables to export
//! - BIGQUERY_LOCATION: job location
//! - BIGQUERY_API_URL: REST endpoint
//! - BIGQUERY_PAGE_SIZE: rows per result page
//! - BQDUMP_OUTPUT_DIR: directory for the CSV files (default: current directory)

use crate::client::{BigQueryClient, Credentials, DEFAULT_API_URL};

use eyre::{Context, Result, eyre};
use regex::Regex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::LazyLock;
use url::Url;

/// Source dataset exported when none is configured
pub const DEFAULT_DATASET: &str = "bigquery-public-data.thelook_ecommerce";

/// Tables exported when none are configured, in export order
pub const DEFAULT_TABLES: [&str; 7] = [
    "events",
    "order_items",
    "orders",
    "products",
    "users",
    "distribution_centers",
    "inventory_items",
];

pub const DEFAULT_CREDENTIALS: &str = "credentials.json";

// Letters, marks, numbers, underscores and dashes
static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{L}\p{M}\p{N}\p{Pc}\p{Pd}]{1,1024}$").expect("table name pattern is valid")
});

/// Everything needed to run an export
#[derive(Clone, Debug, PartialEq)]
pub struct ExportConfig {
    pub credentials_path: PathBuf,
    pub access_token: Option<String>,
    pub project: Option<String>,
    pub dataset: String,
    pub tables: Vec<String>,
    pub location: Option<String>,
    pub api_url: Url,
    pub page_size: Option<u32>,
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS),
            access_token: None,
            project: None,
            dataset: DEFAULT_DATASET.to_string(),
            tables: DEFAULT_TABLES.iter().map(|t| t.to_string()).collect(),
            location: None,
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            page_size: None,
            output_dir: PathBuf::new(),
        }
    }
}

impl ExportConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup, falling back to defaults
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(path) = get("GOOGLE_APPLICATION_CREDENTIALS") {
            config.credentials_path = PathBuf::from(path);
        }
        config.access_token = get("BIGQUERY_ACCESS_TOKEN");
        config.project = get("BIGQUERY_PROJECT");
        if let Some(dataset) = get("BIGQUERY_DATASET") {
            config.dataset = dataset.trim().to_string();
        }
        if let Some(tables) = get("BIGQUERY_TABLES") {
            config.tables = parse_table_list(&tables);
        }
        config.location = get("BIGQUERY_LOCATION");
        if let Some(url) = get("BIGQUERY_API_URL") {
            config.api_url =
                Url::parse(&url).with_context(|| format!("Invalid BIGQUERY_API_URL: {}", url))?;
        }
        if let Some(size) = get("BIGQUERY_PAGE_SIZE") {
            let size = size
                .trim()
                .parse::<u32>()
                .with_context(|| format!("Invalid BIGQUERY_PAGE_SIZE: {}", size))?;
            config.page_size = Some(size);
        }
        if let Some(dir) = get("BQDUMP_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Check the dataset reference and table list
    ///
    /// # Errors
    /// Returns an error for a malformed dataset, an invalid table name, or a
    /// table listed twice
    pub fn validate(&self) -> Result<()> {
        self.dataset_parts()?;

        let mut seen = HashSet::new();
        for table in &self.tables {
            validate_table_name(table)?;
            if !seen.insert(table.as_str()) {
                eyre::bail!("Table '{}' is listed more than once", table);
            }
        }
        Ok(())
    }

    /// Split the dataset reference into `(project, dataset)`
    pub fn dataset_parts(&self) -> Result<(&str, &str)> {
        match self.dataset.rsplit_once('.') {
            Some((project, dataset)) if !project.is_empty() && !dataset.is_empty() => {
                Ok((project, dataset))
            }
            _ => Err(eyre!(
                "Invalid dataset '{}', expected the form project.dataset",
                self.dataset
            )),
        }
    }

    /// Keep only tables matching `include` and not matching `exclude`
    pub fn filter_tables(&mut self, include: Option<&str>, exclude: Option<&str>) -> Result<()> {
        if let Some(pattern) = include {
            let regex = Regex::new(pattern)
                .with_context(|| format!("Invalid include regex pattern: {}", pattern))?;
            self.tables.retain(|t| regex.is_match(t));
            log::debug!("After include filter '{}': {} table(s)", pattern, self.tables.len());
        }
        if let Some(pattern) = exclude {
            let regex = Regex::new(pattern)
                .with_context(|| format!("Invalid exclude regex pattern: {}", pattern))?;
            self.tables.retain(|t| !regex.is_match(t));
            log::debug!("After exclude filter '{}': {} table(s)", pattern, self.tables.len());
        }
        Ok(())
    }

    /// Resolve the credentials to authenticate with
    ///
    /// An explicit access token wins over the credential file.
    pub fn credentials(&self) -> Result<Credentials> {
        match &self.access_token {
            Some(token) => Ok(Credentials::AccessToken(token.clone())),
            None => Credentials::from_file(&self.credentials_path),
        }
    }

    /// The project billed for query jobs
    pub fn billing_project(&self, credentials: &Credentials) -> Result<String> {
        self.project
            .clone()
            .or_else(|| credentials.project_id().map(str::to_string))
            .ok_or_else(|| {
                eyre!("No billing project: set BIGQUERY_PROJECT or use credentials with a project_id")
            })
    }

    /// Build a BigQuery client from this configuration
    pub fn client(&self) -> Result<BigQueryClient> {
        let credentials = self.credentials().context("Failed to load credentials")?;
        let project = self.billing_project(&credentials)?;
        log::debug!("Authenticating with {} (billing project {})", credentials, project);

        Ok(BigQueryClient::try_new(self.api_url.clone(), credentials, project)
            .context("Failed to create BigQuery client")?
            .with_location(self.location.clone())
            .with_page_size(self.page_size))
    }
}

/// Split a comma-separated table list, dropping blanks
pub fn parse_table_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Check a table name is safe to quote in SQL and use as a file name
pub fn validate_table_name(name: &str) -> Result<()> {
    if !TABLE_NAME.is_match(name) {
        eyre::bail!(
            "Invalid table name '{}': only letters, numbers, underscores and dashes are allowed",
            name
        );
    }
    Ok(())
}
