//! BigQuery API client and authentication.
//!
//! This module provides the [`BigQueryClient`] for running queries against
//! BigQuery, along with the [`Credentials`] used to authenticate it.

mod auth;
mod bigquery;
#[cfg(test)]
mod test_server;

pub use auth::{AccessToken, AuthorizedUserKey, BIGQUERY_SCOPE, Credentials, ServiceAccountKey};
pub use bigquery::{BigQueryClient, DEFAULT_API_URL};
