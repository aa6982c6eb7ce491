//! Catalog Enrichment
//!
//! Enriches pending catalog books by querying an external ISBN lookup service through
//! several independently rate-limited API keys, then writes the results back in bulk.
//!
//! # Overview
//!
//! - **Pipeline**: [`enrich::EnrichmentOrchestrator`] loads pending jobs, fans them out
//!   across one worker per credential and persists everything in one pass
//! - **Storage**: [`enrich::CatalogStore`] with PostgreSQL and in-memory implementations
//! - **Configuration**: [`config::EnrichConfig`] and [`db::DbConfig`], both env driven
//!
//! # Example
//!
//! ```no_run
//! use catalog_enrich::config::EnrichConfig;
//! use catalog_enrich::db::{create_pool, DbConfig};
//! use catalog_enrich::enrich::{
//!     BulkPersistence, EnrichmentOrchestrator, HttpLookupClient, PgCatalogStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EnrichConfig::from_env()?;
//!     let pool = create_pool(&DbConfig::from_env()?).await?;
//!
//!     let store = Arc::new(PgCatalogStore::new(pool));
//!     let lookup = Arc::new(HttpLookupClient::new(config.lookup_config())?);
//!     let persistence = BulkPersistence::new(store.clone(), config.batch_executor());
//!
//!     let orchestrator = EnrichmentOrchestrator::new(
//!         store,
//!         lookup,
//!         config.credentials(),
//!         config.daily_limit,
//!         persistence,
//!     );
//!     let report = orchestrator.run().await?;
//!     println!("enriched {} of {}", report.enriched, report.pending);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod enrich;
pub mod error;

pub use error::{EnrichError, Result};
