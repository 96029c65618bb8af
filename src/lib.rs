//! KMS library
//!
//! API key authorization and quota enforcement: decide-and-debit for
//! presented keys, fenced key mutations, and the daily quota rollover.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::DbPool;

use db::{Directory, KeyStore, SqliteDirectory, SqliteKeyStore};
use services::{AlphanumericTokenGenerator, Authorizer, DirectoryService, KeyController, TokenGenerator};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Database connection pool
    pub db: DbPool,
    /// Key records, shared with the rollover scheduler
    pub key_store: Arc<dyn KeyStore>,
    pub authorizer: Arc<Authorizer>,
    pub keys: Arc<KeyController>,
    pub directory: Arc<DirectoryService>,
}

impl AppState {
    /// Wire every component over the SQLite pool
    pub fn new(config: AppConfig, db: DbPool) -> Self {
        let key_store: Arc<dyn KeyStore> = Arc::new(SqliteKeyStore::new(db.clone()));
        let directory: Arc<dyn Directory> = Arc::new(SqliteDirectory::new(db.clone()));
        let tokens: Arc<dyn TokenGenerator> =
            Arc::new(AlphanumericTokenGenerator::new(config.keys.secret_length));

        Self::with_stores(config, db, key_store, directory, tokens)
    }

    /// Wire every component over explicit store implementations
    pub fn with_stores(
        config: AppConfig,
        db: DbPool,
        key_store: Arc<dyn KeyStore>,
        directory: Arc<dyn Directory>,
        tokens: Arc<dyn TokenGenerator>,
    ) -> Self {
        let deadline = config.quota.store_timeout();

        let authorizer = Arc::new(Authorizer::new(
            key_store.clone(),
            directory.clone(),
            deadline,
        ));
        let keys = Arc::new(KeyController::new(
            key_store.clone(),
            directory.clone(),
            tokens,
            &config.quota,
        ));
        let directory = Arc::new(DirectoryService::new(directory, deadline));

        Self {
            config,
            db,
            key_store,
            authorizer,
            keys,
            directory,
        }
    }
}
