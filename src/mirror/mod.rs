//! Mirror core: snapshots, caches, reconciliation and downloads.

pub mod catalog_cache;
pub mod checksum;
pub mod config_loader;
pub mod download_engine;
pub mod model;
pub mod path_resolver;
pub mod reconcile;
pub mod scanner;
pub mod store;
