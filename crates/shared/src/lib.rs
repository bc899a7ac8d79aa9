//! Shared infrastructure for the deskbill workspace.
//!
//! Holds the database pool constructors and the embedded migration
//! runner so that the api and worker binaries agree on connection and
//! schema setup.

pub mod db;

pub use db::{create_migration_pool, create_pool, run_migrations};
