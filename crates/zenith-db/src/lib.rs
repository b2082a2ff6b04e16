//! Storage engine for Zenith conversation history.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and embedded SQL migrations. The schema is a single append-only `turns`
//! log; query helpers live in `zenith-turns`.
//!
//! Migrations are compiled into the binary via `include_str!` so the schema
//! always ships with the code that reads it.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
