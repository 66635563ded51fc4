//! SQLite storage for the catalog.
//!
//! No ORM: every module builds its own parameterized SQL against the single
//! `rusqlite` connection owned by [`Database`]. The handle is passed
//! explicitly to each component; its lifecycle belongs to the caller of the
//! ingestion orchestrator.

mod schema;
pub mod entities;
pub mod generations;
pub mod ksamplers;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

pub use generations::{GenerationFilter, GenerationRecord, NewGeneration};
pub use ksamplers::NewKSampler;
pub use schema::{MIGRATIONS, SCHEMA};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        for migration in MIGRATIONS {
            let _ = self.conn.execute(migration, []);
        }
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// `?, ?, ...` placeholder list for dynamic IN clauses.
pub(crate) fn placeholders(count: usize) -> String {
    let mut out = String::new();
    for i in 0..count {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('?');
    }
    out
}
