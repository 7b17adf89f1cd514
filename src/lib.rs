pub mod ast;
pub mod btree;
mod buffer_pool;
mod disk;
pub mod executor;
mod expr;
pub mod interpreter;
mod marshal;
pub mod page;
pub mod parser;
mod pt_to_ast;
pub mod store;
mod table;
pub mod value;

extern crate pest;
#[macro_use]
extern crate pest_derive;

use std::path::Path;

use interpreter::{ExecutionResult, Interpreter};
use store::Store;

/// A connected database: one directory on disk, one [`Store`] (catalog) and
/// one [`Interpreter`] bound to it. This is the crate's top-level handle —
/// `main`'s REPL and the integration tests both drive SQL through
/// [`Database::execute`].
///
/// Flushes every open table's buffer pool on drop: the engine itself never
/// flushes eagerly, so without this the last session's writes could remain
/// only in evicted-or-not frames at process exit.
pub struct Database {
    interpreter: Interpreter,
}

impl Database {
    /// Opens (creating if needed) the database directory at `dir`, giving
    /// each table/index its own buffer pool of `num_frames` frames.
    pub fn open(dir: impl AsRef<Path>, num_frames: usize) -> Result<Self, store::Error> {
        let store = Store::open(dir, num_frames)?;
        Ok(Database {
            interpreter: Interpreter::new(store),
        })
    }

    /// Parses and runs one SQL statement end to end.
    pub fn execute(&self, sql: &str) -> anyhow::Result<ExecutionResult> {
        self.interpreter.execute(sql)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.interpreter.flush_all() {
            log::error!("failed to flush database on close: {e}");
        }
    }
}
