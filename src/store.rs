//! The directory-level catalog: creates, opens and drops tables,
//! persisting each table's schema in a sibling `<name>_schema` fixed-row
//! table and the set of table names in a small manifest file.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::page::Layout;
use crate::table::Table;
use crate::value::{ColumnSchema, ColumnType, Row, Schema, Value};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Table(#[from] crate::table::Error),
    #[error(transparent)]
    Schema(#[from] crate::value::SchemaError),
    #[error("no such table {0:?}")]
    NoSuchTable(String),
    #[error("table {0:?} already exists")]
    TableExists(String),
    #[error("corrupt catalog entry for {table:?}: {detail}")]
    CorruptCatalog { table: String, detail: String },
    #[error("failed to read manifest {path}: {source}")]
    ManifestRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write manifest {path}: {source}")]
    ManifestWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove file {path}: {source}")]
    Remove {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn catalog_schema() -> Schema {
    Schema::new(vec![
        ColumnSchema::new("name", ColumnType::Varchar(1024)),
        ColumnSchema::new("length", ColumnType::UInt64),
        ColumnSchema::new("type", ColumnType::Varchar(1024)),
    ])
    .expect("three-column catalog schema is well under MAX_COLUMNS")
}

fn base_type_name(t: &ColumnType) -> &'static str {
    match t {
        ColumnType::Boolean => "boolean",
        ColumnType::UInt64 => "uint64",
        ColumnType::Int64 => "int64",
        ColumnType::Varchar(_) => "varchar",
        ColumnType::String => "string",
    }
}

fn column_length(t: &ColumnType) -> u64 {
    match t {
        ColumnType::Varchar(n) => *n as u64,
        _ => 0,
    }
}

fn column_type_from_catalog_row(name: &str, length: u64, type_name: &str) -> Result<ColumnType, Error> {
    let err = |detail: String| Error::CorruptCatalog { table: name.to_string(), detail };
    match type_name {
        "boolean" => Ok(ColumnType::Boolean),
        "uint64" => Ok(ColumnType::UInt64),
        "int64" => Ok(ColumnType::Int64),
        "string" => Ok(ColumnType::String),
        "varchar" => {
            let n = u16::try_from(length).map_err(|_| err(format!("varchar length {length} out of range")))?;
            Ok(ColumnType::Varchar(n))
        }
        other => Err(err(format!("unknown column type {other:?}"))),
    }
}

/// Directory-level catalog of tables: which data file and `_schema`
/// companion belong to which name, plus a manifest of every known table.
pub struct Store {
    dir: PathBuf,
    num_frames: usize,
    tables: RefCell<HashMap<String, Rc<Table>>>,
}

impl Store {
    /// Opens (creating if needed) the database directory at `dir`.
    pub fn open(dir: impl AsRef<Path>, num_frames: usize) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| Error::ManifestWrite {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Store {
            dir,
            num_frames,
            tables: RefCell::new(HashMap::new()),
        })
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join("tables.manifest")
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn manifest_names(&self) -> Result<Vec<String>, Error> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| Error::ManifestRead {
            path: path.display().to_string(),
            source,
        })?;
        Ok(contents.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    fn write_manifest_names(&self, names: &[String]) -> Result<(), Error> {
        let path = self.manifest_path();
        let contents = names.join("\n");
        std::fs::write(&path, contents).map_err(|source| Error::ManifestWrite {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.manifest_names().map(|names| names.iter().any(|n| n == name)).unwrap_or(false)
    }

    fn schema_table_name(name: &str) -> String {
        format!("{name}_schema")
    }

    fn open_schema_table(&self, name: &str, create: bool) -> Result<Table, Error> {
        let path = self.table_path(&Self::schema_table_name(name));
        if create {
            Ok(Table::create(&path, catalog_schema(), self.num_frames)?)
        } else {
            Ok(Table::open(&path, catalog_schema(), Layout::Fixed, self.num_frames)?)
        }
    }

    /// Creates table `name` with `schema`, persisting its catalog entry and
    /// updating the manifest. Fails if the name is already taken.
    pub fn create_table(&self, name: &str, schema: Schema) -> Result<Rc<Table>, Error> {
        if self.table_exists(name) {
            return Err(Error::TableExists(name.to_string()));
        }
        let schema_table = self.open_schema_table(name, true)?;
        for col in schema.columns() {
            let row = Row::new(vec![
                Value::FixedString(col.name.clone(), 1024),
                Value::UInt64(column_length(&col.column_type)),
                Value::FixedString(base_type_name(&col.column_type).to_string(), 1024),
            ]);
            schema_table.insert_row(&row)?;
        }
        schema_table.flush()?;

        let data_path = self.table_path(name);
        let table = Rc::new(Table::create(&data_path, schema, self.num_frames)?);

        let mut names = self.manifest_names()?;
        names.push(name.to_string());
        self.write_manifest_names(&names)?;

        log::info!("created table {name}");
        self.tables.borrow_mut().insert(name.to_string(), Rc::clone(&table));
        Ok(table)
    }

    /// Reads `<name>_schema` back into a [`Schema`] and opens the table's
    /// data file, caching the handle for subsequent calls.
    pub fn open_table(&self, name: &str) -> Result<Rc<Table>, Error> {
        if let Some(table) = self.tables.borrow().get(name) {
            return Ok(Rc::clone(table));
        }
        if !self.table_exists(name) {
            return Err(Error::NoSuchTable(name.to_string()));
        }
        let schema_table = self.open_schema_table(name, false)?;
        let mut columns = Vec::new();
        for (_, row) in schema_table.scan() {
            let col_name = row.values[0].as_str().unwrap_or_default().to_string();
            let length = match row.values[1] {
                Value::UInt64(n) => n,
                _ => return Err(Error::CorruptCatalog { table: name.to_string(), detail: "length column not uint64".to_string() }),
            };
            let type_name = row.values[2].as_str().unwrap_or_default().to_string();
            let column_type = column_type_from_catalog_row(&col_name, length, &type_name)?;
            columns.push(ColumnSchema::new(col_name, column_type));
        }
        let schema = Schema::new(columns)?;
        let layout = Layout::for_schema(&schema);
        let data_path = self.table_path(name);
        let table = Rc::new(Table::open(&data_path, schema, layout, self.num_frames)?);
        self.tables.borrow_mut().insert(name.to_string(), Rc::clone(&table));
        Ok(table)
    }

    /// Removes both the data file and the `_schema` companion, and drops the
    /// manifest entry.
    pub fn drop_table(&self, name: &str) -> Result<(), Error> {
        if !self.table_exists(name) {
            return Err(Error::NoSuchTable(name.to_string()));
        }
        self.tables.borrow_mut().remove(name);

        let data_path = self.table_path(name);
        std::fs::remove_file(&data_path).map_err(|source| Error::Remove { path: data_path.display().to_string(), source })?;
        let schema_path = self.table_path(&Self::schema_table_name(name));
        std::fs::remove_file(&schema_path).map_err(|source| Error::Remove { path: schema_path.display().to_string(), source })?;

        let names: Vec<String> = self.manifest_names()?.into_iter().filter(|n| n != name).collect();
        self.write_manifest_names(&names)?;

        log::info!("dropped table {name}");
        Ok(())
    }

    /// Flushes every open table's buffer pool. Called from the owning
    /// `Database`'s `Drop` impl.
    pub fn flush_all(&self) -> Result<(), Error> {
        for table in self.tables.borrow().values() {
            table.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("ferrodb_store_test_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&p);
        p
    }

    fn people_schema() -> Schema {
        Schema::new(vec![
            ColumnSchema::new("id", ColumnType::Int64),
            ColumnSchema::new("nick", ColumnType::Varchar(44)),
        ])
        .unwrap()
    }

    #[test]
    fn create_then_open_recovers_schema() {
        let dir = tmp_dir("ddl_round_trip");
        let store = Store::open(&dir, 8).unwrap();
        store.create_table("people", people_schema()).unwrap();
        assert!(store.table_exists("people"));

        let reopened = Store::open(&dir, 8).unwrap();
        let table = reopened.open_table("people").unwrap();
        assert_eq!(table.schema(), &people_schema());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn drop_table_removes_files_and_manifest_entry() {
        let dir = tmp_dir("drop");
        let store = Store::open(&dir, 8).unwrap();
        store.create_table("people", people_schema()).unwrap();
        store.drop_table("people").unwrap();
        assert!(!store.table_exists("people"));
        assert!(matches!(store.open_table("people"), Err(Error::NoSuchTable(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn creating_a_duplicate_table_fails() {
        let dir = tmp_dir("dup");
        let store = Store::open(&dir, 8).unwrap();
        store.create_table("people", people_schema()).unwrap();
        assert!(matches!(store.create_table("people", people_schema()), Err(Error::TableExists(_))));
        std::fs::remove_dir_all(&dir).ok();
    }
}
