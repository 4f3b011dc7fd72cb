use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use std::sync::Mutex;

use crate::error::ScanError;

/// One persisted detection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    pub id: i64,
    pub name: String,
    pub price: i64,
}

/// Durable record of detected products.
///
/// Shared between the detection session and HTTP workers, so implementations
/// synchronize internally and take `&self`.
pub trait ProductStore: Send + Sync {
    /// Ensures the schema exists. Safe to call repeatedly.
    fn initialize(&self) -> Result<()>;

    /// Inserts one record unconditionally. No dedup happens at this layer.
    fn append(&self, name: &str, price: i64) -> Result<ProductRecord>;

    /// All records in insertion order.
    fn list_all(&self) -> Result<Vec<ProductRecord>>;
}

pub struct SqliteProductStore {
    conn: Mutex<Connection>,
}

impl SqliteProductStore {
    /// Opens (creating if needed) the database and ensures the schema.
    ///
    /// `file:` URIs are opened with URI parsing enabled, which lets tests use
    /// shared in-memory databases.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)
            .map_err(ScanError::storage)
            .with_context(|| format!("open product store {}", db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ScanError::storage("product store lock poisoned"))?;
        f(&conn).map_err(ScanError::storage)
    }
}

fn open_db_connection(db_path: &str) -> rusqlite::Result<Connection> {
    if db_path.starts_with("file:") {
        return Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        );
    }
    Connection::open(db_path)
}

impl ProductStore for SqliteProductStore {
    fn initialize(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS products (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  name TEXT NOT NULL,
                  price INTEGER NOT NULL
                );
                "#,
            )
        })
        .context("ensure products schema")
    }

    fn append(&self, name: &str, price: i64) -> Result<ProductRecord> {
        let id = self
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO products (name, price) VALUES (?1, ?2)",
                    params![name, price],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .with_context(|| format!("insert product {}", name))?;
        Ok(ProductRecord {
            id,
            name: name.to_string(),
            price,
        })
    }

    fn list_all(&self) -> Result<Vec<ProductRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, price FROM products ORDER BY id ASC")?;
            let rows = stmt.query_map([], |row| {
                Ok(ProductRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    price: row.get(2)?,
                })
            })?;
            let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .context("list products")
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProductStore {
    records: Mutex<Vec<ProductRecord>>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProductStore for InMemoryProductStore {
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn append(&self, name: &str, price: i64) -> Result<ProductRecord> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| ScanError::storage("in-memory store lock poisoned"))?;
        let id = records.last().map_or(1, |last| last.id + 1);
        let record = ProductRecord {
            id,
            name: name.to_string(),
            price,
        };
        records.push(record.clone());
        Ok(record)
    }

    fn list_all(&self) -> Result<Vec<ProductRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| ScanError::storage("in-memory store lock poisoned"))?;
        Ok(records.clone())
    }
}
