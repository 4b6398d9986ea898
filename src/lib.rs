//! # sqlite-bridge
//!
//! Async host boundary over [`sqlite_bridge_core`].
//!
//! The core crate owns native handles and the execution protocol; this crate
//! decides where each operation runs (see [`schedule`]), converts JSON host
//! values and result rows, and reports failures as structured
//! `{code, message}` errors.
//!
//! # Example
//!
//! ```no_run
//! use sqlite_bridge::{Bridge, BridgeConfig};
//! use serde_json::json;
//!
//! # async fn example() -> sqlite_bridge::Result<()> {
//! let bridge = Bridge::new(BridgeConfig::default());
//! let conn = bridge.open("app.db").await?;
//! bridge
//!    .execute_batch(&conn, "CREATE TABLE IF NOT EXISTS users (id INTEGER, name TEXT)")
//!    .await?;
//!
//! let insert = bridge.prepare(&conn, "INSERT INTO users VALUES (?, ?)").await?;
//! bridge
//!    .insert_all_json(&insert, &["INTEGER", "TEXT"], &[vec![json!(1), json!("alice")]])
//!    .await?;
//!
//! let select = bridge.prepare(&conn, "SELECT id, name FROM users").await?;
//! let rows = bridge.fetch_all_json(&select).await?;
//! assert_eq!(rows[0]["name"], json!("alice"));
//!
//! bridge.close(&conn).await?;
//! # Ok(())
//! # }
//! ```

mod bridge;
mod config;
mod decode;
mod error;
pub mod schedule;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use decode::{cell_to_json, json_to_term, parse_storage_class, row_to_map};
pub use error::{Error, Result};
pub use sqlite_bridge_core::{
   Cell, Connection, ExecState, MultiStep, OpenFlags, PrepareFlags, Row, Statement, Step,
   StorageClass, Term,
};
