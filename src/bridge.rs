//! Async entry point over the native layer.
//!
//! Each method looks its operation up in the [schedule](crate::schedule) and
//! either runs it on the calling task or moves it to tokio's blocking pool.
//! Handles are cheap to clone, so offloaded closures take their own clone.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlite_bridge_core::{
   BinaryAs, Connection, MultiStep, OpenFlags, PrepareFlags, Row, Statement, Step, StorageClass,
   Term, infer_param_class,
};
use tracing::{debug, trace};

use crate::config::BridgeConfig;
use crate::decode::{json_to_term, parse_storage_class, row_to_map};
use crate::schedule::schedule_for;
use crate::Result;

/// Runs native operations with the scheduling each one requires.
#[derive(Debug, Clone, Default)]
pub struct Bridge {
   config: BridgeConfig,
}

impl Bridge {
   pub fn new(config: BridgeConfig) -> Self {
      Self { config }
   }

   pub fn config(&self) -> &BridgeConfig {
      &self.config
   }

   async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
   where
      F: FnOnce() -> sqlite_bridge_core::Result<T> + Send + 'static,
      T: Send + 'static,
   {
      let schedule = schedule_for(operation, !self.config.offload_steps);
      trace!(operation, %schedule, "Dispatching operation");

      if schedule.is_offloaded() {
         Ok(tokio::task::spawn_blocking(f).await??)
      } else {
         Ok(f()?)
      }
   }

   // ==========================================================================
   // Lifecycle
   // ==========================================================================

   /// Opens `path` with the configured default flags.
   pub async fn open(&self, path: impl AsRef<Path>) -> Result<Connection> {
      self.open_with_flags(path, self.config.open_flags()).await
   }

   pub async fn open_with_flags(
      &self,
      path: impl AsRef<Path>,
      flags: OpenFlags,
   ) -> Result<Connection> {
      let path: PathBuf = path.as_ref().to_path_buf();
      debug!(path = %path.display(), "Opening database");
      self.run("open", move || Connection::open(path, flags)).await
   }

   pub async fn close(&self, conn: &Connection) -> Result<()> {
      let conn = conn.clone();
      self.run("close", move || conn.close()).await
   }

   pub async fn execute_batch(&self, conn: &Connection, sql: impl Into<String>) -> Result<()> {
      let conn = conn.clone();
      let sql = sql.into();
      self.run("execute_batch", move || conn.execute_batch(&sql)).await
   }

   /// Compiles `sql` with the configured default prepare flags.
   pub async fn prepare(&self, conn: &Connection, sql: impl Into<String>) -> Result<Statement> {
      self.prepare_with_flags(conn, sql, self.config.prepare_flags()).await
   }

   pub async fn prepare_with_flags(
      &self,
      conn: &Connection,
      sql: impl Into<String>,
      flags: PrepareFlags,
   ) -> Result<Statement> {
      let conn = conn.clone();
      let sql = sql.into();
      self.run("prepare", move || conn.prepare(sql, flags)).await
   }

   pub async fn finalize(&self, stmt: &Statement) -> Result<()> {
      let stmt = stmt.clone();
      self.run("finalize", move || stmt.finalize()).await
   }

   pub async fn enable_load_extension(&self, conn: &Connection, enabled: bool) -> Result<()> {
      let conn = conn.clone();
      self.run("enable_load_extension", move || conn.enable_load_extension(enabled)).await
   }

   /// Requests that any step running on `conn` stop. Never blocks.
   pub fn interrupt(&self, conn: &Connection) {
      conn.interrupt();
   }

   // ==========================================================================
   // Execution
   // ==========================================================================

   pub async fn step(&self, stmt: &Statement) -> Result<Step> {
      let stmt = stmt.clone();
      self.run("step", move || stmt.step()).await
   }

   pub async fn multi_step(&self, stmt: &Statement, limit: u32) -> Result<MultiStep> {
      let stmt = stmt.clone();
      self.run("multi_step", move || stmt.multi_step(limit)).await
   }

   pub async fn fetch_all(&self, stmt: &Statement) -> Result<Vec<Row>> {
      let stmt = stmt.clone();
      self.run("fetch_all", move || stmt.fetch_all()).await
   }

   /// Drains `stmt` in chunks of `multi_step_limit` rows.
   ///
   /// Unlike [`fetch_all`](Self::fetch_all), each chunk is a separate
   /// offloaded call.
   pub async fn collect_rows(&self, stmt: &Statement) -> Result<Vec<Row>> {
      let limit = self.config.multi_step_limit.max(1);
      let mut rows = Vec::new();
      loop {
         match self.multi_step(stmt, limit).await? {
            MultiStep::Rows(chunk) => rows.extend(chunk),
            MultiStep::Done(chunk) => {
               rows.extend(chunk);
               return Ok(rows);
            }
         }
      }
   }

   /// Drains `stmt` and returns each row as a column-ordered JSON object.
   ///
   /// Column names are read in the same offloaded call as the first chunk.
   pub async fn fetch_all_json(
      &self,
      stmt: &Statement,
   ) -> Result<Vec<IndexMap<String, JsonValue>>> {
      let limit = self.config.multi_step_limit.max(1);
      let first = stmt.clone();
      let (columns, mut chunk) = self
         .run("multi_step", move || Ok((first.column_names()?, first.multi_step(limit)?)))
         .await?;

      let mut rows = Vec::new();
      loop {
         let done = chunk.is_done();
         rows.extend(chunk.into_rows().iter().map(|row| row_to_map(&columns, row)));
         if done {
            return Ok(rows);
         }
         chunk = self.multi_step(stmt, limit).await?;
      }
   }

   pub async fn insert_all(
      &self,
      stmt: &Statement,
      type_tags: Vec<StorageClass>,
      rows: Vec<Vec<Term>>,
   ) -> Result<()> {
      let stmt = stmt.clone();
      self.run("insert_all", move || stmt.insert_all(&type_tags, &rows)).await
   }

   /// [`insert_all`](Self::insert_all) with type tags given by name and rows as JSON values.
   pub async fn insert_all_json(
      &self,
      stmt: &Statement,
      type_tags: &[&str],
      rows: &[Vec<JsonValue>],
   ) -> Result<()> {
      let type_tags = type_tags
         .iter()
         .map(|name| parse_storage_class(name))
         .collect::<Result<Vec<_>>>()?;
      let rows = rows
         .iter()
         .map(|row| row.iter().map(json_to_term).collect::<Result<Vec<_>>>())
         .collect::<Result<Vec<_>>>()?;
      self.insert_all(stmt, type_tags, rows).await
   }

   // ==========================================================================
   // Binding
   // ==========================================================================

   /// Binds `values` to parameters 1..=n in order.
   ///
   /// Strings bind as TEXT. Every value is converted before anything is
   /// bound, so a rejected call leaves the statement's bindings as they were.
   /// Binding is cheap, so it runs inline.
   pub fn bind_json(&self, stmt: &Statement, values: &[JsonValue]) -> Result<()> {
      let terms = values.iter().map(json_to_term).collect::<Result<Vec<_>>>()?;
      let values = terms
         .iter()
         .map(|term| infer_param_class(term, BinaryAs::Text))
         .collect::<std::result::Result<Vec<_>, _>>()
         .map_err(sqlite_bridge_core::Error::from)?;
      stmt.bind_all(&values)?;
      Ok(())
   }
}
