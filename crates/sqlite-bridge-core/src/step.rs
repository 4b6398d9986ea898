//! Step-wise execution.
//!
//! The engine resets a statement on its own once it reports done, so the
//! wrapper tracks [`ExecState`] itself. That is what lets a finished
//! statement keep answering [`Step::Done`] until it is explicitly reset,
//! instead of silently starting over.

use std::ffi::c_int;

use libsqlite3_sys::{
   SQLITE_DONE, SQLITE_OK, SQLITE_ROW, sqlite3, sqlite3_column_count, sqlite3_reset, sqlite3_step,
};
use tracing::trace;

use crate::error::{Error, Result, UserError};
use crate::statement::{ExecState, Statement, StmtSlot};
use crate::value::{Cell, Row, cell_from_column, row_from_stmt};

/// Outcome of a single [`Statement::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
   Row(Row),
   Done,
}

impl Step {
   pub fn is_done(&self) -> bool {
      matches!(self, Step::Done)
   }

   pub fn into_row(self) -> Option<Row> {
      match self {
         Step::Row(row) => Some(row),
         Step::Done => None,
      }
   }
}

/// Outcome of a [`Statement::multi_step`].
#[derive(Debug, Clone, PartialEq)]
pub enum MultiStep {
   /// The statement finished; these are the remaining rows (possibly fewer than the limit).
   Done(Vec<Row>),
   /// Exactly `limit` rows; more may follow.
   Rows(Vec<Row>),
}

impl MultiStep {
   pub fn is_done(&self) -> bool {
      matches!(self, MultiStep::Done(_))
   }

   pub fn rows(&self) -> &[Row] {
      match self {
         MultiStep::Done(rows) | MultiStep::Rows(rows) => rows,
      }
   }

   pub fn into_rows(self) -> Vec<Row> {
      match self {
         MultiStep::Done(rows) | MultiStep::Rows(rows) => rows,
      }
   }
}

impl Statement {
   /// Advances the statement by one row.
   ///
   /// Once the statement has reported [`Step::Done`], further calls return
   /// `Done` again without re-executing it; call [`reset`](Self::reset) to
   /// run it again. A failed step resets the cursor (bindings are kept) before
   /// returning the error, so the statement can be stepped again.
   pub fn step(&self) -> Result<Step> {
      self.with_slot(|slot, db| {
         // SAFETY: both locks are held and db is the statement's connection.
         match unsafe { step_native(slot, db) }? {
            Some(row) => Ok(Step::Row(row)),
            None => Ok(Step::Done),
         }
      })
   }

   /// Steps up to `limit` times, collecting rows in engine order.
   ///
   /// Returns [`MultiStep::Rows`] with exactly `limit` rows if the limit was
   /// reached, otherwise [`MultiStep::Done`] with the rows that remained. On
   /// failure the rows collected by this call are discarded.
   pub fn multi_step(&self, limit: u32) -> Result<MultiStep> {
      self.with_slot(|slot, db| {
         if slot.state == ExecState::Done {
            return Ok(MultiStep::Done(Vec::new()));
         }

         let limit = usize::try_from(limit).unwrap_or(usize::MAX);
         let mut rows = Vec::new();
         while rows.len() < limit {
            // SAFETY: both locks are held and db is the statement's connection.
            match unsafe { step_native(slot, db) }? {
               Some(row) => {
                  rows.try_reserve(1)?;
                  rows.push(row);
               }
               None => {
                  trace!(rows = rows.len(), "multi_step reached done");
                  return Ok(MultiStep::Done(rows));
               }
            }
         }
         Ok(MultiStep::Rows(rows))
      })
   }

   /// Steps until done and returns every remaining row.
   ///
   /// Memory use is unbounded; use [`multi_step`](Self::multi_step) for large results.
   pub fn fetch_all(&self) -> Result<Vec<Row>> {
      self.with_slot(|slot, db| {
         let mut rows = Vec::new();
         // SAFETY: both locks are held and db is the statement's connection.
         while let Some(row) = unsafe { step_native(slot, db) }? {
            rows.try_reserve(1)?;
            rows.push(row);
         }
         trace!(rows = rows.len(), "fetch_all drained statement");
         Ok(rows)
      })
   }

   /// Rewinds the statement to [`ExecState::Ready`]. Bindings are kept.
   pub fn reset(&self) -> Result<()> {
      self.with_slot(|slot, db| {
         // SAFETY: the statement is live.
         let rc = unsafe { sqlite3_reset(slot.raw.as_ptr()) };
         slot.state = ExecState::Ready;
         if rc != SQLITE_OK {
            // SAFETY: db is open while the connection lock is held.
            return Err(unsafe { Error::from_db(rc, db) });
         }
         Ok(())
      })
   }

   /// Reads column `index` of the row produced by the last step.
   pub fn column(&self, index: u32) -> Result<Cell> {
      self.with_slot(|slot, _| {
         if slot.state != ExecState::RowAvailable {
            return Err(UserError::NoRowAvailable.into());
         }
         let stmt = slot.raw.as_ptr();
         // SAFETY: the statement is live.
         let count = unsafe { sqlite3_column_count(stmt) };
         let column = c_int::try_from(index)
            .ok()
            .filter(|i| *i < count)
            .ok_or(UserError::ColumnOutOfRange {
               index,
               count: u32::try_from(count).unwrap_or(0),
            })?;
         // SAFETY: the statement is on a row and column is in range.
         Ok(unsafe { cell_from_column(stmt, column) })
      })
   }
}

/// Performs one native step and updates the statement's state.
///
/// Returns `Ok(None)` once the statement is done, without calling the engine
/// again if it already was.
///
/// # Safety
///
/// `db` must be the open connection that owns `slot`'s statement, and both
/// the statement and connection locks must be held.
pub(crate) unsafe fn step_native(slot: &mut StmtSlot, db: *mut sqlite3) -> Result<Option<Row>> {
   if slot.state == ExecState::Done {
      return Ok(None);
   }

   let stmt = slot.raw.as_ptr();
   // SAFETY: forwarded from the caller.
   let rc = unsafe { sqlite3_step(stmt) };
   match rc {
      SQLITE_ROW => {
         // Width is re-read on every row; a schema change can recompile the statement.
         let count = unsafe { sqlite3_column_count(stmt) };
         match unsafe { row_from_stmt(stmt, count) } {
            Ok(row) => {
               slot.state = ExecState::RowAvailable;
               Ok(Some(row))
            }
            Err(err) => {
               unsafe { sqlite3_reset(stmt) };
               slot.state = ExecState::Failed;
               Err(err)
            }
         }
      }
      SQLITE_DONE => {
         unsafe { sqlite3_reset(stmt) };
         slot.state = ExecState::Done;
         Ok(None)
      }
      _ => {
         // The diagnostic must be read before the reset overwrites it.
         let err = unsafe { Error::from_db(rc, db) };
         unsafe { sqlite3_reset(stmt) };
         slot.state = ExecState::Failed;
         trace!(rc, "Step failed, cursor reset");
         Err(err)
      }
   }
}
