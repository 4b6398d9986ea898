//! Batch insert fast path.

use std::ffi::c_int;

use libsqlite3_sys::{
   SQLITE_DONE, SQLITE_OK, SQLITE_ROW, sqlite3, sqlite3_reset, sqlite3_step, sqlite3_stmt,
};
use tracing::trace;

use crate::bind::{bind_raw, check_length};
use crate::error::{Error, Result, UserError};
use crate::statement::{ExecState, Statement};
use crate::value::{StorageClass, Term, coerce_to_class};

impl Statement {
   /// Executes the statement once per row of `rows`, binding each value with
   /// the storage class declared at the same position in `type_tags`.
   ///
   /// The whole batch is validated first: `type_tags` must have one entry per
   /// parameter, every row exactly as many values, and every value must fit
   /// its declared class (nil always binds null). A malformed batch is
   /// rejected before any row is applied.
   ///
   /// Execution stops at the first engine failure. Rows already applied are
   /// not rolled back; wrap the call in a transaction for all-or-nothing
   /// behavior. The statement is reset afterwards.
   pub fn insert_all<R: AsRef<[Term]>>(
      &self,
      type_tags: &[StorageClass],
      rows: &[R],
   ) -> Result<()> {
      let expected = usize::try_from(self.parameter_count()).unwrap_or(usize::MAX);
      if type_tags.len() != expected {
         return Err(UserError::TypeTagCount {
            expected,
            found: type_tags.len(),
         }
         .into());
      }
      for (row_index, row) in rows.iter().enumerate() {
         validate_row(type_tags, row.as_ref(), row_index)?;
      }

      self.with_slot(|slot, db| {
         let stmt = slot.raw.as_ptr();
         // SAFETY: both locks are held, db owns stmt and every row was validated.
         let result = unsafe { run_rows(stmt, db, type_tags, rows) };
         unsafe { sqlite3_reset(stmt) };
         slot.state = match result {
            Ok(()) => ExecState::Ready,
            Err(_) => ExecState::Failed,
         };
         trace!(rows = rows.len(), ok = result.is_ok(), "Batch insert finished");
         result
      })
   }
}

fn validate_row(type_tags: &[StorageClass], row: &[Term], row_index: usize) -> Result<()> {
   if row.len() != type_tags.len() {
      return Err(UserError::ArityMismatch {
         row: row_index,
         expected: type_tags.len(),
         found: row.len(),
      }
      .into());
   }
   for (position, (value, class)) in row.iter().zip(type_tags).enumerate() {
      let value = coerce_to_class(value, *class, param_index(position))?;
      check_length(&value)?;
   }
   Ok(())
}

fn param_index(position: usize) -> u32 {
   u32::try_from(position + 1).unwrap_or(u32::MAX)
}

/// # Safety
///
/// `stmt` must be live and owned by `db`, both locks must be held, and the
/// rows must have passed [`validate_row`].
unsafe fn run_rows<R: AsRef<[Term]>>(
   stmt: *mut sqlite3_stmt,
   db: *mut sqlite3,
   type_tags: &[StorageClass],
   rows: &[R],
) -> Result<()> {
   for (row_index, row) in rows.iter().enumerate() {
      // SAFETY: forwarded from the caller.
      unsafe { sqlite3_reset(stmt) };

      for (position, (value, class)) in row.as_ref().iter().zip(type_tags).enumerate() {
         let value = coerce_to_class(value, *class, param_index(position))?;
         // SAFETY: position + 1 is a valid parameter index (tag count equals
         // the parameter count) and lengths were checked during validation.
         let rc = unsafe { bind_raw(stmt, (position + 1) as c_int, value) };
         if rc != SQLITE_OK {
            return Err(unsafe { Error::from_db(rc, db) });
         }
      }

      match unsafe { sqlite3_step(stmt) } {
         SQLITE_DONE => {}
         SQLITE_ROW => return Err(UserError::UnexpectedRow(row_index).into()),
         rc => return Err(unsafe { Error::from_db(rc, db) }),
      }
   }
   Ok(())
}
