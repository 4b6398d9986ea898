//! Prepared statement handles.
//!
//! A [`Statement`] owns one compiled native statement and keeps a non-owning
//! [`Weak`] reference to the connection that compiled it. The back-reference
//! is upgraded only for the duration of a native call, to check that the
//! connection is still open and to read its diagnostic text on failure; it
//! never keeps the connection alive. A connection may therefore be closed or
//! dropped while statements are still outstanding, and those statements can
//! still be finalized.

use std::ffi::{CStr, c_int, c_uint};
use std::fmt;
use std::ops::BitOr;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Weak};

use libsqlite3_sys::{
   SQLITE_OK, SQLITE_PREPARE_NO_VTAB, SQLITE_PREPARE_PERSISTENT, sqlite3,
   sqlite3_bind_parameter_count, sqlite3_column_count, sqlite3_column_name, sqlite3_expanded_sql,
   sqlite3_finalize, sqlite3_free, sqlite3_prepare_v3, sqlite3_sql, sqlite3_stmt,
};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionInner};
use crate::error::{Error, Result, UserError};

/// Flags passed to `sqlite3_prepare_v3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrepareFlags(u32);

impl PrepareFlags {
   /// Hint that the statement will be retained and reused many times.
   pub const PERSISTENT: Self = Self(SQLITE_PREPARE_PERSISTENT as u32);
   /// Refuse statements that use virtual tables.
   pub const NO_VTAB: Self = Self(SQLITE_PREPARE_NO_VTAB as u32);

   pub const fn empty() -> Self {
      Self(0)
   }

   pub const fn from_bits(bits: u32) -> Self {
      Self(bits)
   }

   pub const fn bits(self) -> u32 {
      self.0
   }
}

impl BitOr for PrepareFlags {
   type Output = Self;

   fn bitor(self, rhs: Self) -> Self {
      Self(self.0 | rhs.0)
   }
}

/// Position of a statement in the execution protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecState {
   /// Freshly prepared or reset; the next step starts execution.
   Ready,
   /// The last step produced a row.
   RowAvailable,
   /// Execution finished. Further steps return done until the statement is reset.
   Done,
   /// The last step failed. The cursor has already been reset, so the next
   /// step re-executes from the start.
   Failed,
}

/// Owned native statement pointer. Dropping it finalizes the statement.
pub(crate) struct RawStmt(NonNull<sqlite3_stmt>);

// SAFETY: the parent connection runs in serialized mode and every use of the
// pointer is guarded by the owning statement's lock.
unsafe impl Send for RawStmt {}

impl RawStmt {
   pub(crate) fn as_ptr(&self) -> *mut sqlite3_stmt {
      self.0.as_ptr()
   }
}

impl Drop for RawStmt {
   fn drop(&mut self) {
      // SAFETY: the guard is dropped exactly once. sqlite3_finalize returns
      // the status of the most recent step, not a failure to release, so the
      // code is ignored.
      unsafe { sqlite3_finalize(self.as_ptr()) };
   }
}

/// Native statement plus its protocol state, cleared together on finalize.
pub(crate) struct StmtSlot {
   pub(crate) raw: RawStmt,
   pub(crate) state: ExecState,
}

pub(crate) struct StatementInner {
   slot: Mutex<Option<StmtSlot>>,
   conn: Weak<ConnectionInner>,
   parameter_count: u32,
}

/// A compiled, parameterized statement.
#[derive(Clone)]
pub struct Statement {
   pub(crate) inner: Arc<StatementInner>,
}

impl fmt::Debug for Statement {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Statement")
         .field("parameter_count", &self.inner.parameter_count)
         .field("finalized", &self.is_finalized())
         .finish()
   }
}

impl Statement {
   /// Compiles the first statement in `sql` on `conn`. Text after it is ignored.
   ///
   /// # Errors
   ///
   /// [`UserError::EmptyStatement`] when `sql` holds only whitespace or
   /// comments; an engine error (with the connection's diagnostic text) when
   /// compilation fails.
   pub fn prepare(conn: &Connection, sql: impl AsRef<[u8]>, flags: PrepareFlags) -> Result<Self> {
      let sql = sql.as_ref();
      let len = c_int::try_from(sql.len()).map_err(|_| UserError::TooLarge(sql.len()))?;

      let raw = conn.inner.with_db(|db| {
         let mut stmt = ptr::null_mut();
         // SAFETY: db is open while with_db holds the lock; sql is valid for
         // len bytes and prepare_v3 does not require a nul terminator.
         let rc = unsafe {
            sqlite3_prepare_v3(
               db,
               sql.as_ptr().cast(),
               len,
               flags.bits() as c_uint,
               &mut stmt,
               ptr::null_mut(),
            )
         };
         if rc != SQLITE_OK {
            // SAFETY: db is still open.
            return Err(unsafe { Error::from_db(rc, db) });
         }
         NonNull::new(stmt)
            .map(RawStmt)
            .ok_or_else(|| UserError::EmptyStatement.into())
      })?;

      // SAFETY: raw is a valid, freshly compiled statement.
      let parameter_count = unsafe { sqlite3_bind_parameter_count(raw.as_ptr()) };

      debug!(sql = %String::from_utf8_lossy(sql), parameter_count, "Prepared statement");

      Ok(Self {
         inner: Arc::new(StatementInner {
            slot: Mutex::new(Some(StmtSlot {
               raw,
               state: ExecState::Ready,
            })),
            conn: Arc::downgrade(&conn.inner),
            parameter_count: u32::try_from(parameter_count).unwrap_or(0),
         }),
      })
   }

   /// Releases the native statement.
   ///
   /// Finalizing twice is a no-op, and works whether or not the parent
   /// connection is still open.
   pub fn finalize(&self) -> Result<()> {
      let Some(mut guard) = self.inner.slot.try_lock() else {
         return Err(UserError::HandleBusy.into());
      };
      if guard.take().is_some() {
         trace!("Finalized statement");
      }
      Ok(())
   }

   pub fn is_finalized(&self) -> bool {
      self.inner.slot.lock().is_none()
   }

   /// Number of parameters, fixed at compile time.
   pub fn parameter_count(&self) -> u32 {
      self.inner.parameter_count
   }

   /// Current position in the execution protocol.
   pub fn state(&self) -> Result<ExecState> {
      let guard = self.inner.slot.lock();
      let slot = guard.as_ref().ok_or(UserError::StatementFinalized)?;
      Ok(slot.state)
   }

   /// Runs `f` against the live native statement and its connection handle.
   ///
   /// The statement lock is taken before the connection lock. Fails with a
   /// user error if the statement was finalized or its connection is closed.
   pub(crate) fn with_slot<T>(
      &self,
      f: impl FnOnce(&mut StmtSlot, *mut sqlite3) -> Result<T>,
   ) -> Result<T> {
      let mut guard = self.inner.slot.lock();
      let slot = guard.as_mut().ok_or(UserError::StatementFinalized)?;
      let conn = self.inner.conn.upgrade().ok_or(UserError::ConnectionClosed)?;
      conn.with_db(|db| f(slot, db))
   }

   /// Number of result columns, re-read from the engine on every call.
   pub fn column_count(&self) -> Result<u32> {
      self.with_slot(|slot, _| {
         // SAFETY: the slot lock keeps the statement alive.
         let count = unsafe { sqlite3_column_count(slot.raw.as_ptr()) };
         Ok(u32::try_from(count).unwrap_or(0))
      })
   }

   /// Name of the result column at zero-based `index`.
   pub fn column_name(&self, index: u32) -> Result<String> {
      self.with_slot(|slot, _| {
         let stmt = slot.raw.as_ptr();
         // SAFETY: the slot lock keeps the statement alive.
         let count = unsafe { sqlite3_column_count(stmt) };
         let column = c_int::try_from(index)
            .ok()
            .filter(|i| *i < count)
            .ok_or(UserError::ColumnOutOfRange {
               index,
               count: u32::try_from(count).unwrap_or(0),
            })?;
         // SAFETY: index is below the column count.
         unsafe { column_name_raw(stmt, column) }
      })
   }

   /// Names of every result column, in order.
   pub fn column_names(&self) -> Result<Vec<String>> {
      self.with_slot(|slot, _| {
         let stmt = slot.raw.as_ptr();
         // SAFETY: the slot lock keeps the statement alive.
         let count = unsafe { sqlite3_column_count(stmt) };
         let mut names = Vec::new();
         names.try_reserve_exact(usize::try_from(count).unwrap_or(0))?;
         for column in 0..count {
            // SAFETY: column is below the column count.
            names.push(unsafe { column_name_raw(stmt, column) }?);
         }
         Ok(names)
      })
   }

   /// The SQL text the statement was compiled from.
   pub fn sql(&self) -> Result<String> {
      self.with_slot(|slot, _| {
         // SAFETY: the slot lock keeps the statement alive; the text is owned by it.
         let ptr = unsafe { sqlite3_sql(slot.raw.as_ptr()) };
         if ptr.is_null() {
            return Ok(String::new());
         }
         Ok(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
      })
   }

   /// The SQL text with current bindings substituted for parameters.
   pub fn expanded_sql(&self) -> Result<String> {
      self.with_slot(|slot, _| {
         // SAFETY: the slot lock keeps the statement alive.
         let ptr = unsafe { sqlite3_expanded_sql(slot.raw.as_ptr()) };
         if ptr.is_null() {
            return Err(Error::Resource("could not expand statement SQL".into()));
         }
         // SAFETY: ptr is a nul-terminated buffer we own until sqlite3_free.
         let sql = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
         unsafe { sqlite3_free(ptr.cast()) };
         Ok(sql)
      })
   }

   /// The parent connection's diagnostic text, or `None` if it is gone or closed.
   pub fn errmsg(&self) -> Option<String> {
      let conn = self.inner.conn.upgrade()?;
      Connection { inner: conn }.errmsg()
   }
}

/// # Safety
///
/// `stmt` must be valid and `index` below its column count.
unsafe fn column_name_raw(stmt: *mut sqlite3_stmt, index: c_int) -> Result<String> {
   // SAFETY: forwarded from the caller.
   let ptr = unsafe { sqlite3_column_name(stmt, index) };
   if ptr.is_null() {
      return Err(Error::Resource(format!("could not read name of column {index}")));
   }
   Ok(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}
