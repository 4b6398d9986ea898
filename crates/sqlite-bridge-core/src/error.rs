//! Error types for sqlite-bridge-core.
//!
//! Every failure that crosses the boundary falls into one of four categories
//! (see [`ErrorKind`]): a malformed call, a rejection by the engine, a local
//! allocation failure, or a cooperative interrupt. User errors are always
//! detected before the engine is called, so they never leave native state
//! partially mutated.

use std::collections::TryReserveError;
use std::ffi::{CStr, c_int};

use libsqlite3_sys::{SQLITE_INTERRUPT, sqlite3, sqlite3_errmsg, sqlite3_errstr};

use crate::value::StorageClass;

/// Result type alias for native layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`], used by callers to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
   /// The call itself was malformed.
   User,
   /// The engine rejected the request.
   Engine,
   /// Local memory could not be allocated.
   Resource,
   /// A step was aborted by [`Connection::interrupt`](crate::Connection::interrupt).
   Interrupted,
}

/// A malformed call, detected before any native call is made.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UserError {
   #[error("connection is closed")]
   ConnectionClosed,

   #[error("statement has been finalized")]
   StatementFinalized,

   /// Another call path currently holds the handle.
   #[error("handle is in use by another call")]
   HandleBusy,

   #[error("statement has a pending row; reset it before binding")]
   StatementBusy,

   #[error("parameter index {index} out of range (statement has {count} parameters)")]
   IndexOutOfRange { index: u32, count: u32 },

   #[error("column index {index} out of range (statement has {count} columns)")]
   ColumnOutOfRange { index: u32, count: u32 },

   #[error("no row is available; step the statement first")]
   NoRowAvailable,

   #[error("parameter {index} is declared {expected} but was given a {found} value")]
   TypeMismatch {
      index: u32,
      expected: StorageClass,
      found: &'static str,
   },

   #[error("cannot bind a {0} value")]
   UnsupportedValue(&'static str),

   #[error("integer {0} does not fit in a signed 64-bit storage class")]
   IntegerOutOfRange(i128),

   #[error("row {row} has {found} values, statement expects {expected}")]
   ArityMismatch {
      row: usize,
      expected: usize,
      found: usize,
   },

   #[error("{found} type tags given, statement has {expected} parameters")]
   TypeTagCount { expected: usize, found: usize },

   #[error("argument contains an interior nul byte")]
   InteriorNul,

   #[error("value of {0} bytes exceeds the engine's length limit")]
   TooLarge(usize),

   #[error("SQL text contains no statement")]
   EmptyStatement,

   #[error("row {0} produced a result row; expected a data-modification statement")]
   UnexpectedRow(usize),
}

/// Errors returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Malformed call shape, index/arity mismatch or value shape mismatch.
   #[error("invalid call: {0}")]
   User(#[from] UserError),

   /// Native status code plus the connection's diagnostic text at the time of failure.
   #[error("sqlite error {code}: {message}")]
   Engine { code: i32, message: String },

   /// Local allocation failure. Never retried.
   #[error("allocation failed: {0}")]
   Resource(String),

   /// The running step was cancelled through `interrupt`.
   #[error("interrupted: {message}")]
   Interrupted { message: String },
}

impl From<TryReserveError> for Error {
   fn from(err: TryReserveError) -> Self {
      Error::Resource(err.to_string())
   }
}

impl Error {
   /// Builds an engine error with an explicit message, routing interrupts to their own variant.
   pub(crate) fn from_code(code: c_int, message: String) -> Self {
      if code & 0xff == SQLITE_INTERRUPT {
         Error::Interrupted { message }
      } else {
         Error::Engine { code, message }
      }
   }

   /// Builds an engine error using only the engine's generic text for `code`.
   ///
   /// Used when the owning connection is no longer reachable.
   pub(crate) fn from_errstr(code: c_int) -> Self {
      Self::from_code(code, errstr(code))
   }

   /// Translates `code` using the last-error state of `db`.
   ///
   /// # Safety
   ///
   /// `db` must be a valid, open connection pointer.
   pub(crate) unsafe fn from_db(code: c_int, db: *mut sqlite3) -> Self {
      // SAFETY: forwarded from the caller.
      let message = unsafe { errmsg_raw(db) }.unwrap_or_else(|| errstr(code));
      Self::from_code(code, message)
   }

   pub fn kind(&self) -> ErrorKind {
      match self {
         Error::User(_) => ErrorKind::User,
         Error::Engine { .. } => ErrorKind::Engine,
         Error::Resource(_) => ErrorKind::Resource,
         Error::Interrupted { .. } => ErrorKind::Interrupted,
      }
   }

   /// The native status code, when the failure came from the engine.
   pub fn code(&self) -> Option<i32> {
      match self {
         Error::Engine { code, .. } => Some(*code),
         Error::Interrupted { .. } => Some(SQLITE_INTERRUPT),
         _ => None,
      }
   }

   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for host-side error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::User(_) => "USER_ERROR".to_string(),
         Error::Engine { code, .. } => format!("SQLITE_{}", code),
         Error::Resource(_) => "RESOURCE_ERROR".to_string(),
         Error::Interrupted { .. } => "INTERRUPTED".to_string(),
      }
   }
}

/// Returns the engine's English description of a result code.
pub fn errstr(code: i32) -> String {
   // SAFETY: sqlite3_errstr accepts any value and returns a static string.
   let msg = unsafe { sqlite3_errstr(code) };
   if msg.is_null() {
      return format!("unknown error ({code})");
   }
   // SAFETY: non-null pointer to a static nul-terminated string.
   unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}

/// Reads the connection's current diagnostic text.
///
/// # Safety
///
/// `db` must be a valid, open connection pointer.
pub(crate) unsafe fn errmsg_raw(db: *mut sqlite3) -> Option<String> {
   // SAFETY: db is valid (guaranteed by caller). The returned buffer is owned
   // by the engine and only valid until the next call on this connection, so
   // it is copied immediately.
   let msg = unsafe { sqlite3_errmsg(db) };
   if msg.is_null() {
      return None;
   }
   Some(unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned())
}
