//! # sqlite-bridge-core
//!
//! Native layer binding an embedded SQLite engine to a garbage-collected host
//! runtime.
//!
//! The crate owns the lifecycle of native connection and statement handles,
//! converts host values ([`Term`]) to and from the engine's storage classes,
//! and drives the step-wise execution protocol.
//!
//! ## Handles
//!
//! [`Connection`] and [`Statement`] are reference-counted handles that may be
//! cloned and shared across threads. Each is released exactly once, either
//! by an explicit [`Connection::close`] / [`Statement::finalize`] or when the
//! last clone is dropped. Operations on a released handle return
//! [`UserError::ConnectionClosed`] or [`UserError::StatementFinalized`].
//!
//! ## Example
//!
//! ```no_run
//! use sqlite_bridge_core::{Connection, PrepareFlags, StorageClass, Term};
//!
//! # fn main() -> sqlite_bridge_core::Result<()> {
//! let conn = Connection::open_in_memory()?;
//! conn.execute_batch("CREATE TABLE users (id INTEGER, name TEXT)")?;
//!
//! let insert = conn.prepare("INSERT INTO users VALUES (?, ?)", PrepareFlags::default())?;
//! insert.insert_all(
//!    &[StorageClass::Integer, StorageClass::Text],
//!    &[vec![Term::from(1_i64), Term::from("alice")]],
//! )?;
//!
//! let select = conn.prepare("SELECT name FROM users", PrepareFlags::default())?;
//! let rows = select.fetch_all()?;
//! assert_eq!(rows[0][0].as_str(), Some("alice"));
//! # Ok(())
//! # }
//! ```

mod batch;
mod bind;
mod connection;
mod error;
mod statement;
mod step;
mod value;

use std::ffi::CStr;

use libsqlite3_sys::{sqlite3_libversion, sqlite3_memory_used};

pub use connection::{Connection, OpenFlags};
pub use error::{Error, ErrorKind, Result, UserError, errstr};
pub use statement::{ExecState, PrepareFlags, Statement};
pub use step::{MultiStep, Step};
pub use value::{
   BinaryAs, BindValue, Cell, Row, StorageClass, Term, coerce_to_class, infer_param_class,
};

/// Bytes currently allocated by the engine, across every connection in the process.
pub fn memory_used() -> i64 {
   // SAFETY: sqlite3_memory_used takes no arguments and is thread-safe.
   unsafe { sqlite3_memory_used() }
}

/// Version string of the linked engine, e.g. `"3.46.0"`.
pub fn sqlite_version() -> &'static str {
   // SAFETY: sqlite3_libversion returns a pointer to a static nul-terminated string.
   unsafe { CStr::from_ptr(sqlite3_libversion()) }
      .to_str()
      .unwrap_or("unknown")
}
