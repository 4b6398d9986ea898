//! Connection handles.
//!
//! A [`Connection`] is a cheaply cloneable reference to one native database
//! handle. The host may hold any number of clones; the native handle is
//! released either by an explicit [`Connection::close`] or, as a safety net,
//! when the last clone is dropped. Both paths go through an exclusive
//! take-and-clear of the owned pointer, so the handle is released exactly once.

use std::ffi::{CStr, CString, c_int};
use std::fmt;
use std::ops::BitOr;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use libsqlite3_sys::{
   SQLITE_OK, SQLITE_OPEN_CREATE, SQLITE_OPEN_FULLMUTEX, SQLITE_OPEN_MEMORY, SQLITE_OPEN_NOMUTEX,
   SQLITE_OPEN_PRIVATECACHE, SQLITE_OPEN_READONLY, SQLITE_OPEN_READWRITE,
   SQLITE_OPEN_SHAREDCACHE, SQLITE_OPEN_URI, sqlite3, sqlite3_changes64, sqlite3_db_filename,
   sqlite3_enable_load_extension, sqlite3_exec, sqlite3_extended_result_codes,
   sqlite3_get_autocommit, sqlite3_interrupt, sqlite3_last_insert_rowid, sqlite3_open_v2,
   sqlite3_total_changes64,
};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result, UserError, errmsg_raw};
use crate::statement::{PrepareFlags, Statement};

/// Flags passed to `sqlite3_open_v2`.
///
/// The threading-mode bits are managed by [`Connection::open`]: connections
/// are always opened in serialized mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenFlags(c_int);

impl OpenFlags {
   pub const READ_ONLY: Self = Self(SQLITE_OPEN_READONLY);
   pub const READ_WRITE: Self = Self(SQLITE_OPEN_READWRITE);
   pub const CREATE: Self = Self(SQLITE_OPEN_CREATE);
   pub const URI: Self = Self(SQLITE_OPEN_URI);
   pub const MEMORY: Self = Self(SQLITE_OPEN_MEMORY);
   pub const SHARED_CACHE: Self = Self(SQLITE_OPEN_SHAREDCACHE);
   pub const PRIVATE_CACHE: Self = Self(SQLITE_OPEN_PRIVATECACHE);

   pub const fn empty() -> Self {
      Self(0)
   }

   pub const fn from_bits(bits: i32) -> Self {
      Self(bits)
   }

   pub const fn bits(self) -> i32 {
      self.0
   }

   pub const fn contains(self, other: Self) -> bool {
      self.0 & other.0 == other.0
   }

   fn serialized(self) -> Self {
      Self((self.0 & !SQLITE_OPEN_NOMUTEX) | SQLITE_OPEN_FULLMUTEX)
   }
}

impl Default for OpenFlags {
   fn default() -> Self {
      Self::READ_WRITE | Self::CREATE
   }
}

impl BitOr for OpenFlags {
   type Output = Self;

   fn bitor(self, rhs: Self) -> Self {
      Self(self.0 | rhs.0)
   }
}

// Missing from libsqlite3-sys' generated bindings; the bundled engine exports it.
// SAFETY: matches `int sqlite3_close_v2(sqlite3*)` in sqlite3.h.
unsafe extern "C" {
   fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;
}

/// Owned native database pointer. Dropping it closes the handle.
pub(crate) struct RawDb(NonNull<sqlite3>);

// SAFETY: connections are always opened in serialized mode, so the handle may
// be used from any thread.
unsafe impl Send for RawDb {}

impl RawDb {
   pub(crate) fn as_ptr(&self) -> *mut sqlite3 {
      self.0.as_ptr()
   }

   /// Closes the handle, returning the engine's status code.
   fn close(self) -> c_int {
      let db = self.as_ptr();
      std::mem::forget(self);
      // SAFETY: db came from a successful sqlite3_open_v2 and ownership was
      // just taken out of the guard, so this is the only release.
      unsafe { sqlite3_close_v2(db) }
   }
}

impl Drop for RawDb {
   fn drop(&mut self) {
      // SAFETY: the guard is dropped exactly once; close_v2 defers the actual
      // release while statements are still outstanding.
      let rc = unsafe { sqlite3_close_v2(self.as_ptr()) };
      if rc != SQLITE_OK {
         warn!(rc, "sqlite3_close_v2 failed while releasing a dropped connection");
      } else {
         trace!("Released native connection from destructor");
      }
   }
}

/// Target of [`Connection::interrupt`]; null once the connection is closed.
struct InterruptTarget(*mut sqlite3);

// SAFETY: sqlite3_interrupt is documented as safe to call from any thread,
// and the pointer is cleared under the lock before the handle is released.
unsafe impl Send for InterruptTarget {}

pub(crate) struct ConnectionInner {
   db: Mutex<Option<RawDb>>,
   interrupt: Mutex<InterruptTarget>,
   open: AtomicBool,
   filename: String,
}

impl ConnectionInner {
   pub(crate) fn is_open(&self) -> bool {
      self.open.load(Ordering::Acquire)
   }

   /// Runs `f` with the live native handle, or fails if the connection is closed.
   pub(crate) fn with_db<T>(&self, f: impl FnOnce(*mut sqlite3) -> Result<T>) -> Result<T> {
      let guard = self.db.lock();
      let raw = guard.as_ref().ok_or(UserError::ConnectionClosed)?;
      f(raw.as_ptr())
   }
}

/// Handle to one open database.
#[derive(Clone)]
pub struct Connection {
   pub(crate) inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Connection")
         .field("filename", &self.inner.filename)
         .field("open", &self.inner.is_open())
         .finish()
   }
}

impl Connection {
   /// Opens the database at `path`.
   ///
   /// Use `":memory:"` for a private in-memory database. The connection is
   /// always opened in serialized threading mode, whatever `flags` say.
   ///
   /// # Errors
   ///
   /// Returns a user error for paths containing a nul byte, an engine error
   /// when the engine refuses to open the file, and a resource error if the
   /// wrapper state cannot be allocated. In every error case any native handle
   /// the engine produced has already been released.
   pub fn open(path: impl AsRef<Path>, flags: OpenFlags) -> Result<Self> {
      let path = path.as_ref();
      let c_path = CString::new(path.as_os_str().as_encoded_bytes())
         .map_err(|_| UserError::InteriorNul)?;
      let flags = flags.serialized();

      let mut db = ptr::null_mut();
      // SAFETY: c_path is a valid nul-terminated string and db is a valid out-pointer.
      let rc = unsafe { sqlite3_open_v2(c_path.as_ptr(), &mut db, flags.bits(), ptr::null()) };

      // The engine usually hands back a handle even when opening fails. Adopt
      // it immediately so every return path below releases it.
      let raw = NonNull::new(db).map(RawDb);

      if rc != SQLITE_OK {
         let err = match &raw {
            // SAFETY: raw holds the handle returned alongside the failure.
            Some(raw) => unsafe { Error::from_db(rc, raw.as_ptr()) },
            None => Error::from_errstr(rc),
         };
         debug!(path = %path.display(), rc, "Failed to open database");
         return Err(err);
      }

      let raw = raw.ok_or_else(|| Error::Resource("engine returned no connection handle".into()))?;
      // SAFETY: raw is a freshly opened, valid handle.
      unsafe { sqlite3_extended_result_codes(raw.as_ptr(), 1) };
      // SAFETY: raw is a freshly opened, valid handle.
      let filename = unsafe { main_filename(raw.as_ptr()) }?;

      debug!(path = %path.display(), flags = flags.bits(), "Opened database");

      let interrupt = InterruptTarget(raw.as_ptr());
      Ok(Self {
         inner: Arc::new(ConnectionInner {
            db: Mutex::new(Some(raw)),
            interrupt: Mutex::new(interrupt),
            open: AtomicBool::new(true),
            filename,
         }),
      })
   }

   /// Opens a private in-memory database.
   pub fn open_in_memory() -> Result<Self> {
      Self::open(":memory:", OpenFlags::default())
   }

   /// Closes the connection.
   ///
   /// Closing an already closed connection is a no-op. If a transaction is
   /// open it is rolled back first; when that rollback fails the error is
   /// returned and the connection stays open, rather than leaving a write
   /// lock held on the file.
   ///
   /// Statements prepared on this connection may still be alive; the native
   /// handle is then released once the last of them is finalized.
   pub fn close(&self) -> Result<()> {
      let Some(mut guard) = self.inner.db.try_lock() else {
         return Err(UserError::HandleBusy.into());
      };

      let Some(raw) = guard.as_ref() else {
         return Ok(());
      };
      let db = raw.as_ptr();

      // SAFETY: db is open while the guard is held.
      if unsafe { sqlite3_get_autocommit(db) } == 0 {
         debug!(filename = %self.inner.filename, "Rolling back open transaction before close");
         // SAFETY: db is open, the SQL is a static nul-terminated string and
         // no callback or error out-pointer is passed.
         let rc = unsafe {
            sqlite3_exec(db, c"ROLLBACK".as_ptr(), None, ptr::null_mut(), ptr::null_mut())
         };
         if rc != SQLITE_OK {
            // SAFETY: db is still open.
            return Err(unsafe { Error::from_db(rc, db) });
         }
      }

      self.inner.open.store(false, Ordering::Release);
      self.inner.interrupt.lock().0 = ptr::null_mut();

      if let Some(raw) = guard.take() {
         let rc = raw.close();
         if rc != SQLITE_OK {
            return Err(Error::from_errstr(rc));
         }
      }

      debug!(filename = %self.inner.filename, "Closed database");
      Ok(())
   }

   pub fn is_closed(&self) -> bool {
      !self.inner.is_open()
   }

   /// Path of the main database file, empty for in-memory databases.
   pub fn filename(&self) -> &str {
      &self.inner.filename
   }

   /// Compiles the first statement in `sql`.
   pub fn prepare(&self, sql: impl AsRef<[u8]>, flags: PrepareFlags) -> Result<Statement> {
      Statement::prepare(self, sql, flags)
   }

   /// Runs one or more `;`-separated statements that return no rows.
   pub fn execute_batch(&self, sql: &str) -> Result<()> {
      let sql = CString::new(sql).map_err(|_| UserError::InteriorNul)?;
      self.inner.with_db(|db| {
         // SAFETY: db is open while with_db holds the lock; sql is nul-terminated.
         let rc = unsafe { sqlite3_exec(db, sql.as_ptr(), None, ptr::null_mut(), ptr::null_mut()) };
         if rc != SQLITE_OK {
            return Err(unsafe { Error::from_db(rc, db) });
         }
         Ok(())
      })
   }

   /// Asks any step running on this connection to stop at its next checkpoint.
   ///
   /// Safe to call from another thread while a step is in flight; the step
   /// then fails with [`Error::Interrupted`]. A no-op on a closed connection.
   pub fn interrupt(&self) {
      let target = self.inner.interrupt.lock();
      if !target.0.is_null() {
         trace!(filename = %self.inner.filename, "Interrupting connection");
         // SAFETY: the pointer is cleared under this lock before the handle is
         // closed, so it is live here.
         unsafe { sqlite3_interrupt(target.0) };
      }
   }

   /// Allows or forbids loading extensions through the SQL `load_extension()` function.
   ///
   /// Disabled on every newly opened connection.
   pub fn enable_load_extension(&self, enabled: bool) -> Result<()> {
      self.inner.with_db(|db| {
         // SAFETY: db is open inside with_db.
         let rc = unsafe { sqlite3_enable_load_extension(db, c_int::from(enabled)) };
         if rc != SQLITE_OK {
            return Err(unsafe { Error::from_db(rc, db) });
         }
         trace!(filename = %self.inner.filename, enabled, "Set extension loading");
         Ok(())
      })
   }

   /// Whether the connection is in autocommit mode (no explicit transaction open).
   pub fn get_autocommit(&self) -> Result<bool> {
      // SAFETY: db is open inside with_db.
      self.inner.with_db(|db| Ok(unsafe { sqlite3_get_autocommit(db) } != 0))
   }

   /// Rows modified by the most recent INSERT, UPDATE or DELETE.
   pub fn changes(&self) -> Result<i64> {
      // SAFETY: db is open inside with_db.
      self.inner.with_db(|db| Ok(unsafe { sqlite3_changes64(db) }))
   }

   /// Rows modified since the connection was opened.
   pub fn total_changes(&self) -> Result<i64> {
      // SAFETY: db is open inside with_db.
      self.inner.with_db(|db| Ok(unsafe { sqlite3_total_changes64(db) }))
   }

   pub fn last_insert_rowid(&self) -> Result<i64> {
      // SAFETY: db is open inside with_db.
      self.inner.with_db(|db| Ok(unsafe { sqlite3_last_insert_rowid(db) }))
   }

   /// The connection's current diagnostic text, or `None` once closed.
   pub fn errmsg(&self) -> Option<String> {
      let guard = self.inner.db.lock();
      // SAFETY: the handle is open while the guard is held.
      guard.as_ref().and_then(|raw| unsafe { errmsg_raw(raw.as_ptr()) })
   }
}

/// Copies the main database filename into wrapper-owned memory.
///
/// # Safety
///
/// `db` must be a valid, open connection pointer.
unsafe fn main_filename(db: *mut sqlite3) -> Result<String> {
   // SAFETY: db is valid; "main" is a static nul-terminated schema name.
   let ptr = unsafe { sqlite3_db_filename(db, c"main".as_ptr()) };
   if ptr.is_null() {
      return Ok(String::new());
   }
   // SAFETY: non-null, nul-terminated and owned by the open connection.
   let name = unsafe { CStr::from_ptr(ptr) }.to_string_lossy();
   let mut filename = String::new();
   filename.try_reserve_exact(name.len())?;
   filename.push_str(&name);
   Ok(filename)
}
