//! Parameter binding.
//!
//! Parameter indices are 1-based, as in the engine. Every index and value is
//! validated before the native binder is called.

use std::ffi::{CStr, CString, c_int};

use libsqlite3_sys::{
   SQLITE_OK, SQLITE_TRANSIENT, sqlite3_bind_blob, sqlite3_bind_double, sqlite3_bind_int,
   sqlite3_bind_int64, sqlite3_bind_null, sqlite3_bind_parameter_index,
   sqlite3_bind_parameter_name, sqlite3_bind_text, sqlite3_clear_bindings, sqlite3_stmt,
};

use crate::error::{Error, Result, UserError};
use crate::statement::{ExecState, Statement, StmtSlot};
use crate::value::{BinaryAs, BindValue, Term, infer_param_class};

impl Statement {
   /// Binds `value` to parameter `index`, inferring its storage class.
   ///
   /// Binaries are stored as TEXT; use [`bind_with`](Self::bind_with) to
   /// store them as BLOB.
   pub fn bind(&self, index: u32, value: &Term) -> Result<()> {
      self.bind_with(index, value, BinaryAs::Text)
   }

   /// Binds `value` to parameter `index`, storing binaries as `binary` says.
   pub fn bind_with(&self, index: u32, value: &Term, binary: BinaryAs) -> Result<()> {
      let value = infer_param_class(value, binary)?;
      self.bind_value(index, value)
   }

   pub fn bind_text(&self, index: u32, text: impl AsRef<[u8]>) -> Result<()> {
      self.bind_value(index, BindValue::Text(text.as_ref()))
   }

   pub fn bind_blob(&self, index: u32, blob: impl AsRef<[u8]>) -> Result<()> {
      self.bind_value(index, BindValue::Blob(blob.as_ref()))
   }

   /// Binds an integer, using the narrow binder when it fits in 32 bits.
   pub fn bind_integer(&self, index: u32, value: i64) -> Result<()> {
      let value = match i32::try_from(value) {
         Ok(narrow) => BindValue::Int(narrow),
         Err(_) => BindValue::Int64(value),
      };
      self.bind_value(index, value)
   }

   pub fn bind_float(&self, index: u32, value: f64) -> Result<()> {
      self.bind_value(index, BindValue::Float(value))
   }

   pub fn bind_null(&self, index: u32) -> Result<()> {
      self.bind_value(index, BindValue::Null)
   }

   /// Binds an already marshaled value to parameter `index`.
   pub fn bind_value(&self, index: u32, value: BindValue<'_>) -> Result<()> {
      let count = self.parameter_count();
      if index == 0 || index > count {
         return Err(UserError::IndexOutOfRange { index, count }.into());
      }
      check_length(&value)?;

      self.with_slot(|slot, db| {
         check_not_running(slot)?;
         // SAFETY: index is within 1..=parameter_count and the value length
         // fits in a c_int; both locks are held.
         let rc = unsafe { bind_raw(slot.raw.as_ptr(), index as c_int, value) };
         if rc != SQLITE_OK {
            // SAFETY: db is open while the connection lock is held.
            return Err(unsafe { Error::from_db(rc, db) });
         }
         Ok(())
      })
   }

   /// Binds `values` to parameters `1..=values.len()` in order.
   ///
   /// Every value is checked before the first native bind, so a rejected
   /// call leaves the existing bindings untouched. Parameters past the end
   /// of `values` keep their current binding.
   pub fn bind_all(&self, values: &[BindValue<'_>]) -> Result<()> {
      let count = self.parameter_count();
      if values.len() > usize::try_from(count).unwrap_or(usize::MAX) {
         let index = u32::try_from(values.len()).unwrap_or(u32::MAX);
         return Err(UserError::IndexOutOfRange { index, count }.into());
      }
      for value in values {
         check_length(value)?;
      }

      self.with_slot(|slot, db| {
         check_not_running(slot)?;
         let stmt = slot.raw.as_ptr();
         for (position, value) in values.iter().enumerate() {
            // SAFETY: position < parameter_count and lengths were checked.
            let rc = unsafe { bind_raw(stmt, (position + 1) as c_int, *value) };
            if rc != SQLITE_OK {
               return Err(unsafe { Error::from_db(rc, db) });
            }
         }
         Ok(())
      })
   }

   /// Number of parameters the statement declares.
   pub fn bind_parameter_count(&self) -> Result<u32> {
      self.with_slot(|_, _| Ok(self.parameter_count()))
   }

   /// Index of the parameter called `name` (including its `:`, `@` or `$`
   /// prefix), or 0 when there is none.
   pub fn bind_parameter_index(&self, name: &str) -> Result<u32> {
      let name = CString::new(name).map_err(|_| UserError::InteriorNul)?;
      self.with_slot(|slot, _| {
         // SAFETY: the statement is live and name is nul-terminated.
         let index = unsafe { sqlite3_bind_parameter_index(slot.raw.as_ptr(), name.as_ptr()) };
         Ok(u32::try_from(index).unwrap_or(0))
      })
   }

   /// Name of parameter `index`, or `None` for anonymous (`?`) parameters.
   pub fn bind_parameter_name(&self, index: u32) -> Result<Option<String>> {
      let count = self.parameter_count();
      if index == 0 || index > count {
         return Err(UserError::IndexOutOfRange { index, count }.into());
      }
      self.with_slot(|slot, _| {
         // SAFETY: the statement is live and index is in range.
         let ptr = unsafe { sqlite3_bind_parameter_name(slot.raw.as_ptr(), index as c_int) };
         if ptr.is_null() {
            return Ok(None);
         }
         Ok(Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()))
      })
   }

   /// Resets every parameter to null.
   pub fn clear_bindings(&self) -> Result<()> {
      self.with_slot(|slot, db| {
         // SAFETY: the statement is live.
         let rc = unsafe { sqlite3_clear_bindings(slot.raw.as_ptr()) };
         if rc != SQLITE_OK {
            return Err(unsafe { Error::from_db(rc, db) });
         }
         Ok(())
      })
   }
}

/// The engine refuses new bindings while a row is pending.
fn check_not_running(slot: &StmtSlot) -> Result<()> {
   if slot.state == ExecState::RowAvailable {
      return Err(UserError::StatementBusy.into());
   }
   Ok(())
}

pub(crate) fn check_length(value: &BindValue<'_>) -> Result<()> {
   match value {
      BindValue::Text(bytes) | BindValue::Blob(bytes) if c_int::try_from(bytes.len()).is_err() => {
         Err(UserError::TooLarge(bytes.len()).into())
      }
      _ => Ok(()),
   }
}

/// Calls the native binder matching `value`'s storage class.
///
/// Text and blob contents are copied by the engine.
///
/// # Safety
///
/// `stmt` must be a live statement, `index` a valid parameter index and any
/// text/blob length must fit in a `c_int`.
pub(crate) unsafe fn bind_raw(
   stmt: *mut sqlite3_stmt,
   index: c_int,
   value: BindValue<'_>,
) -> c_int {
   // SAFETY: forwarded from the caller. SQLITE_TRANSIENT makes the engine
   // take its own copy, so the borrowed slices need not outlive the call.
   unsafe {
      match value {
         BindValue::Null => sqlite3_bind_null(stmt, index),
         BindValue::Int(v) => sqlite3_bind_int(stmt, index, v),
         BindValue::Int64(v) => sqlite3_bind_int64(stmt, index, v),
         BindValue::Float(v) => sqlite3_bind_double(stmt, index, v),
         BindValue::Text(bytes) => sqlite3_bind_text(
            stmt,
            index,
            bytes.as_ptr().cast(),
            bytes.len() as c_int,
            SQLITE_TRANSIENT(),
         ),
         BindValue::Blob(bytes) => sqlite3_bind_blob(
            stmt,
            index,
            bytes.as_ptr().cast(),
            bytes.len() as c_int,
            SQLITE_TRANSIENT(),
         ),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::connection::Connection;
   use crate::statement::PrepareFlags;
   use crate::step::Step;
   use crate::value::Cell;

   fn select_one(conn: &Connection, sql: &str) -> Statement {
      conn.prepare(sql, PrepareFlags::default()).unwrap()
   }

   #[test]
   fn test_index_out_of_range_is_user_error() {
      let conn = Connection::open_in_memory().unwrap();
      let stmt = select_one(&conn, "SELECT ?1");

      for index in [0, 2] {
         let err = stmt.bind_integer(index, 1).unwrap_err();
         assert!(matches!(
            err,
            Error::User(UserError::IndexOutOfRange { count: 1, .. })
         ));
      }
   }

   #[test]
   fn test_unsupported_value_is_user_error() {
      let conn = Connection::open_in_memory().unwrap();
      let stmt = select_one(&conn, "SELECT ?");
      let err = stmt.bind(1, &Term::Atom("ok".into())).unwrap_err();
      assert!(matches!(err, Error::User(UserError::UnsupportedValue("atom"))));
   }

   #[test]
   fn test_named_parameters() {
      let conn = Connection::open_in_memory().unwrap();
      let stmt = select_one(&conn, "SELECT :a, ?, @b");

      assert_eq!(stmt.bind_parameter_count().unwrap(), 3);
      assert_eq!(stmt.bind_parameter_index(":a").unwrap(), 1);
      assert_eq!(stmt.bind_parameter_index("@b").unwrap(), 3);
      assert_eq!(stmt.bind_parameter_index(":missing").unwrap(), 0);
      assert_eq!(stmt.bind_parameter_name(1).unwrap().as_deref(), Some(":a"));
      assert_eq!(stmt.bind_parameter_name(2).unwrap(), None);
   }

   #[test]
   fn test_binary_class_follows_call_site() {
      let conn = Connection::open_in_memory().unwrap();
      let stmt = select_one(&conn, "SELECT ?, ?");
      let term = Term::from("xy");
      stmt.bind(1, &term).unwrap();
      stmt.bind_with(2, &term, BinaryAs::Blob).unwrap();

      let Step::Row(row) = stmt.step().unwrap() else {
         panic!("expected a row");
      };
      assert_eq!(row, vec![Cell::Text(b"xy".to_vec()), Cell::Blob(b"xy".to_vec())]);
   }

   #[test]
   fn test_clear_bindings_resets_to_null() {
      let conn = Connection::open_in_memory().unwrap();
      let stmt = select_one(&conn, "SELECT ?");
      stmt.bind_float(1, 2.5).unwrap();
      stmt.clear_bindings().unwrap();

      let Step::Row(row) = stmt.step().unwrap() else {
         panic!("expected a row");
      };
      assert_eq!(row, vec![Cell::Null]);
   }

   #[test]
   fn test_bind_while_row_pending_is_user_error() {
      let conn = Connection::open_in_memory().unwrap();
      let stmt = select_one(&conn, "SELECT ?");
      stmt.bind_integer(1, 1).unwrap();
      assert!(matches!(stmt.step().unwrap(), Step::Row(_)));

      let err = stmt.bind_integer(1, 2).unwrap_err();
      assert!(matches!(err, Error::User(UserError::StatementBusy)));
      assert!(matches!(
         stmt.bind_all(&[BindValue::Int(2)]),
         Err(Error::User(UserError::StatementBusy))
      ));

      stmt.reset().unwrap();
      stmt.bind_integer(1, 2).unwrap();
      assert_eq!(stmt.step().unwrap(), Step::Row(vec![Cell::Integer(2)]));
   }

   #[test]
   fn test_bind_all_rejects_without_touching_bindings() {
      let conn = Connection::open_in_memory().unwrap();
      let stmt = select_one(&conn, "SELECT ?, ?");
      stmt.bind_all(&[BindValue::Int(1), BindValue::Text(b"a")]).unwrap();
      assert_eq!(stmt.expanded_sql().unwrap(), "SELECT 1, 'a'");

      let err = stmt
         .bind_all(&[BindValue::Int(5), BindValue::Int(6), BindValue::Int(7)])
         .unwrap_err();
      assert!(matches!(
         err,
         Error::User(UserError::IndexOutOfRange { index: 3, count: 2 })
      ));
      assert_eq!(stmt.expanded_sql().unwrap(), "SELECT 1, 'a'");

      stmt.bind_all(&[BindValue::Null]).unwrap();
      assert_eq!(stmt.expanded_sql().unwrap(), "SELECT NULL, 'a'");
   }
}
