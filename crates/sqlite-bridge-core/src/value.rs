//! Marshaling between host terms and SQLite storage classes.
//!
//! Host values arrive as [`Term`]s. Before a native bind they are turned into
//! a borrowed [`BindValue`], either by inference ([`infer_param_class`]) or by
//! coercion against a declared class ([`coerce_to_class`]). Results come back
//! as owned [`Cell`]s copied out of engine memory.

use std::ffi::c_int;
use std::fmt;

use libsqlite3_sys::{
   SQLITE_BLOB, SQLITE_FLOAT, SQLITE_INTEGER, SQLITE_NULL, SQLITE_TEXT, sqlite3_column_blob,
   sqlite3_column_bytes, sqlite3_column_double, sqlite3_column_int64, sqlite3_column_text,
   sqlite3_column_type, sqlite3_stmt,
};

use crate::error::{Result, UserError};

/// The engine's dynamic value-type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
   Integer,
   Float,
   Text,
   Blob,
   Null,
}

impl StorageClass {
   /// The engine's numeric code for this class (`SQLITE_INTEGER` and friends).
   pub fn code(self) -> i32 {
      match self {
         StorageClass::Integer => SQLITE_INTEGER,
         StorageClass::Float => SQLITE_FLOAT,
         StorageClass::Text => SQLITE_TEXT,
         StorageClass::Blob => SQLITE_BLOB,
         StorageClass::Null => SQLITE_NULL,
      }
   }

   /// Maps an engine type code back to a class. Unknown codes yield `None`.
   pub fn from_code(code: i32) -> Option<Self> {
      match code {
         SQLITE_INTEGER => Some(StorageClass::Integer),
         SQLITE_FLOAT => Some(StorageClass::Float),
         SQLITE_TEXT => Some(StorageClass::Text),
         SQLITE_BLOB => Some(StorageClass::Blob),
         SQLITE_NULL => Some(StorageClass::Null),
         _ => None,
      }
   }
}

impl fmt::Display for StorageClass {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let name = match self {
         StorageClass::Integer => "INTEGER",
         StorageClass::Float => "FLOAT",
         StorageClass::Text => "TEXT",
         StorageClass::Blob => "BLOB",
         StorageClass::Null => "NULL",
      };
      f.write_str(name)
   }
}

/// A host runtime value as seen by this layer.
///
/// Host integers are unbounded, so `Integer` carries an `i128`; anything
/// outside the 64-bit range is rejected at bind time.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
   Nil,
   Integer(i128),
   Float(f64),
   Binary(Vec<u8>),
   Atom(String),
   List(Vec<Term>),
}

impl Term {
   /// Short name of the value's shape, used in error messages.
   pub fn shape(&self) -> &'static str {
      match self {
         Term::Nil => "nil",
         Term::Integer(_) => "integer",
         Term::Float(_) => "float",
         Term::Binary(_) => "binary",
         Term::Atom(_) => "atom",
         Term::List(_) => "list",
      }
   }

   pub fn is_nil(&self) -> bool {
      matches!(self, Term::Nil)
   }
}

impl From<i32> for Term {
   fn from(v: i32) -> Self {
      Term::Integer(v.into())
   }
}

impl From<i64> for Term {
   fn from(v: i64) -> Self {
      Term::Integer(v.into())
   }
}

impl From<i128> for Term {
   fn from(v: i128) -> Self {
      Term::Integer(v)
   }
}

impl From<f64> for Term {
   fn from(v: f64) -> Self {
      Term::Float(v)
   }
}

impl From<&str> for Term {
   fn from(v: &str) -> Self {
      Term::Binary(v.as_bytes().to_vec())
   }
}

impl From<String> for Term {
   fn from(v: String) -> Self {
      Term::Binary(v.into_bytes())
   }
}

impl From<Vec<u8>> for Term {
   fn from(v: Vec<u8>) -> Self {
      Term::Binary(v)
   }
}

impl From<&[u8]> for Term {
   fn from(v: &[u8]) -> Self {
      Term::Binary(v.to_vec())
   }
}

impl<T: Into<Term>> From<Option<T>> for Term {
   fn from(v: Option<T>) -> Self {
      v.map_or(Term::Nil, Into::into)
   }
}

/// One typed value read from a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
   Integer(i64),
   Float(f64),
   Text(Vec<u8>),
   Blob(Vec<u8>),
   Null,
}

/// Ordered cells from one step result.
pub type Row = Vec<Cell>;

impl Cell {
   pub fn storage_class(&self) -> StorageClass {
      match self {
         Cell::Integer(_) => StorageClass::Integer,
         Cell::Float(_) => StorageClass::Float,
         Cell::Text(_) => StorageClass::Text,
         Cell::Blob(_) => StorageClass::Blob,
         Cell::Null => StorageClass::Null,
      }
   }

   pub fn is_null(&self) -> bool {
      matches!(self, Cell::Null)
   }

   pub fn as_i64(&self) -> Option<i64> {
      match self {
         Cell::Integer(v) => Some(*v),
         _ => None,
      }
   }

   pub fn as_f64(&self) -> Option<f64> {
      match self {
         Cell::Float(v) => Some(*v),
         _ => None,
      }
   }

   /// Raw bytes of a text or blob cell.
   pub fn as_bytes(&self) -> Option<&[u8]> {
      match self {
         Cell::Text(b) | Cell::Blob(b) => Some(b),
         _ => None,
      }
   }

   /// Text content, if this is a text cell holding valid UTF-8.
   pub fn as_str(&self) -> Option<&str> {
      match self {
         Cell::Text(b) => std::str::from_utf8(b).ok(),
         _ => None,
      }
   }
}

impl From<Cell> for Term {
   fn from(cell: Cell) -> Self {
      match cell {
         Cell::Integer(v) => Term::Integer(v.into()),
         Cell::Float(v) => Term::Float(v),
         Cell::Text(b) | Cell::Blob(b) => Term::Binary(b),
         Cell::Null => Term::Nil,
      }
   }
}

/// How a host binary is stored when no class is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryAs {
   #[default]
   Text,
   Blob,
}

/// A value ready for a native bind call, borrowing from its [`Term`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BindValue<'a> {
   Null,
   /// Fits the engine's narrow (32-bit) integer binder.
   Int(i32),
   Int64(i64),
   Float(f64),
   Text(&'a [u8]),
   Blob(&'a [u8]),
}

impl BindValue<'_> {
   pub fn storage_class(&self) -> StorageClass {
      match self {
         BindValue::Null => StorageClass::Null,
         BindValue::Int(_) | BindValue::Int64(_) => StorageClass::Integer,
         BindValue::Float(_) => StorageClass::Float,
         BindValue::Text(_) => StorageClass::Text,
         BindValue::Blob(_) => StorageClass::Blob,
      }
   }
}

fn integer_value<'a>(v: i128) -> std::result::Result<BindValue<'a>, UserError> {
   if let Ok(narrow) = i32::try_from(v) {
      Ok(BindValue::Int(narrow))
   } else if let Ok(wide) = i64::try_from(v) {
      Ok(BindValue::Int64(wide))
   } else {
      Err(UserError::IntegerOutOfRange(v))
   }
}

/// Picks the storage class for a host value when none was declared.
///
/// Trial order is fixed: 32-bit integer, 64-bit integer, float, binary (as
/// text or blob per `binary`). Nil binds null. Anything else is rejected.
/// The order decides the storage class a numeric value round-trips with.
pub fn infer_param_class(
   value: &Term,
   binary: BinaryAs,
) -> std::result::Result<BindValue<'_>, UserError> {
   match value {
      Term::Nil => Ok(BindValue::Null),
      Term::Integer(v) => integer_value(*v),
      Term::Float(v) => Ok(BindValue::Float(*v)),
      Term::Binary(bytes) => Ok(match binary {
         BinaryAs::Text => BindValue::Text(bytes),
         BinaryAs::Blob => BindValue::Blob(bytes),
      }),
      other => Err(UserError::UnsupportedValue(other.shape())),
   }
}

/// Coerces a host value to a class declared in advance by the batch path.
///
/// Nil bypasses the declared class and binds null. A value whose shape does
/// not match the class is a [`UserError::TypeMismatch`].
pub fn coerce_to_class(
   value: &Term,
   class: StorageClass,
   index: u32,
) -> std::result::Result<BindValue<'_>, UserError> {
   let mismatch = || UserError::TypeMismatch {
      index,
      expected: class,
      found: value.shape(),
   };

   match (class, value) {
      (_, Term::Nil) => Ok(BindValue::Null),
      (StorageClass::Integer, Term::Integer(v)) => integer_value(*v),
      (StorageClass::Float, Term::Float(v)) => Ok(BindValue::Float(*v)),
      (StorageClass::Text, Term::Binary(bytes)) => Ok(BindValue::Text(bytes)),
      (StorageClass::Blob, Term::Binary(bytes)) => Ok(BindValue::Blob(bytes)),
      _ => Err(mismatch()),
   }
}

/// Copies column `index` of the current row out of engine memory.
///
/// Text and blob buffers may be invalidated by the next step, so bytes are
/// always copied.
///
/// # Safety
///
/// `stmt` must be a valid statement positioned on a row and `index` must be
/// below its column count.
pub(crate) unsafe fn cell_from_column(stmt: *mut sqlite3_stmt, index: c_int) -> Cell {
   // SAFETY: stmt is valid and on a row (guaranteed by caller).
   match unsafe { sqlite3_column_type(stmt, index) } {
      SQLITE_INTEGER => Cell::Integer(unsafe { sqlite3_column_int64(stmt, index) }),
      SQLITE_FLOAT => Cell::Float(unsafe { sqlite3_column_double(stmt, index) }),
      SQLITE_TEXT => {
         // column_text must be called before column_bytes so the length
         // describes the UTF-8 form.
         let ptr = unsafe { sqlite3_column_text(stmt, index) };
         let len = unsafe { sqlite3_column_bytes(stmt, index) };
         Cell::Text(unsafe { copy_bytes(ptr, len) })
      }
      SQLITE_BLOB => {
         let ptr = unsafe { sqlite3_column_blob(stmt, index) };
         let len = unsafe { sqlite3_column_bytes(stmt, index) };
         Cell::Blob(unsafe { copy_bytes(ptr.cast(), len) })
      }
      _ => Cell::Null,
   }
}

/// Builds a row of `column_count` cells from the current result.
///
/// # Safety
///
/// Same requirements as [`cell_from_column`], for every index below `column_count`.
pub(crate) unsafe fn row_from_stmt(stmt: *mut sqlite3_stmt, column_count: c_int) -> Result<Row> {
   let width = usize::try_from(column_count).unwrap_or(0);
   let mut row = Vec::new();
   row.try_reserve_exact(width)?;
   for index in 0..column_count {
      // SAFETY: index < column_count, forwarded from the caller.
      row.push(unsafe { cell_from_column(stmt, index) });
   }
   Ok(row)
}

/// # Safety
///
/// `ptr` must be null or point to at least `len` readable bytes.
unsafe fn copy_bytes(ptr: *const u8, len: c_int) -> Vec<u8> {
   let len = usize::try_from(len).unwrap_or(0);
   if ptr.is_null() || len == 0 {
      return Vec::new();
   }
   // SAFETY: ptr is non-null and valid for len bytes (guaranteed by caller).
   unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec()
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_infer_prefers_narrow_integer() {
      assert_eq!(
         infer_param_class(&Term::from(42_i64), BinaryAs::Text),
         Ok(BindValue::Int(42))
      );
      assert_eq!(
         infer_param_class(&Term::from(i32::MIN), BinaryAs::Text),
         Ok(BindValue::Int(i32::MIN))
      );
   }

   #[test]
   fn test_infer_widens_past_i32() {
      let v = i64::from(i32::MAX) + 1;
      assert_eq!(
         infer_param_class(&Term::from(v), BinaryAs::Text),
         Ok(BindValue::Int64(v))
      );
      assert_eq!(
         infer_param_class(&Term::from(i64::MIN), BinaryAs::Text),
         Ok(BindValue::Int64(i64::MIN))
      );
   }

   #[test]
   fn test_infer_rejects_integer_beyond_i64() {
      let v = i128::from(i64::MAX) + 1;
      assert_eq!(
         infer_param_class(&Term::Integer(v), BinaryAs::Text),
         Err(UserError::IntegerOutOfRange(v))
      );
   }

   #[test]
   fn test_infer_binary_follows_call_site() {
      let term = Term::from("abc");
      assert_eq!(
         infer_param_class(&term, BinaryAs::Text),
         Ok(BindValue::Text(b"abc"))
      );
      assert_eq!(
         infer_param_class(&term, BinaryAs::Blob),
         Ok(BindValue::Blob(b"abc"))
      );
   }

   #[test]
   fn test_infer_rejects_atoms_and_lists() {
      assert_eq!(
         infer_param_class(&Term::Atom("true".into()), BinaryAs::Text),
         Err(UserError::UnsupportedValue("atom"))
      );
      assert_eq!(
         infer_param_class(&Term::List(vec![]), BinaryAs::Text),
         Err(UserError::UnsupportedValue("list"))
      );
   }

   #[test]
   fn test_coerce_nil_bypasses_every_class() {
      for class in [
         StorageClass::Integer,
         StorageClass::Float,
         StorageClass::Text,
         StorageClass::Blob,
         StorageClass::Null,
      ] {
         assert_eq!(coerce_to_class(&Term::Nil, class, 1), Ok(BindValue::Null));
      }
   }

   #[test]
   fn test_coerce_shape_mismatch() {
      assert_eq!(
         coerce_to_class(&Term::from("x"), StorageClass::Integer, 2),
         Err(UserError::TypeMismatch {
            index: 2,
            expected: StorageClass::Integer,
            found: "binary",
         })
      );
      assert!(matches!(
         coerce_to_class(&Term::from(1_i64), StorageClass::Float, 1),
         Err(UserError::TypeMismatch { .. })
      ));
      assert!(matches!(
         coerce_to_class(&Term::from(1_i64), StorageClass::Null, 1),
         Err(UserError::TypeMismatch { .. })
      ));
   }

   #[test]
   fn test_coerce_matching_shapes() {
      assert_eq!(
         coerce_to_class(&Term::from(7_i64), StorageClass::Integer, 1),
         Ok(BindValue::Int(7))
      );
      assert_eq!(
         coerce_to_class(&Term::from(1.5), StorageClass::Float, 1),
         Ok(BindValue::Float(1.5))
      );
      assert_eq!(
         coerce_to_class(&Term::from("a"), StorageClass::Text, 1),
         Ok(BindValue::Text(b"a"))
      );
      assert_eq!(
         coerce_to_class(&Term::from(vec![0u8, 1]), StorageClass::Blob, 1),
         Ok(BindValue::Blob(&[0, 1]))
      );
   }

   #[test]
   fn test_storage_class_codes() {
      for class in [
         StorageClass::Integer,
         StorageClass::Float,
         StorageClass::Text,
         StorageClass::Blob,
         StorageClass::Null,
      ] {
         assert_eq!(StorageClass::from_code(class.code()), Some(class));
      }
      assert_eq!(StorageClass::from_code(0), None);
   }

   #[test]
   fn test_cell_into_term() {
      assert_eq!(Term::from(Cell::Integer(3)), Term::Integer(3));
      assert_eq!(Term::from(Cell::Text(b"hi".to_vec())), Term::Binary(b"hi".to_vec()));
      assert_eq!(Term::from(Cell::Null), Term::Nil);
      assert_eq!(Term::from(None::<i64>), Term::Nil);
   }
}
