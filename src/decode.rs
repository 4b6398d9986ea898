//! Conversion between result cells / host JSON values and the native layer.

use base64::Engine;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlite_bridge_core::{Cell, Row, StorageClass, Term};

use crate::Error;

/// Convert a result cell to a JSON value.
///
/// Note: BLOB values are returned as base64-encoded strings since JSON
/// has no native binary type. TEXT that is not valid UTF-8 is decoded lossily.
pub fn cell_to_json(cell: &Cell) -> JsonValue {
   match cell {
      Cell::Integer(v) => JsonValue::Number((*v).into()),
      // NaN and infinities have no JSON form
      Cell::Float(v) => serde_json::Number::from_f64(*v).map_or(JsonValue::Null, JsonValue::Number),
      Cell::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
      Cell::Blob(bytes) => JsonValue::String(base64_encode(bytes)),
      Cell::Null => JsonValue::Null,
   }
}

/// Pair each cell of `row` with its column name, preserving column order.
///
/// Later duplicates of a column name overwrite earlier ones, as in `SELECT a.id, b.id`.
pub fn row_to_map(columns: &[String], row: &Row) -> IndexMap<String, JsonValue> {
   columns
      .iter()
      .zip(row)
      .map(|(name, cell)| (name.clone(), cell_to_json(cell)))
      .collect()
}

/// Convert a JSON host value to a [`Term`] for binding.
///
/// Integers keep full precision (values beyond the 64-bit range are rejected
/// later, at bind time). Booleans become 0/1, and arrays/objects are bound
/// as their JSON text.
pub fn json_to_term(value: &JsonValue) -> Result<Term, Error> {
   let term = match value {
      JsonValue::Null => Term::Nil,
      JsonValue::Bool(b) => Term::Integer(i128::from(*b)),
      JsonValue::Number(number) => {
         if let Some(v) = number.as_i64() {
            Term::Integer(v.into())
         } else if let Some(v) = number.as_u64() {
            Term::Integer(v.into())
         } else if let Some(v) = number.as_f64() {
            Term::Float(v)
         } else {
            return Err(Error::UnsupportedValue(number.to_string()));
         }
      }
      JsonValue::String(s) => Term::Binary(s.clone().into_bytes()),
      JsonValue::Array(_) | JsonValue::Object(_) => Term::Binary(value.to_string().into_bytes()),
   };
   Ok(term)
}

/// Parse a storage class name as used in batch type tags (case-insensitive).
///
/// `REAL` is accepted as an alias for `FLOAT`.
pub fn parse_storage_class(name: &str) -> Result<StorageClass, Error> {
   match name.to_ascii_uppercase().as_str() {
      "INTEGER" => Ok(StorageClass::Integer),
      "FLOAT" | "REAL" => Ok(StorageClass::Float),
      "TEXT" => Ok(StorageClass::Text),
      "BLOB" => Ok(StorageClass::Blob),
      "NULL" => Ok(StorageClass::Null),
      _ => Err(Error::UnknownStorageClass(name.to_string())),
   }
}

/// Base64 encode binary data for JSON serialization.
fn base64_encode(data: &[u8]) -> String {
   base64::engine::general_purpose::STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   #[test]
   fn test_base64_encode() {
      assert_eq!(base64_encode(b"hello"), "aGVsbG8=");
      assert_eq!(base64_encode(&[0, 0, 0]), "AAAA");
      assert_eq!(base64_encode(&[]), "");
   }

   #[test]
   fn test_cell_to_json() {
      assert_eq!(cell_to_json(&Cell::Integer(-3)), json!(-3));
      assert_eq!(cell_to_json(&Cell::Float(1.5)), json!(1.5));
      assert_eq!(cell_to_json(&Cell::Float(f64::NAN)), JsonValue::Null);
      assert_eq!(cell_to_json(&Cell::Text(b"hi".to_vec())), json!("hi"));
      assert_eq!(cell_to_json(&Cell::Blob(vec![255, 255, 255])), json!("////"));
      assert_eq!(cell_to_json(&Cell::Null), JsonValue::Null);
   }

   #[test]
   fn test_row_to_map_preserves_column_order() {
      let columns = vec!["z".to_string(), "a".to_string()];
      let row = vec![Cell::Integer(1), Cell::Null];
      let map = row_to_map(&columns, &row);

      let keys: Vec<_> = map.keys().map(String::as_str).collect();
      assert_eq!(keys, ["z", "a"]);
      assert_eq!(map["z"], json!(1));
      assert_eq!(map["a"], JsonValue::Null);
   }

   #[test]
   fn test_json_to_term() {
      assert_eq!(json_to_term(&json!(null)).unwrap(), Term::Nil);
      assert_eq!(json_to_term(&json!(true)).unwrap(), Term::Integer(1));
      assert_eq!(json_to_term(&json!(42)).unwrap(), Term::Integer(42));
      assert_eq!(
         json_to_term(&json!(u64::MAX)).unwrap(),
         Term::Integer(i128::from(u64::MAX))
      );
      assert_eq!(json_to_term(&json!(2.5)).unwrap(), Term::Float(2.5));
      assert_eq!(json_to_term(&json!("x")).unwrap(), Term::from("x"));
      assert_eq!(json_to_term(&json!([1, 2])).unwrap(), Term::from("[1,2]"));
   }

   #[test]
   fn test_parse_storage_class() {
      assert_eq!(parse_storage_class("integer").unwrap(), StorageClass::Integer);
      assert_eq!(parse_storage_class("REAL").unwrap(), StorageClass::Float);
      assert!(matches!(
         parse_storage_class("DATE"),
         Err(Error::UnknownStorageClass(_))
      ));
   }
}
