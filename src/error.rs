use serde::{Serialize, Serializer};

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error response for the host.
#[derive(Serialize)]
struct ErrorResponse {
   code: String,
   message: String,
}

/// Error types for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from the native handle layer.
   #[error(transparent)]
   Core(#[from] sqlite_bridge_core::Error),

   /// An offloaded operation panicked or was cancelled before it finished.
   #[error("worker task failed: {0}")]
   Worker(#[from] tokio::task::JoinError),

   /// JSON value that has no SQLite representation.
   #[error("unsupported value: {0}")]
   UnsupportedValue(String),

   /// Storage class name that is not one of INTEGER, FLOAT, TEXT, BLOB or NULL.
   #[error("unknown storage class: {0}")]
   UnknownStorageClass(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for host-side error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Core(e) => e.error_code(),
         Error::Worker(_) => "WORKER_ERROR".to_string(),
         Error::UnsupportedValue(_) => "UNSUPPORTED_VALUE".to_string(),
         Error::UnknownStorageClass(_) => "UNKNOWN_STORAGE_CLASS".to_string(),
      }
   }
}

impl Serialize for Error {
   fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
   where
      S: Serializer,
   {
      let response = ErrorResponse {
         code: self.error_code(),
         message: self.to_string(),
      };
      response.serialize(serializer)
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;
   use sqlite_bridge_core::UserError;

   #[test]
   fn test_core_error_code_passes_through() {
      let err = Error::from(sqlite_bridge_core::Error::from(UserError::ConnectionClosed));
      assert_eq!(err.error_code(), "USER_ERROR");

      let err = Error::from(sqlite_bridge_core::Error::Engine {
         code: 19,
         message: "constraint failed".into(),
      });
      assert_eq!(err.error_code(), "SQLITE_19");
   }

   #[test]
   fn test_serializes_code_and_message() {
      let err = Error::UnknownStorageClass("DATE".into());
      let value = serde_json::to_value(&err).unwrap();
      assert_eq!(
         value,
         json!({
            "code": "UNKNOWN_STORAGE_CLASS",
            "message": "unknown storage class: DATE",
         })
      );
   }
}
