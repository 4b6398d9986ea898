//! Tests for connection and statement lifecycle.

use sqlite_bridge_core::{
   Cell, Connection, Error, ExecState, OpenFlags, PrepareFlags, Step, Term, UserError,
};
use tempfile::TempDir;

fn create_test_db(name: &str) -> (Connection, TempDir) {
   let temp_dir = TempDir::new().expect("Failed to create temp directory");
   let db_path = temp_dir.path().join(name);
   let conn =
      Connection::open(&db_path, OpenFlags::default()).expect("Failed to open test database");

   (conn, temp_dir)
}

/// Routes handle lifecycle logs (including destructor warnings) to the test output.
fn init_tracing() {
   let _ = tracing_subscriber::fmt()
      .with_max_level(tracing::Level::TRACE)
      .with_test_writer()
      .try_init();
}

fn count_rows(conn: &Connection, table: &str) -> i64 {
   let stmt = conn
      .prepare(format!("SELECT count(*) FROM {table}"), PrepareFlags::default())
      .unwrap();
   let rows = stmt.fetch_all().unwrap();
   rows[0][0].as_i64().unwrap()
}

// ============================================================================
// Open / close
// ============================================================================

#[test]
fn test_open_reports_filename() {
   let (conn, temp) = create_test_db("named.db");
   let expected = temp.path().join("named.db");

   assert!(conn.filename().ends_with("named.db"));
   assert!(expected.exists());
   assert!(!conn.is_closed());
}

#[test]
fn test_open_missing_file_read_only_fails() {
   let temp = TempDir::new().unwrap();
   let err = Connection::open(temp.path().join("missing.db"), OpenFlags::READ_ONLY).unwrap_err();

   assert!(matches!(err, Error::Engine { .. }));
   assert_eq!(err.code(), Some(libsqlite3_sys::SQLITE_CANTOPEN));
}

#[test]
fn test_double_close_is_noop() {
   let conn = Connection::open_in_memory().unwrap();

   conn.close().unwrap();
   conn.close().unwrap();
   assert!(conn.is_closed());
}

#[test]
fn test_close_is_visible_through_clones() {
   let conn = Connection::open_in_memory().unwrap();
   let other = conn.clone();

   conn.close().unwrap();
   assert!(other.is_closed());
   assert!(matches!(
      other.prepare("SELECT 1", PrepareFlags::default()),
      Err(Error::User(UserError::ConnectionClosed))
   ));
}

#[test]
fn test_close_rolls_back_open_transaction() {
   let (conn, temp) = create_test_db("rollback.db");
   conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
   conn.execute_batch("BEGIN; INSERT INTO t VALUES (1);").unwrap();
   assert!(!conn.get_autocommit().unwrap());

   conn.close().unwrap();

   let reopened = Connection::open(temp.path().join("rollback.db"), OpenFlags::default()).unwrap();
   assert!(reopened.get_autocommit().unwrap());
   assert_eq!(count_rows(&reopened, "t"), 0);
}

#[test]
fn test_committed_data_survives_close() {
   let (conn, temp) = create_test_db("commit.db");
   conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1), (2);").unwrap();
   conn.close().unwrap();

   let reopened = Connection::open(temp.path().join("commit.db"), OpenFlags::default()).unwrap();
   assert_eq!(count_rows(&reopened, "t"), 2);
}

// ============================================================================
// Prepare / finalize
// ============================================================================

#[test]
fn test_prepare_empty_sql_is_user_error() {
   let conn = Connection::open_in_memory().unwrap();

   for sql in ["", "   ", "-- only a comment"] {
      let err = conn.prepare(sql, PrepareFlags::default()).unwrap_err();
      assert!(matches!(err, Error::User(UserError::EmptyStatement)), "{sql:?}");
   }
}

#[test]
fn test_prepare_syntax_error_carries_diagnostic() {
   let conn = Connection::open_in_memory().unwrap();
   let err = conn.prepare("SELEC 1", PrepareFlags::default()).unwrap_err();

   assert!(matches!(err, Error::Engine { .. }));
   assert!(err.to_string().contains("syntax error"), "{err}");
   assert!(conn.errmsg().unwrap().contains("syntax error"));
}

#[test]
fn test_prepare_reports_metadata() {
   let conn = Connection::open_in_memory().unwrap();
   let stmt = conn
      .prepare("SELECT ?1 AS a, ?2 AS b; SELECT 'ignored'", PrepareFlags::PERSISTENT)
      .unwrap();

   assert_eq!(stmt.parameter_count(), 2);
   assert_eq!(stmt.column_count().unwrap(), 2);
   assert_eq!(stmt.column_names().unwrap(), vec!["a", "b"]);
   assert_eq!(stmt.column_name(1).unwrap(), "b");
   assert_eq!(stmt.sql().unwrap(), "SELECT ?1 AS a, ?2 AS b;");
   assert_eq!(stmt.state().unwrap(), ExecState::Ready);
}

#[test]
fn test_expanded_sql_substitutes_bindings() {
   let conn = Connection::open_in_memory().unwrap();
   let stmt = conn.prepare("SELECT ?, ?", PrepareFlags::default()).unwrap();
   stmt.bind(1, &Term::from(7_i64)).unwrap();
   stmt.bind(2, &Term::from("hi")).unwrap();

   assert_eq!(stmt.expanded_sql().unwrap(), "SELECT 7, 'hi'");
}

#[test]
fn test_double_finalize_is_noop() {
   let conn = Connection::open_in_memory().unwrap();
   let stmt = conn.prepare("SELECT 1", PrepareFlags::default()).unwrap();

   stmt.finalize().unwrap();
   stmt.finalize().unwrap();
   assert!(stmt.is_finalized());
   assert!(matches!(
      stmt.step(),
      Err(Error::User(UserError::StatementFinalized))
   ));
   assert!(matches!(
      stmt.state(),
      Err(Error::User(UserError::StatementFinalized))
   ));
}

// ============================================================================
// Statements outliving their connection
// ============================================================================

#[test]
fn test_statement_after_parent_close() {
   let conn = Connection::open_in_memory().unwrap();
   let stmt = conn.prepare("SELECT 1", PrepareFlags::default()).unwrap();

   conn.close().unwrap();

   assert!(matches!(
      stmt.step(),
      Err(Error::User(UserError::ConnectionClosed))
   ));
   assert!(matches!(
      stmt.bind_integer(1, 1),
      Err(Error::User(UserError::IndexOutOfRange { .. }))
   ));
   assert_eq!(stmt.errmsg(), None);
   stmt.finalize().unwrap();
}

#[test]
fn test_statement_after_parent_dropped() {
   init_tracing();
   let conn = Connection::open_in_memory().unwrap();
   let stmt = conn.prepare("SELECT ?", PrepareFlags::default()).unwrap();
   drop(conn);

   assert!(matches!(
      stmt.bind_integer(1, 1),
      Err(Error::User(UserError::ConnectionClosed))
   ));
   assert!(matches!(
      stmt.fetch_all(),
      Err(Error::User(UserError::ConnectionClosed))
   ));
   stmt.finalize().unwrap();
}

#[test]
fn test_dropping_handles_in_any_order() {
   init_tracing();

   for statement_first in [true, false] {
      let conn = Connection::open_in_memory().unwrap();
      let stmt = conn.prepare("SELECT 1", PrepareFlags::default()).unwrap();
      assert_eq!(stmt.step().unwrap(), Step::Row(vec![Cell::Integer(1)]));

      if statement_first {
         drop(stmt);
         drop(conn);
      } else {
         drop(conn);
         drop(stmt);
      }
   }
}

#[test]
fn test_handles_are_send_and_sync() {
   fn assert_send_sync<T: Send + Sync>() {}
   assert_send_sync::<Connection>();
   assert_send_sync::<sqlite_bridge_core::Statement>();
}
