//! Engine memory must return to its baseline after a full handle lifecycle.
//!
//! Kept in its own test binary so no other test allocates engine memory
//! while the counter is being compared.

use sqlite_bridge_core::{Connection, PrepareFlags, StorageClass, Term, memory_used};

fn full_cycle() {
   let conn = Connection::open_in_memory().unwrap();
   conn.execute_batch("CREATE TABLE t (id INTEGER, name TEXT, data BLOB)").unwrap();

   let insert = conn
      .prepare("INSERT INTO t VALUES (?, ?, ?)", PrepareFlags::default())
      .unwrap();
   let rows: Vec<Vec<Term>> = (0..100_i64)
      .map(|i| vec![i.into(), format!("name {i}").into(), vec![0u8; 64].into()])
      .collect();
   insert
      .insert_all(&[StorageClass::Integer, StorageClass::Text, StorageClass::Blob], &rows)
      .unwrap();

   let select = conn.prepare("SELECT * FROM t", PrepareFlags::default()).unwrap();
   assert_eq!(select.fetch_all().unwrap().len(), 100);

   // One statement is left for the destructor to release.
   insert.finalize().unwrap();
   conn.close().unwrap();
   drop(select);
}

#[test]
fn test_memory_returns_to_baseline() {
   // Warm up once so process-wide engine state is already initialized.
   full_cycle();
   let baseline = memory_used();

   for _ in 0..3 {
      full_cycle();
   }

   assert_eq!(memory_used(), baseline);
}
