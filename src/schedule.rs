//! Where each bridge operation runs.
//!
//! Operations that may block on disk or run for an unbounded time are moved
//! off the async scheduler onto tokio's blocking pool. Cheap metadata calls
//! and `interrupt` run inline on the calling task.

use std::fmt;

/// Execution class of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schedule {
   /// Runs on the calling task.
   Inline,
   /// Offloaded; dominated by file IO or unbounded query time.
   BlockingIo,
   /// Offloaded; dominated by CPU work such as SQL compilation.
   BlockingCpu,
}

impl Schedule {
   pub fn is_offloaded(self) -> bool {
      !matches!(self, Schedule::Inline)
   }
}

impl fmt::Display for Schedule {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(match self {
         Schedule::Inline => "inline",
         Schedule::BlockingIo => "blocking-io",
         Schedule::BlockingCpu => "blocking-cpu",
      })
   }
}

/// One row of the operation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
   pub name: &'static str,
   pub schedule: Schedule,
   /// Whether the operation may also be run inline when the caller opts in.
   pub inline_variant: bool,
}

const fn op(name: &'static str, schedule: Schedule, inline_variant: bool) -> Operation {
   Operation {
      name,
      schedule,
      inline_variant,
   }
}

/// Every operation the bridge exposes, with its default schedule.
pub const OPERATIONS: &[Operation] = &[
   op("open", Schedule::BlockingIo, false),
   op("close", Schedule::BlockingIo, false),
   op("execute_batch", Schedule::BlockingIo, false),
   op("prepare", Schedule::BlockingCpu, false),
   op("finalize", Schedule::BlockingCpu, false),
   op("step", Schedule::BlockingIo, true),
   op("multi_step", Schedule::BlockingIo, true),
   op("fetch_all", Schedule::BlockingIo, true),
   op("insert_all", Schedule::BlockingIo, true),
   op("reset", Schedule::Inline, false),
   op("bind", Schedule::Inline, false),
   op("bind_text", Schedule::Inline, false),
   op("bind_blob", Schedule::Inline, false),
   op("bind_integer", Schedule::Inline, false),
   op("bind_float", Schedule::Inline, false),
   op("bind_null", Schedule::Inline, false),
   op("bind_parameter_count", Schedule::Inline, false),
   op("bind_parameter_index", Schedule::Inline, false),
   op("bind_parameter_name", Schedule::Inline, false),
   op("clear_bindings", Schedule::Inline, false),
   op("interrupt", Schedule::Inline, false),
   op("enable_load_extension", Schedule::Inline, false),
   op("changes", Schedule::Inline, false),
   op("total_changes", Schedule::Inline, false),
   op("last_insert_rowid", Schedule::Inline, false),
   op("get_autocommit", Schedule::Inline, false),
   op("column_count", Schedule::Inline, false),
   op("column_name", Schedule::Inline, false),
   op("column_names", Schedule::Inline, false),
   op("sql", Schedule::Inline, false),
   op("expanded_sql", Schedule::Inline, false),
   op("errmsg", Schedule::Inline, false),
   op("errstr", Schedule::Inline, false),
   op("memory_used", Schedule::Inline, false),
];

/// Looks up an operation by name.
pub fn operation(name: &str) -> Option<&'static Operation> {
   OPERATIONS.iter().find(|op| op.name == name)
}

/// Schedule for `name`, honoring the caller's inline preference where the
/// operation allows it. Unknown names are treated as blocking IO.
pub fn schedule_for(name: &str, prefer_inline: bool) -> Schedule {
   match operation(name) {
      Some(op) if prefer_inline && op.inline_variant => Schedule::Inline,
      Some(op) => op.schedule,
      None => Schedule::BlockingIo,
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use std::collections::HashSet;

   #[test]
   fn test_operation_names_are_unique() {
      let names: HashSet<_> = OPERATIONS.iter().map(|op| op.name).collect();
      assert_eq!(names.len(), OPERATIONS.len());
   }

   #[test]
   fn test_lifecycle_and_steps_are_offloaded() {
      for name in ["open", "close", "step", "multi_step", "fetch_all", "insert_all"] {
         assert_eq!(schedule_for(name, false), Schedule::BlockingIo, "{name}");
      }
      for name in ["prepare", "finalize"] {
         assert_eq!(schedule_for(name, false), Schedule::BlockingCpu, "{name}");
      }
   }

   #[test]
   fn test_inline_preference_only_applies_to_step_family() {
      assert_eq!(schedule_for("step", true), Schedule::Inline);
      assert_eq!(schedule_for("insert_all", true), Schedule::Inline);
      assert_eq!(schedule_for("open", true), Schedule::BlockingIo);
      assert_eq!(schedule_for("prepare", true), Schedule::BlockingCpu);
   }

   #[test]
   fn test_cheap_calls_are_inline() {
      for name in [
         "bind",
         "clear_bindings",
         "interrupt",
         "changes",
         "get_autocommit",
         "enable_load_extension",
      ] {
         assert!(!schedule_for(name, false).is_offloaded(), "{name}");
      }
      assert_eq!(schedule_for("no_such_operation", true), Schedule::BlockingIo);
   }
}
