//! Configuration for the bridge

use serde::{Deserialize, Serialize};
use sqlite_bridge_core::{OpenFlags, PrepareFlags};

/// Configuration for a [`Bridge`](crate::Bridge)
///
/// # Examples
///
/// ```
/// use sqlite_bridge::BridgeConfig;
///
/// // Use defaults
/// let config = BridgeConfig::default();
///
/// // Override just one field
/// let config = BridgeConfig {
///     multi_step_limit: 500,
///     ..Default::default()
/// };
///
/// // Or use the builder-style setters
/// let config = BridgeConfig::new().with_offload_steps(false);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
   /// Raw `SQLITE_OPEN_*` bits used when `open` is called without flags.
   ///
   /// The threading-mode bits are ignored; connections are always serialized.
   ///
   /// Default: `READWRITE | CREATE`
   pub open_flags: i32,

   /// Raw `SQLITE_PREPARE_*` bits used when `prepare` is called without flags.
   ///
   /// Default: 0
   pub prepare_flags: u32,

   /// Rows fetched per `multi_step` call when collecting a whole result in chunks.
   ///
   /// Each chunk is one offloaded call, so smaller values hand control back
   /// to the scheduler more often.
   ///
   /// Default: 100
   pub multi_step_limit: u32,

   /// Whether `step`, `multi_step`, `fetch_all` and `insert_all` run on the
   /// blocking pool.
   ///
   /// Set to `false` only for statements known to finish quickly; an inline
   /// step blocks the calling task's worker thread for its whole duration.
   ///
   /// Default: true
   pub offload_steps: bool,
}

impl Default for BridgeConfig {
   fn default() -> Self {
      Self {
         open_flags: OpenFlags::default().bits(),
         prepare_flags: PrepareFlags::default().bits(),
         multi_step_limit: 100,
         offload_steps: true,
      }
   }
}

impl BridgeConfig {
   /// Creates a configuration with default settings.
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_open_flags(mut self, flags: OpenFlags) -> Self {
      self.open_flags = flags.bits();
      self
   }

   pub fn with_prepare_flags(mut self, flags: PrepareFlags) -> Self {
      self.prepare_flags = flags.bits();
      self
   }

   /// Sets the chunk size used by [`Bridge::collect_rows`](crate::Bridge::collect_rows).
   ///
   /// A limit of 0 is raised to 1.
   pub fn with_multi_step_limit(mut self, limit: u32) -> Self {
      self.multi_step_limit = limit.max(1);
      self
   }

   pub fn with_offload_steps(mut self, offload: bool) -> Self {
      self.offload_steps = offload;
      self
   }

   pub(crate) fn open_flags(&self) -> OpenFlags {
      OpenFlags::from_bits(self.open_flags)
   }

   pub(crate) fn prepare_flags(&self) -> PrepareFlags {
      PrepareFlags::from_bits(self.prepare_flags)
   }
}
