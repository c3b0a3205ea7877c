//! `robolink-activity` – the operator audit trail.
//!
//! Every robot session reports what happened (links opened and lost,
//! commands issued, transport failures) to an [`ActivityRecorder`]. Recording
//! is best-effort: a failure to log never fails the robot operation.
//!
//! # Modules
//!
//! - [`recorder`] – the [`ActivityRecorder`][recorder::ActivityRecorder]
//!   interface.
//! - [`store`] – [`ActivityLog`][store::ActivityLog]: SQLite-backed local
//!   log with type, date-range and retention queries.
//! - [`collector`] – [`HttpCollector`][collector::HttpCollector]: ships
//!   records to a remote log service.
//! - [`fallback`] – [`FallbackQueue`][fallback::FallbackQueue] and
//!   [`BestEffortRecorder`][fallback::BestEffortRecorder]: queue records that
//!   failed to deliver and re-deliver them later.
//! - [`mirror`] – [`MirroredRecorder`][mirror::MirroredRecorder]: keeps a
//!   local copy of everything shipped to a remote recorder.

pub mod collector;
pub mod fallback;
pub mod mirror;
pub mod recorder;
pub mod store;

pub use collector::HttpCollector;
pub use fallback::{BestEffortRecorder, FallbackQueue};
pub use mirror::MirroredRecorder;
pub use recorder::ActivityRecorder;
pub use store::{ActivityLog, StoreError};
