/// Pure temperature classification.
pub mod abnormality;
/// Fan-out to connected viewers.
pub mod dispatcher;
/// Row to record conversion.
pub mod format;
/// Direct `*-new` push hooks.
pub mod publisher;
/// Viewer membership and loop lifecycle.
pub mod registry;
/// Poll cycle and tick serialization.
pub mod scheduler;
/// Full-state snapshots.
pub mod snapshot;
/// Stats aggregation loop.
pub mod stats;
/// Per-sensor delivery marks.
pub mod watermark;
