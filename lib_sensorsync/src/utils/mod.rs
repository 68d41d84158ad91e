/// Process CPU / memory sampling.
pub mod sys_info;
/// Display timezone helpers.
pub mod time;
