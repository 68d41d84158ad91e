/// Engine tunables and their validation.
pub mod engine_config;

pub use engine_config::EngineConfig;
