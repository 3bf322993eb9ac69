//! Process bootstrap and worker supervision.

pub mod bootstrap;
pub mod supervisor;

pub use bootstrap::{Services, apply_overrides, config_path, load_config};
pub use supervisor::{run, serve};
