//! KDL configuration parsing for genchain.
//!
//! This crate handles parsing of:
//! - Run configuration (genchain.kdl)
//! - Prompt lists (prompts.json)

pub mod error;
pub mod prompts;
pub mod run;

pub use error::{ConfigError, ConfigResult};
pub use prompts::{load_prompts, parse_prompts};
pub use run::{
    AnimationConfig, FaceSwapConfig, OutputConfig, RemoteConfig, RunConfig, TimingConfig,
    WebhookConfig, parse_run_config,
};
