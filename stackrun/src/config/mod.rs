//! Harness configuration and run manifests.
//!
//! Settings are layered: built-in defaults, then the manifest's `settings`
//! block, then environment variables, then command-line flags.

mod manifest;
mod settings;

pub use manifest::{BindingDef, ManifestDefaults, RunManifest, StageManifest};
pub use settings::{
    env_flag, HarnessConfig, ENV_BINARY, ENV_LEGACY_SKIP_CLEANUP, ENV_RUN_TIMEOUT,
    ENV_SKIP_CLEANUP,
};
