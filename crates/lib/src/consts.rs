//! Crate-wide constants.

/// Application name, used for data directories and the config file.
pub const APP_NAME: &str = "stackup";

/// Default project config file name.
pub const CONFIG_FILENAME: &str = "stackup.toml";

/// Length of the truncated SHA-256 used as a template reference.
pub const TEMPLATE_REF_LEN: usize = 20;

/// Parameter supplied when no parameter file exists for a stack.
pub const DEFAULT_PARAMETER_KEY: &str = "EnvironmentName";

/// Maximum number of object versions accepted by a single batch delete.
pub const MAX_OBJECT_DELETE_BATCH: usize = 1000;

/// Maximum number of image ids accepted by a single batch delete.
pub const MAX_IMAGE_DELETE_BATCH: usize = 100;

/// Reason reported by the control plane for a change set without changes.
pub const NO_CHANGES_REASON: &str = "The submitted information didn't contain changes.";
