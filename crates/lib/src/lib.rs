//! stackup-lib: multi-stack deployment orchestration
//!
//! This crate drives an external control plane that materializes named
//! infrastructure stacks:
//! - `control_plane`: the only boundary to the outside, with retry and bounded waits
//! - `lifecycle`: per-stack state machine deciding create, update or no-op
//! - `changeset`: change preview and the operator confirmation gate
//! - `sweep`: empties object stores and image repositories before deletion
//! - `orchestrate`: walks an environment's stack chain forward or in reverse

pub mod changeset;
pub mod config;
pub mod consts;
pub mod control_plane;
pub mod lifecycle;
pub mod orchestrate;
pub mod platform;
pub mod stack;
pub mod sweep;
pub mod template;
pub mod util;
