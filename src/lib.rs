// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment tooling for X2CRM installations.
//!
//! x2deploy refreshes databases, reinstalls X2CRM from its git checkout, and
//! toggles configuration constants of installed copies, both on the local
//! machine and on remote hosts reached through SSH.
//!
//! # Flags
//!
//! A __flag__ is a symbolic toggle for one constant of an installation, e.g.,
//! "d" for Yii debug mode. Flags are data, not code. The [`Registry`] maps
//! each flag to its configuration file and a locator pattern, and the
//! [`Toggler`] rewrites or reads values through that table.

pub mod config;
pub mod path;
pub mod provision;
pub mod registry;
pub mod shell;
pub mod syscall;
pub mod target;
pub mod toggle;

pub use config::{DatabaseSettings, DeployConfig, RemoteSettings};
pub use provision::Provisioner;
pub use registry::{FlagDescriptor, FlagKey, Registry};
pub use syscall::{Executor, Invocation, SystemExecutor};
pub use target::ExecutionTarget;
pub use toggle::{FlagSetting, ToggleError, ToggleRequest, Toggler};
