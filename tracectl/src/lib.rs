// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Runtime control of the switch's log targets.
//!
//! Every module that logs declares a target with [`trace_target!`] (or [`custom_target!`] for
//! free-form target names). Targets are collected at link time and can later be adjusted,
//! individually or by tag, with a `"tag=level,..."` string.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod control;
mod display;
pub mod targets;

pub use control::{TraceCtlError, TracingControl, get_trace_ctl};
pub use tracing_subscriber::filter::LevelFilter;
