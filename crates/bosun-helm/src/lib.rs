//! Helm release management for bosun
//!
//! bosun drives the real helm binary rather than reimplementing chart
//! rendering: releases are installed with `helm upgrade --install` and
//! verified against `helm list` output. This crate owns the exact argument
//! surface of those invocations plus the values documents fed to them.

pub mod install;
pub mod values;

pub use install::{HelmInstaller, ReleaseSpec};
pub use values::{render_controller_values, write_values_file};
