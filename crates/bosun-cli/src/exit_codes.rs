//! Standard exit codes for CLI operations

#![allow(dead_code)]

/// Success - installation completed
pub const SUCCESS: i32 = 0;

/// General error - a phase failed
pub const ERROR: i32 = 1;

/// The cluster API server could not be reached
pub const CONNECTIVITY_ERROR: i32 = 2;

/// Resources never became ready before the deadline
pub const READINESS_TIMEOUT: i32 = 3;

/// Usage error - invalid arguments or request (sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;

/// Cancelled by the operator (128 + SIGINT)
pub const CANCELLED: i32 = 130;
