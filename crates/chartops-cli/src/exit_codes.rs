//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

#![allow(dead_code)]

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Configuration error - invalid or unreadable suite configuration
pub const CONFIG_ERROR: i32 = 2;

/// Cluster error - the API rejected a request or reported a failed transition
pub const CLUSTER_ERROR: i32 = 3;

/// Timeout - a transition was never confirmed within its wait budget
pub const TIMEOUT: i32 = 4;

/// Cleanup error - one or more teardown bundles failed
pub const CLEANUP_ERROR: i32 = 5;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 6;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
