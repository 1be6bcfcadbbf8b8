//! CLI commands

pub mod context;

pub mod install;
pub mod lifecycle;
pub mod status;
pub mod uninstall;
pub mod upgrade;
