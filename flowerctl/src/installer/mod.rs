//! Command workflows: install, uninstall, ssl and diagnose

pub mod diagnose;
pub mod install;
pub mod report;
pub mod rollback;
pub mod ssl;
pub mod uninstall;
