//! Side-effecting subsystems: process execution, SSH transport, the command
//! worker pool, configuration, and report rendering.

pub mod config;
pub mod exec;
pub mod process;
pub mod report;
pub mod ssh;
