//! Pure, deterministic diagnostic-session logic.
//!
//! Nothing in this module performs I/O: the session data model, the command
//! admission policy, and remote-target parsing are all testable in isolation.

pub mod policy;
pub mod remote;
pub mod session;
