//! LLM-assisted host diagnostics.
//!
//! This crate runs shell commands against a local or remote host, asks a
//! completion service to interpret their output, and iterates on its
//! recommendations until a termination condition is reached. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (session model, admission
//!   policy, remote-target parsing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (process execution, SSH,
//!   configuration, report rendering). Isolated behind traits to enable
//!   mocking in tests.
//! - **[`llm`]**: The completion-service boundary: prompt construction,
//!   schema-validated structured responses, and the HTTP client.
//!
//! [`workflow`] coordinates the three into the bounded diagnostic loop.

pub mod core;
pub mod io;
pub mod llm;
pub mod logging;
pub mod workflow;
