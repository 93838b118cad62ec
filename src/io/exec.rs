//! Concurrent command execution with a bounded worker pool.
//!
//! The [`CommandExecutor`] trait decouples the workflow from the actual
//! execution backend. Tests use scripted executors that return predetermined
//! outputs without spawning processes or opening connections.
//!
//! [`WorkerPool`] is the production backend: a fixed number of worker threads
//! drain a shared queue of requests, each request runs either as a local
//! subprocess or over SSH, and the call returns only once every request has a
//! result. Per-request failures are folded into the result text; the pool
//! itself never partially completes.

use std::collections::VecDeque;
use std::sync::{Mutex, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::remote::RemoteTarget;
use crate::core::session::ActionId;
use crate::io::process::run_shell_command;
use crate::io::ssh::{SshAuth, run_remote_command};

/// One command to execute.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Identity of the originating action; results are correlated by this id.
    pub id: ActionId,
    /// Literal command string.
    pub command: String,
    /// Remote target string (`user@host[:port]`); local when `None`.
    pub remote: Option<String>,
}

/// Outcome of one request. Always produced, even on failure.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub id: ActionId,
    pub output: String,
}

/// Abstraction over command execution backends.
pub trait CommandExecutor {
    /// Execute every request and return exactly one result per request.
    fn execute(&self, requests: &[ExecRequest]) -> Vec<ExecResult>;
}

/// Bounded-width thread pool running commands locally and over SSH.
#[derive(Debug)]
pub struct WorkerPool {
    workers: usize,
    timeout: Duration,
    output_limit_bytes: usize,
    auth: SshAuth,
}

impl WorkerPool {
    pub fn new(workers: usize, timeout: Duration, output_limit_bytes: usize, auth: SshAuth) -> Self {
        Self {
            workers: workers.max(1),
            timeout,
            output_limit_bytes,
            auth,
        }
    }

    fn run_one(&self, request: &ExecRequest) -> String {
        match &request.remote {
            None => run_shell_command(&request.command, self.timeout, self.output_limit_bytes),
            Some(remote) => match remote.parse::<RemoteTarget>() {
                Ok(target) => {
                    run_remote_command(&target, &self.auth, &request.command, self.timeout)
                }
                Err(err) => {
                    warn!(remote, command = request.command, %err, "skipping unparseable remote target");
                    format!("[ERROR] {err:#}")
                }
            },
        }
    }
}

impl CommandExecutor for WorkerPool {
    #[instrument(skip_all, fields(requests = requests.len(), workers = self.workers))]
    fn execute(&self, requests: &[ExecRequest]) -> Vec<ExecResult> {
        if requests.is_empty() {
            return Vec::new();
        }
        info!("executing command batch");

        let queue: Mutex<VecDeque<ExecRequest>> =
            Mutex::new(requests.iter().cloned().collect());
        let (tx, rx) = mpsc::channel();

        let results = thread::scope(|scope| {
            for _ in 0..self.workers.min(requests.len()) {
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move || {
                    loop {
                        let Some(request) = queue.lock().ok().and_then(|mut q| q.pop_front())
                        else {
                            break;
                        };
                        let output = self.run_one(&request);
                        // The receiver outlives every worker; a send failure
                        // only means the pool is already tearing down.
                        let _ = tx.send(ExecResult {
                            id: request.id,
                            output,
                        });
                    }
                });
            }
            drop(tx);
            rx.iter().collect::<Vec<_>>()
        });

        debug!(results = results.len(), "command batch finished");
        results
    }
}
