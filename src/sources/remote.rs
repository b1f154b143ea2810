//! Remote listing over ssh.
//!
//! A remote scan is one command, `find <root> -type f -printf '%f\t%s\t%p\n'`,
//! run on the backup host. Its stdout is the only input; every line is
//! `name<TAB>size<TAB>path`.
//!
//! # Failure policy
//!
//! If the transport fails (ssh cannot connect, auth is refused, the command
//! exits non-zero, writes to stderr, or runs past the timeout) nothing from
//! the listing is trusted and the whole scan fails with [`TransportError`].
//! A single malformed line is skipped and counted in
//! [`ScanStats::skipped`](super::ScanStats).

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use super::{CandidateStream, ScanError, ScanStats};
use crate::filter::ExtensionFilter;
use crate::model::types::{Candidate, Origin};

/// Errors from running the remote listing. Always fatal for the scan.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Remote listing on {host} failed ({status}): {stderr}")]
    Failed {
        host: String,
        status: String,
        stderr: String,
    },

    #[error("Remote listing on {host} timed out after {secs} seconds")]
    Timeout { host: String, secs: u64 },

    #[error("Failed to read output of remote listing on {host}: {source}")]
    Io {
        host: String,
        source: std::io::Error,
    },
}

/// One line of remote output that could not be used.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: expected 3 tab-separated fields, found {found}")]
    FieldCount { line: usize, found: usize },

    #[error("line {line}: size {value:?} is not a number")]
    BadSize { line: usize, value: String },

    #[error("line {line}: empty file name")]
    EmptyName { line: usize },

    #[error("line {line}: not valid UTF-8")]
    NonUtf8 { line: usize },
}

/// Something that can run one shell command on a named host and return its
/// raw standard output.
pub trait RemoteShell {
    fn run(&self, host: &str, command: &str) -> Result<Vec<u8>, TransportError>;
}

/// `ssh` in batch mode with an overall deadline.
#[derive(Debug, Clone)]
pub struct SshTransport {
    program: String,
    /// ssh `ConnectTimeout` in seconds.
    connect_timeout: u64,
    /// Limit for the whole command.
    timeout: Duration,
}

impl SshTransport {
    pub fn new() -> Self {
        Self {
            program: "ssh".to_string(),
            connect_timeout: 10,
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_connect_timeout(mut self, seconds: u64) -> Self {
        self.connect_timeout = seconds;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a different ssh binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, host: &str, remote_command: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args([
            "-o",
            "BatchMode=yes",
            "-o",
            &format!("ConnectTimeout={}", self.connect_timeout),
            "-o",
            "StrictHostKeyChecking=accept-new",
            // Keep host-key notices out of stderr; any stderr output is fatal.
            "-o",
            "LogLevel=ERROR",
        ])
        .arg(host)
        .arg(remote_command);
        cmd
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteShell for SshTransport {
    fn run(&self, host: &str, command: &str) -> Result<Vec<u8>, TransportError> {
        debug!(host = %host, command = %command, "running remote listing");
        let output = run_with_timeout(self.command(host, command), self.timeout, host)
            .map_err(|e| match e {
                RunError::Spawn(source) => TransportError::Spawn {
                    program: self.program.clone(),
                    source,
                },
                RunError::Io(source) => TransportError::Io {
                    host: host.to_string(),
                    source,
                },
                RunError::Timeout => TransportError::Timeout {
                    host: host.to_string(),
                    secs: self.timeout.as_secs(),
                },
            })?;
        check_output(host, output)
    }
}

/// Captured output of a finished child.
#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug)]
pub(crate) enum RunError {
    Spawn(std::io::Error),
    Io(std::io::Error),
    Timeout,
}

/// Run `cmd` to completion, killing it once `timeout` has elapsed.
///
/// stdout and stderr are drained on their own threads so a large listing
/// cannot fill the pipe and stall the child. The deadline covers both the
/// wait and the drain: a grandchild holding the pipes open past it is a
/// timeout too.
pub(crate) fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    label: &str,
) -> Result<ProcessOutput, RunError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(RunError::Spawn)?;

    let (tx, rx) = mpsc::channel();
    drain(Pipe::Stdout, child.stdout.take(), tx.clone());
    drain(Pipe::Stderr, child.stderr.take(), tx);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait().map_err(RunError::Io)? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                kill(&mut child, label);
                return Err(RunError::Timeout);
            }
            None => thread::sleep(Duration::from_millis(20)),
        }
    };

    let (stdout, stderr) = collect(&rx, deadline, label)?;
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pipe {
    Stdout,
    Stderr,
}

type Drained = (Pipe, std::io::Result<Vec<u8>>);

fn drain<R: Read + Send + 'static>(which: Pipe, pipe: Option<R>, tx: Sender<Drained>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let result = match pipe {
            Some(mut pipe) => pipe.read_to_end(&mut buf).map(|_| buf),
            None => Ok(buf),
        };
        // The receiver is gone once the run timed out.
        let _ = tx.send((which, result));
    });
}

/// Wait for both reader threads until `deadline`.
fn collect(
    rx: &Receiver<Drained>,
    deadline: Instant,
    label: &str,
) -> Result<(Vec<u8>, Vec<u8>), RunError> {
    let mut stdout = None;
    let mut stderr = None;
    while stdout.is_none() || stderr.is_none() {
        let left = deadline.saturating_duration_since(Instant::now());
        let (which, result) = match rx.recv_timeout(left) {
            Ok(drained) => drained,
            Err(RecvTimeoutError::Timeout) => {
                warn!(host = %label, "output still open after the listing exited");
                return Err(RunError::Timeout);
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(RunError::Io(std::io::Error::other("output reader panicked")));
            }
        };
        let buf = result.map_err(RunError::Io)?;
        match which {
            Pipe::Stdout => stdout = Some(buf),
            Pipe::Stderr => stderr = Some(buf),
        }
    }
    Ok((stdout.unwrap_or_default(), stderr.unwrap_or_default()))
}

fn kill(child: &mut Child, label: &str) {
    if let Err(e) = child.kill() {
        warn!(host = %label, error = %e, "failed to kill timed out listing");
    }
    let _ = child.wait();
}

fn check_output(host: &str, output: ProcessOutput) -> Result<Vec<u8>, TransportError> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() || !stderr.trim().is_empty() {
        let status = output
            .status
            .code()
            .map_or_else(|| "killed by signal".to_string(), |c| format!("exit {c}"));
        warn!(host = %host, status = %status, stderr = %stderr.trim(), "remote listing failed");
        return Err(TransportError::Failed {
            host: host.to_string(),
            status,
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Build the `find` invocation for `root`, quoted for the remote shell.
///
/// A leading `~/` stays unquoted so the remote shell expands it.
pub fn find_command(root: &str) -> String {
    let root_word = if root == "~" {
        "~".to_string()
    } else if let Some(rest) = root.strip_prefix("~/") {
        format!("~/{}", shell_words::quote(rest))
    } else {
        shell_words::quote(root).into_owned()
    };
    format!(
        "find {root_word} -type f -printf {}",
        shell_words::quote(r"%f\t%s\t%p\n")
    )
}

/// Parse one `name<TAB>size<TAB>path` line.
fn parse_line(line_no: usize, line: &str) -> Result<(String, u64, String), ParseError> {
    let fields: Vec<&str> = line.split('\t').collect();
    let [name, size, path] = fields.as_slice() else {
        return Err(ParseError::FieldCount {
            line: line_no,
            found: fields.len(),
        });
    };
    if name.is_empty() {
        return Err(ParseError::EmptyName { line: line_no });
    }
    let size = size.trim().parse::<u64>().map_err(|_| ParseError::BadSize {
        line: line_no,
        value: (*size).to_string(),
    })?;
    Ok(((*name).to_string(), size, (*path).to_string()))
}

/// Candidates parsed from one remote listing.
pub struct RemoteScan {
    host: String,
    root: String,
    lines: std::vec::IntoIter<Vec<u8>>,
    line_no: usize,
    filter: ExtensionFilter,
    stats: ScanStats,
}

impl RemoteScan {
    /// Wrap listing output that has already been fetched.
    pub fn from_output(
        host: impl Into<String>,
        root: impl Into<String>,
        output: impl AsRef<[u8]>,
        filter: &ExtensionFilter,
    ) -> Self {
        let output = output.as_ref();
        let output = output.strip_suffix(b"\n").unwrap_or(output);
        let lines = if output.is_empty() {
            Vec::new()
        } else {
            output.split(|&b| b == b'\n').map(<[u8]>::to_vec).collect()
        };
        Self {
            host: host.into(),
            root: root.into(),
            lines: lines.into_iter(),
            line_no: 0,
            filter: filter.clone(),
            stats: ScanStats::default(),
        }
    }
}

impl RemoteScan {
    fn skip(&mut self, err: &ParseError) {
        warn!(host = %self.host, error = %err, "skipping malformed listing line");
        self.stats.skipped += 1;
    }
}

/// List `root` on `host` through `shell` and parse the result.
pub fn scan_remote(
    shell: &dyn RemoteShell,
    host: &str,
    root: &str,
    filter: &ExtensionFilter,
) -> Result<RemoteScan, ScanError> {
    let output = shell.run(host, &find_command(root))?;
    Ok(RemoteScan::from_output(host, root, &output, filter))
}

impl Iterator for RemoteScan {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            let bytes = self.lines.next()?;
            self.line_no += 1;
            let Ok(line) = std::str::from_utf8(&bytes) else {
                self.skip(&ParseError::NonUtf8 { line: self.line_no });
                continue;
            };
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() {
                continue;
            }

            let (name, size, path) = match parse_line(self.line_no, line) {
                Ok(parsed) => parsed,
                Err(err) => {
                    self.skip(&err);
                    continue;
                }
            };

            if !self.filter.allows(&path) {
                self.stats.filtered += 1;
                continue;
            }

            self.stats.accepted += 1;
            return Some(Candidate::remote(&self.host, path, name, size));
        }
    }
}

impl CandidateStream for RemoteScan {
    fn origin(&self) -> Origin {
        Origin::Remote
    }

    fn host(&self) -> Option<&str> {
        Some(&self.host)
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn stats(&self) -> ScanStats {
        self.stats
    }
}
