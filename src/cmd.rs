//! Command execution adapter for the control-plane databases
//!
//! Builds and runs `ovs-vsctl` / `ovn-nbctl` / `ovn-sbctl` invocations.
//! Argument construction is separated from process execution so the flag
//! wiring (connection prefix, positional SSL flags, staged descriptors) can
//! be tested without spawning anything.

use std::os::fd::{AsRawFd, RawFd};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::credentials::CredentialBundle;
use crate::error::{Error, Result};
use crate::memfile::MemFile;

/// Connection timeout passed to every external invocation, in seconds.
pub const OVSDB_TIMEOUT_SECS: u64 = 10;

/// First descriptor number staged credentials occupy in the child process.
const CHILD_FD_BASE: i32 = 3;

/// Marker identifying SSL connection strings (e.g. "ssl:192.0.2.1:6641").
pub(crate) const SSL_SCHEME: &str = "ssl:";

/// The control-plane database a command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Database {
    /// Local Open vSwitch database
    Switch,
    /// OVN northbound (logical topology) database
    Northbound,
    /// OVN southbound (physical bindings) database
    Southbound,
}

impl Database {
    /// Command-line tool controlling this database.
    pub fn command(&self) -> &'static str {
        match self {
            Database::Switch => "ovs-vsctl",
            Database::Northbound => "ovn-nbctl",
            Database::Southbound => "ovn-sbctl",
        }
    }

    /// Well-known local socket used when no address is configured.
    pub fn default_address(&self) -> &'static str {
        match self {
            Database::Switch => "unix:/var/run/openvswitch/db.sock",
            Database::Northbound => "unix:/var/run/ovn/ovnnb_db.sock",
            Database::Southbound => "unix:/var/run/ovn/ovnsb_db.sock",
        }
    }
}

/// One external command: ordered argument list plus the staged files the
/// child must inherit.
pub(crate) struct Invocation {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) files: Vec<MemFile>,
}

impl Invocation {
    /// Starts an invocation against `database`, always prefixed with the
    /// connection timeout and an explicit endpoint flag.
    pub(crate) fn new(database: Database, db_addr: &str) -> Invocation {
        Invocation {
            program: database.command().to_string(),
            args: vec![
                format!("--timeout={OVSDB_TIMEOUT_SECS}"),
                "--db".to_string(),
                resolve_unix_endpoint(db_addr),
            ],
            files: Vec::new(),
        }
    }

    pub(crate) fn args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
    }

    /// Stages the three credential files and appends the matching SSL
    /// flags. The order is fixed: CA certificate, client certificate,
    /// client key land on descriptors 3, 4, 5 and the flags are positional
    /// references to those paths.
    pub(crate) fn ssl_credentials(&mut self, credentials: &CredentialBundle) -> Result<()> {
        self.files
            .push(MemFile::new("ovn-ca-cert", credentials.ca_cert.as_bytes())?);
        self.files.push(MemFile::new(
            "ovn-client-cert",
            credentials.client_cert.as_bytes(),
        )?);
        self.files.push(MemFile::new(
            "ovn-client-key",
            credentials.client_key.as_bytes(),
        )?);

        self.args([
            "-C",
            "/proc/self/fd/3",
            "-c",
            "/proc/self/fd/4",
            "-p",
            "/proc/self/fd/5",
        ]);

        Ok(())
    }
}

/// Seam between command construction and process execution. Production code
/// uses [`SystemRunner`]; tests substitute an in-memory switch.
#[async_trait]
pub(crate) trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: Invocation) -> Result<String>;
}

/// Runs invocations as real child processes.
pub(crate) struct SystemRunner {
    deadline: Duration,
}

impl SystemRunner {
    pub(crate) fn new() -> SystemRunner {
        // The tools enforce OVSDB_TIMEOUT_SECS themselves; the wall-clock
        // deadline only has to catch a tool that wedges before connecting.
        SystemRunner {
            deadline: Duration::from_secs(OVSDB_TIMEOUT_SECS + 5),
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, invocation: Invocation) -> Result<String> {
        let Invocation {
            program,
            args,
            files,
        } = invocation;

        debug!(program = program.as_str(), ?args, "Running control-plane command");

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !files.is_empty() {
            let raw_fds: Vec<RawFd> = files.iter().map(|f| f.as_raw_fd()).collect();
            unsafe {
                cmd.pre_exec(move || remap_child_fds(&raw_fds));
            }
        }

        let output = tokio::time::timeout(self.deadline, cmd.output())
            .await
            .map_err(|_| Error::Timeout {
                program: program.clone(),
            })?
            .map_err(Error::Io)?;

        // The staged descriptors stay open until the child has exited.
        drop(files);

        if !output.status.success() {
            return Err(Error::Command {
                program,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Remaps staged descriptors to the fixed child-side numbers. Runs between
/// fork and exec, so only async-signal-safe calls are allowed here.
fn remap_child_fds(fds: &[RawFd]) -> std::io::Result<()> {
    let mut parked = [0 as RawFd; 3];
    if fds.len() > parked.len() {
        return Err(std::io::Error::from(std::io::ErrorKind::InvalidInput));
    }

    // Park every staged descriptor above the target range first, so that
    // one dup2 cannot clobber a descriptor still waiting to be remapped.
    for (slot, &fd) in parked.iter_mut().zip(fds) {
        let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD, 16) };
        if dup < 0 {
            return Err(std::io::Error::last_os_error());
        }

        *slot = dup;
    }

    // dup2 clears close-on-exec on the target descriptor.
    for (i, &fd) in parked[..fds.len()].iter().enumerate() {
        if unsafe { libc::dup2(fd, CHILD_FD_BASE + i as RawFd) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    Ok(())
}

/// Follows Unix socket paths to their real location. The daemon may run
/// under a different filesystem root than the switch daemons, with the
/// socket reachable only through a symlink chain.
fn resolve_unix_endpoint(db_addr: &str) -> String {
    match db_addr.strip_prefix("unix:") {
        Some(path) => match std::fs::canonicalize(path) {
            Ok(resolved) => format!("unix:{}", resolved.display()),
            Err(_) => db_addr.to_string(),
        },
        None => db_addr.to_string(),
    }
}
