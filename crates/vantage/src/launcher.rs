//! Starting probe processes

use crate::{ProbeClient, Result, VantageError};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

/// Builder for a probe process
///
/// The probe can be started directly or through a wrapper that places it in
/// the execution context under test (`kubectl exec`, `docker exec`, `ssh`
/// and the like). Probe arguments are appended after the wrapper's own.
#[derive(Debug, Clone)]
pub struct ProbeLauncher {
    /// Probe executable
    program: PathBuf,
    /// Wrapper program and its arguments
    wrapper: Option<(OsString, Vec<OsString>)>,
    /// Startup URLs
    urls: Vec<String>,
    /// Startup commands
    commands: Vec<String>,
    /// Startup paths
    paths: Vec<String>,
    /// Execution-root variable override
    root_var: Option<String>,
    /// HTTP timeout override
    http_timeout: Option<Duration>,
    /// Stop when the control channel closes
    exit_on_eof: bool,
    /// Extra environment for the child
    envs: Vec<(OsString, OsString)>,
    /// Bound on waiting for each frame
    timeout: Option<Duration>,
}

impl ProbeLauncher {
    /// Launch `program` as the probe
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            wrapper: None,
            urls: Vec::new(),
            commands: Vec::new(),
            paths: Vec::new(),
            root_var: None,
            http_timeout: None,
            exit_on_eof: false,
            envs: Vec::new(),
            timeout: None,
        }
    }

    /// Run the probe through a wrapper command
    pub fn wrapped_in<I, S>(mut self, program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.wrapper = Some((program.into(), args.into_iter().map(Into::into).collect()));
        self
    }

    /// Fetch `url` at startup
    pub fn probe_url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    /// Run `name` at startup
    pub fn probe_command(mut self, name: impl Into<String>) -> Self {
        self.commands.push(name.into());
        self
    }

    /// Read `path` under the execution root at startup
    pub fn probe_path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Name of the variable holding the execution root
    pub fn root_var(mut self, name: impl Into<String>) -> Self {
        self.root_var = Some(name.into());
        self
    }

    /// Per-request HTTP timeout inside the probe (whole seconds, at least one)
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// Have the probe exit once its control channel closes
    pub fn exit_on_eof(mut self, exit_on_eof: bool) -> Self {
        self.exit_on_eof = exit_on_eof;
        self
    }

    /// Set an environment variable for the launched process
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Bound on waiting for each frame from the probe
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Arguments passed to the probe itself
    pub fn probe_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        for url in &self.urls {
            args.push("--probe-url".into());
            args.push(url.into());
        }
        for name in &self.commands {
            args.push("--probe-command".into());
            args.push(name.into());
        }
        for path in &self.paths {
            args.push("--probe-path".into());
            args.push(path.into());
        }
        if let Some(root_var) = &self.root_var {
            args.push("--root-var".into());
            args.push(root_var.into());
        }
        if let Some(timeout) = self.http_timeout {
            args.push("--http-timeout".into());
            args.push(timeout.as_secs().max(1).to_string().into());
        }
        if self.exit_on_eof {
            args.push("--exit-on-eof".into());
        }
        args
    }

    fn command(&self) -> Command {
        let mut command = match &self.wrapper {
            Some((program, args)) => {
                let mut command = Command::new(program);
                command.args(args).arg(&self.program);
                command
            }
            None => Command::new(&self.program),
        };

        command
            .args(self.probe_args())
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }

    /// Start the probe
    pub fn spawn(&self) -> Result<ProbeProcess> {
        let mut child = self
            .command()
            .spawn()
            .map_err(|e| VantageError::Spawn(format!("{}: {}", self.program.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| VantageError::Spawn("probe stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VantageError::Spawn("probe stdout not captured".to_string()))?;

        info!("Started probe {} (pid {:?})", self.program.display(), child.id());

        let mut client = ProbeClient::new(stdout, stdin);
        if let Some(timeout) = self.timeout {
            client = client.with_timeout(timeout);
        }

        Ok(ProbeProcess { child, client })
    }
}

/// A running probe and the client talking to it
pub struct ProbeProcess {
    child: Child,
    client: ProbeClient<ChildStdout, ChildStdin>,
}

impl ProbeProcess {
    /// Client for the probe's session
    pub fn client(&mut self) -> &mut ProbeClient<ChildStdout, ChildStdin> {
        &mut self.client
    }

    /// OS process id, while the process is running
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Ask the probe to stop and wait for it to exit
    pub async fn stop(mut self) -> Result<ExitStatus> {
        self.client.stop().await?;
        let status = self.child.wait().await?;
        debug!("Probe exited: {}", status);
        Ok(status)
    }

    /// Kill the probe without asking
    pub async fn kill(mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }
}
