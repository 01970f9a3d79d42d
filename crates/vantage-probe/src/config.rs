//! Startup configuration
//!
//! The probe is configured entirely from its command line. [`Cli`] is the
//! `clap` surface; [`ProbeConfig`] is what the session actually consumes and
//! can also be built directly with the `with_*` methods.

use crate::actions::DEFAULT_HTTP_TIMEOUT;
use crate::environ::DEFAULT_ROOT_VAR;
use clap::Parser;
use std::time::Duration;

/// Pause after a read that found no data on a still-open input
pub const DEFAULT_STALL_INTERVAL: Duration = Duration::from_secs(1);

/// Command-line interface of the `vantage-probe` binary
#[derive(Debug, Parser)]
#[command(name = "vantage-probe", version, about = "Report on the execution context this process runs in")]
pub struct Cli {
    /// A URL to retrieve at startup (repeatable)
    #[arg(long = "probe-url", value_name = "URL")]
    pub probe_urls: Vec<String>,

    /// An executable to run with a single `arg1` argument at startup (repeatable)
    #[arg(long = "probe-command", value_name = "NAME")]
    pub probe_commands: Vec<String>,

    /// A path under the execution root to read at startup (repeatable)
    #[arg(long = "probe-path", value_name = "PATH")]
    pub probe_paths: Vec<String>,

    /// Environment variable naming the execution root
    #[arg(long = "root-var", value_name = "NAME", default_value = DEFAULT_ROOT_VAR)]
    pub root_var: String,

    /// Timeout for each HTTP request, in seconds
    #[arg(
        long = "http-timeout",
        value_name = "SECONDS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub http_timeout: u64,

    /// End the session when standard input is closed
    #[arg(long = "exit-on-eof")]
    pub exit_on_eof: bool,
}

impl Cli {
    /// Turn parsed arguments into a session configuration
    pub fn into_config(self) -> ProbeConfig {
        ProbeConfig {
            startup: StartupProbes {
                urls: self.probe_urls,
                commands: self.probe_commands,
                paths: self.probe_paths,
            },
            root_var: self.root_var,
            http_timeout: Duration::from_secs(self.http_timeout),
            stall_interval: DEFAULT_STALL_INTERVAL,
            exit_on_eof: self.exit_on_eof,
        }
    }
}

/// Probes run once before the first frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupProbes {
    /// URLs to fetch
    pub urls: Vec<String>,
    /// Executables to run
    pub commands: Vec<String>,
    /// Paths to read under the execution root
    pub paths: Vec<String>,
}

impl StartupProbes {
    /// Check if no startup probe is configured
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.commands.is_empty() && self.paths.is_empty()
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Startup probe batches
    pub startup: StartupProbes,
    /// Variable naming the execution root
    pub root_var: String,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// Retry interval for stalled reads
    pub stall_interval: Duration,
    /// Stop when input reaches end-of-file instead of idling
    pub exit_on_eof: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            startup: StartupProbes::default(),
            root_var: DEFAULT_ROOT_VAR.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            stall_interval: DEFAULT_STALL_INTERVAL,
            exit_on_eof: false,
        }
    }
}

impl ProbeConfig {
    /// Add a startup URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.startup.urls.push(url.into());
        self
    }

    /// Add a startup command
    pub fn with_command(mut self, name: impl Into<String>) -> Self {
        self.startup.commands.push(name.into());
        self
    }

    /// Add a startup path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.startup.paths.push(path.into());
        self
    }

    /// Use a different execution-root variable
    pub fn with_root_var(mut self, root_var: impl Into<String>) -> Self {
        self.root_var = root_var.into();
        self
    }

    /// Set the HTTP timeout
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Set the stall retry interval
    pub fn with_stall_interval(mut self, interval: Duration) -> Self {
        self.stall_interval = interval;
        self
    }

    /// Choose what happens when input closes
    pub fn with_exit_on_eof(mut self, exit_on_eof: bool) -> Self {
        self.exit_on_eof = exit_on_eof;
        self
    }
}
