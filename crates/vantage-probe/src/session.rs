//! Session loop: startup report, then read-dispatch-respond

use crate::actions::{probe_commands, probe_paths, probe_urls, HttpProber};
use crate::commands;
use crate::config::ProbeConfig;
use crate::environ::EnvironmentSnapshot;
use crate::error::{into_outcome, ErrorKind, SessionError};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::io;
use std::time::Duration;
use tokio::io::{stdin, stdout, AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use vantage_proto::{Frame, FrameCodec, StartupReport};

/// State of the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    /// Peer may still send lines
    WaitingForData,
    /// End of input was reached
    Closed,
}

/// Line reader over the control channel
///
/// A read that reports no data while the channel is still open
/// (`WouldBlock`, `Interrupted`) is a stall: the reader sleeps for the stall
/// interval and tries again, keeping any partial line it already has.
pub struct LineInput<R> {
    reader: BufReader<R>,
    state: InputState,
    stall_interval: Duration,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineInput<R> {
    /// Wrap a reader
    pub fn new(reader: R, stall_interval: Duration) -> Self {
        Self {
            reader: BufReader::new(reader),
            state: InputState::WaitingForData,
            stall_interval,
            pending: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> InputState {
        self.state
    }

    /// Next line, including its terminator if one was read
    ///
    /// Returns `Ok(None)` once the channel is closed. A final line without a
    /// newline is still returned before that.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if self.state == InputState::Closed {
                return Ok(None);
            }

            match self.reader.read_until(b'\n', &mut self.pending).await {
                Ok(0) if self.pending.is_empty() => {
                    info!("Input closed");
                    self.state = InputState::Closed;
                    return Ok(None);
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&self.pending).into_owned();
                    self.pending.clear();
                    return Ok(Some(line));
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                    debug!("No input available, retrying in {:?}", self.stall_interval);
                    tokio::time::sleep(self.stall_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// The probe's whole runtime: one startup frame, then one frame per command
pub struct SessionLoop<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Control channel (typically stdin)
    input: LineInput<R>,
    /// Frame channel (typically stdout)
    writer: W,
    /// Frame codec for encoding
    codec: FrameCodec,
    /// HTTP client shared by every URL probe
    http: HttpProber,
    /// Environment captured at construction
    environ: EnvironmentSnapshot,
    /// Startup configuration
    config: ProbeConfig,
    /// Shutdown signal receiver
    shutdown_rx: Option<oneshot::Receiver<()>>,
    /// Shutdown signal sender (kept for graceful shutdown)
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl SessionLoop<tokio::io::Stdin, tokio::io::Stdout> {
    /// Create a session over stdin/stdout
    pub fn new(config: ProbeConfig) -> Result<Self, SessionError> {
        Self::with_io(stdin(), stdout(), config)
    }
}

impl<R, W> SessionLoop<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a session with a custom reader/writer
    pub fn with_io(reader: R, writer: W, config: ProbeConfig) -> Result<Self, SessionError> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Ok(Self {
            input: LineInput::new(reader, config.stall_interval),
            writer,
            codec: FrameCodec::new(),
            http: HttpProber::new(config.http_timeout)?,
            environ: EnvironmentSnapshot::capture(),
            config,
            shutdown_rx: Some(shutdown_rx),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Replace the captured environment
    pub fn with_environment(mut self, environ: EnvironmentSnapshot) -> Self {
        self.environ = environ;
        self
    }

    /// Get shutdown sender for graceful shutdown
    pub fn shutdown_sender(&mut self) -> Option<oneshot::Sender<()>> {
        self.shutdown_tx.take()
    }

    /// Environment reported at startup
    pub fn environment(&self) -> &EnvironmentSnapshot {
        &self.environ
    }

    /// Consume the session, returning the frame writer
    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Run the session until `stop`, shutdown, or (with `exit_on_eof`) end of input
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting probe session");

        let report = self.startup_report().await.context("Startup probes failed")?;
        let frame = Frame::json(&report).context("Failed to encode startup report")?;
        self.send(&frame).await?;
        info!("Sent startup report");

        let shutdown_rx = self.shutdown_rx.take()
            .context("Shutdown receiver already taken")?;
        let shutdown = shutdown_requested(shutdown_rx);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Received shutdown signal, stopping session");
                    break;
                }

                line = self.input.next_line() => {
                    match line.context("Failed to read from control channel")? {
                        Some(line) => {
                            debug!("Read line: {:?}", line);
                            let reply = commands::dispatch(&line, &self.http).await
                                .context("Failed to encode response")?;
                            let Some(reply) = reply else {
                                debug!("Ignoring blank line");
                                continue;
                            };
                            self.send(&reply.frame).await?;
                            debug!("Dumped response");
                            if reply.stop {
                                info!("Stop requested");
                                break;
                            }
                        }
                        None if self.config.exit_on_eof => break,
                        None => {
                            info!("Control channel closed, idling until shutdown");
                            (&mut shutdown).await;
                            info!("Received shutdown signal, stopping session");
                            break;
                        }
                    }
                }
            }
        }

        info!("Goodbye.");
        Ok(())
    }

    /// Run the startup probes and gather the first report
    pub async fn startup_report(&self) -> Result<StartupReport, SessionError> {
        let startup = &self.config.startup;

        let root = if startup.paths.is_empty() {
            None
        } else {
            Some(self.environ.execution_root(&self.config.root_var)?)
        };

        let probe_urls = probe_urls(&self.http, startup.urls.clone())
            .map(|(url, result)| (url, into_outcome(result)))
            .collect()
            .await;

        let probe_commands = probe_commands(startup.commands.clone())
            .map(|(name, result)| (name, into_outcome(result)))
            .collect()
            .await;

        let probe_paths = match root {
            Some(root) => {
                probe_paths(&root, startup.paths.clone())
                    .map(|(path, result)| {
                        let contents = result
                            .map_err(|e| {
                                if e.kind() != ErrorKind::FileNotFound {
                                    warn!(kind = ?e.kind(), "Reporting unreadable {} as missing: {}", path, e);
                                }
                            })
                            .ok();
                        (path, contents)
                    })
                    .collect()
                    .await
            }
            None => Vec::new(),
        };

        Ok(StartupReport {
            environ: self.environ.vars().clone(),
            probe_urls,
            probe_commands,
            probe_paths,
        })
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        self.codec.write_frame(&mut self.writer, frame).await
            .context("Failed to write frame")?;
        debug!("Sent frame: payload_size={}", frame.payload_size());
        Ok(())
    }
}

/// Resolves once shutdown is signalled; a dropped sender never signals it
async fn shutdown_requested(shutdown_rx: oneshot::Receiver<()>) {
    if shutdown_rx.await.is_err() {
        debug!("Shutdown sender dropped");
        std::future::pending::<()>().await;
    }
}
