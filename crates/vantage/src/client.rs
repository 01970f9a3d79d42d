//! Client side of the probe protocol

use crate::{Result, VantageError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use vantage_proto::{Command, Frame, FrameCodec, Outcome, StartupReport};

/// Drives one probe session over its output and control channels
///
/// The first frame a probe emits is always its [`StartupReport`]; the client
/// reads and caches it on first use, so commands can be sent straight away.
pub struct ProbeClient<R, W> {
    /// Probe output (frames mixed with noise)
    reader: R,
    /// Probe control channel
    writer: W,
    /// Frame decoder
    codec: FrameCodec,
    /// Startup report, once read
    startup: Option<StartupReport>,
    /// Bound on waiting for each frame
    timeout: Option<Duration>,
}

impl<R, W> ProbeClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap a probe's output and control channels
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            codec: FrameCodec::new(),
            startup: None,
            timeout: None,
        }
    }

    /// Fail any wait for a frame that takes longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Startup report, reading it if necessary
    pub async fn startup_report(&mut self) -> Result<&StartupReport> {
        if self.startup.is_none() {
            let report = self.next_frame().await?.parse_json()?;
            self.startup = Some(report);
        }
        self.startup
            .as_ref()
            .ok_or_else(|| VantageError::UnexpectedResponse("missing startup report".to_string()))
    }

    /// Fetch URLs from inside the execution context
    pub async fn probe_urls<S: AsRef<str>>(&mut self, urls: &[S]) -> Result<Vec<(String, Outcome)>> {
        let urls = urls.iter().map(|url| url.as_ref().to_string()).collect();
        self.request(&Command::ProbeUrl(urls)).await
    }

    /// Ask the IP-echo service, through `hostname`, which address the probe's traffic leaves from
    pub async fn probe_also_proxy(&mut self, hostname: &str) -> Result<Outcome> {
        self.request(&Command::ProbeAlsoProxy(hostname.to_string())).await
    }

    /// End the session
    pub async fn stop(&mut self) -> Result<()> {
        match self.request::<Outcome>(&Command::Stop).await? {
            Outcome::Ok(_) => Ok(()),
            other => Err(VantageError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Send a command and decode its response
    pub async fn request<T: DeserializeOwned>(&mut self, command: &Command) -> Result<T> {
        self.send_line(&command.to_line()).await?;
        Ok(self.next_frame().await?.parse_json()?)
    }

    /// Send an arbitrary control line and return the raw response
    ///
    /// The line must hold at least one token; the probe does not answer
    /// blank lines.
    pub async fn request_raw(&mut self, line: &str) -> Result<Value> {
        self.send_line(line).await?;
        Ok(self.next_frame().await?.parse_json()?)
    }

    /// Number of noise bytes skipped so far
    pub fn discarded_bytes(&self) -> usize {
        self.codec.discarded_bytes()
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        if self.startup.is_none() {
            self.startup_report().await?;
        }

        debug!("Sending command: {}", line);
        let mut data = line.trim_end_matches('\n').as_bytes().to_vec();
        data.push(b'\n');
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Frame> {
        let timeout = self.timeout;
        let read = self.codec.read_frame(&mut self.reader);
        let frame = with_timeout(timeout, read).await??;
        let frame = frame.ok_or(VantageError::ProbeExited)?;
        debug!("Received frame: payload_size={}", frame.payload_size());
        Ok(frame)
    }
}

async fn with_timeout<F: Future>(timeout: Option<Duration>, future: F) -> Result<F::Output> {
    match timeout {
        Some(duration) => tokio::time::timeout(duration, future)
            .await
            .map_err(|_| VantageError::Timeout { duration }),
        None => Ok(future.await),
    }
}
