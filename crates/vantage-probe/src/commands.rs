//! Command dispatch
//!
//! Control lines are parsed against the static command table in
//! `vantage_proto::message`; this module runs the parsed command and
//! shapes its response frame.

use crate::actions::{probe_urls, HttpProber};
use crate::error::{into_outcome, ProbeError};
use futures::StreamExt;
use tracing::{info, warn};
use vantage_proto::{Command, CommandError, Frame, Outcome, ProtocolError};

/// Acknowledgement sent in reply to `stop`
pub const STOP_ACK: &str = "stopping";

/// What the session should send, and whether to keep going afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Response frame
    pub frame: Frame,
    /// End the session once the frame is written
    pub stop: bool,
}

impl Reply {
    fn respond(frame: Frame) -> Self {
        Self { frame, stop: false }
    }
}

/// Run one command
pub async fn execute(command: Command, http: &HttpProber) -> Result<Reply, ProtocolError> {
    info!("Read command: {}", command.name());

    match command {
        Command::ProbeUrl(urls) => {
            let results: Vec<(String, Outcome)> = probe_urls(http, urls)
                .map(|(url, result)| (url, into_outcome(result)))
                .collect()
                .await;
            Ok(Reply::respond(Frame::json(&results)?))
        }
        Command::ProbeAlsoProxy(hostname) => {
            let outcome = into_outcome(http.probe_also_proxy(&hostname).await);
            Ok(Reply::respond(Frame::json(&outcome)?))
        }
        Command::Stop => Ok(Reply {
            frame: Frame::json(&Outcome::Ok(STOP_ACK.to_string()))?,
            stop: true,
        }),
    }
}

/// Answer a line that did not parse into a command
pub fn reject(err: CommandError) -> Result<Reply, ProtocolError> {
    let err = ProbeError::from(err);
    warn!(kind = ?err.kind(), "Rejected command: {}", err);
    Ok(Reply::respond(Frame::json(&Outcome::Failed(err.detail()))?))
}

/// Parse and run one control line
///
/// Returns `Ok(None)` for a line that holds no tokens.
pub async fn dispatch(line: &str, http: &HttpProber) -> Result<Option<Reply>, ProtocolError> {
    match Command::parse(line) {
        Ok(Some(command)) => execute(command, http).await.map(Some),
        Ok(None) => Ok(None),
        Err(err) => reject(err).map(Some),
    }
}
