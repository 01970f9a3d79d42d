//! Wire message types and control commands
//!
//! Every payload is JSON. Individual probe results travel as two-element
//! arrays, `[true, value]` or `[false, detail]`, where the detail's shape
//! (string, integer or `null`) tells the reader what kind of failure it was.

use crate::CommandError;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Failure detail as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detail {
    /// Human-readable description, serialized as a string
    Message(String),
    /// Process exit code, serialized as an integer
    ExitCode(i32),
    /// Subject does not exist, serialized as `null`
    NotFound,
}

impl Serialize for Detail {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Message(message) => serializer.serialize_str(message),
            Self::ExitCode(code) => serializer.serialize_i32(*code),
            Self::NotFound => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Detail {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DetailVisitor;

        impl<'de> Visitor<'de> for DetailVisitor {
            type Value = Detail;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a message string, an exit code or null")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Detail, E> {
                Ok(Detail::Message(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Detail, E> {
                i32::try_from(v)
                    .map(Detail::ExitCode)
                    .map_err(|_| E::custom(format!("exit code out of range: {}", v)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Detail, E> {
                i32::try_from(v)
                    .map(Detail::ExitCode)
                    .map_err(|_| E::custom(format!("exit code out of range: {}", v)))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Detail, E> {
                Ok(Detail::NotFound)
            }

            fn visit_none<E: de::Error>(self) -> Result<Detail, E> {
                Ok(Detail::NotFound)
            }
        }

        deserializer.deserialize_any(DetailVisitor)
    }
}

impl fmt::Display for Detail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(message) => f.write_str(message),
            Self::ExitCode(code) => write!(f, "exit code {}", code),
            Self::NotFound => f.write_str("not found"),
        }
    }
}

/// Outcome of one probe as carried on the wire: `[ok, value_or_detail]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Probe succeeded with this text
    Ok(String),
    /// Probe failed
    Failed(Detail),
}

impl Outcome {
    /// Check if the probe succeeded
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Successful value, if any
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Failed(_) => None,
        }
    }

    /// Failure detail, if any
    pub fn detail(&self) -> Option<&Detail> {
        match self {
            Self::Ok(_) => None,
            Self::Failed(detail) => Some(detail),
        }
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        match self {
            Self::Ok(value) => {
                tuple.serialize_element(&true)?;
                tuple.serialize_element(value)?;
            }
            Self::Failed(detail) => {
                tuple.serialize_element(&false)?;
                tuple.serialize_element(detail)?;
            }
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for Outcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OutcomeVisitor;

        impl<'de> Visitor<'de> for OutcomeVisitor {
            type Value = Outcome;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a two-element [ok, value] array")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Outcome, A::Error> {
                let ok: bool = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let outcome = if ok {
                    Outcome::Ok(seq.next_element()?.ok_or_else(|| de::Error::invalid_length(1, &self))?)
                } else {
                    Outcome::Failed(seq.next_element()?.ok_or_else(|| de::Error::invalid_length(1, &self))?)
                };
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(3, &self));
                }
                Ok(outcome)
            }
        }

        deserializer.deserialize_tuple(2, OutcomeVisitor)
    }
}

/// First frame emitted by the probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupReport {
    /// Environment visible to the probe at startup
    pub environ: BTreeMap<String, String>,
    /// Startup URL fetches, in configuration order
    #[serde(rename = "probe-urls")]
    pub probe_urls: Vec<(String, Outcome)>,
    /// Startup command runs, in configuration order
    #[serde(rename = "probe-commands")]
    pub probe_commands: Vec<(String, Outcome)>,
    /// Startup file reads; `None` when the file could not be read
    #[serde(rename = "probe-paths")]
    pub probe_paths: Vec<(String, Option<String>)>,
}

/// Number of positional arguments a command accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many
    Exactly(usize),
    /// This many or more
    AtLeast(usize),
}

impl Arity {
    /// Check whether `count` arguments are acceptable
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Self::Exactly(n) => count == n,
            Self::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (qualifier, n) = match self {
            Self::Exactly(n) => ("exactly", n),
            Self::AtLeast(n) => ("at least", n),
        };
        let noun = if *n == 1 { "argument" } else { "arguments" };
        write!(f, "{} {} {}", qualifier, n, noun)
    }
}

/// Entry of the command table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Name as typed on the control channel
    pub name: &'static str,
    /// Accepted argument count
    pub arity: Arity,
}

/// Fetch URLs from inside the execution context
pub const PROBE_URL: &str = "probe-url";
/// Fetch the IP-echo service through a host with a forced `Host` header
pub const PROBE_ALSO_PROXY: &str = "probe-also-proxy";
/// End the session
pub const STOP: &str = "stop";

/// Every command the probe understands
pub static COMMAND_TABLE: [CommandSpec; 3] = [
    CommandSpec { name: PROBE_URL, arity: Arity::AtLeast(0) },
    CommandSpec { name: PROBE_ALSO_PROXY, arity: Arity::Exactly(1) },
    CommandSpec { name: STOP, arity: Arity::Exactly(0) },
];

/// Look up a command by name
pub fn command_spec(name: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|spec| spec.name == name)
}

/// A parsed control-channel command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `probe-url <url>...`
    ProbeUrl(Vec<String>),
    /// `probe-also-proxy <hostname>`
    ProbeAlsoProxy(String),
    /// `stop`
    Stop,
}

impl Command {
    /// Parse one control line
    ///
    /// Returns `Ok(None)` for a line without tokens.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut tokens = line.split_whitespace();
        let Some(name) = tokens.next() else {
            return Ok(None);
        };
        let args: Vec<String> = tokens.map(str::to_string).collect();

        let spec = command_spec(name).ok_or_else(|| CommandError::Unknown(name.to_string()))?;
        if !spec.arity.accepts(args.len()) {
            return Err(CommandError::InvalidArguments {
                command: spec.name,
                expected: spec.arity,
                got: args.len(),
            });
        }

        let command = match spec.name {
            PROBE_URL => Self::ProbeUrl(args),
            PROBE_ALSO_PROXY => Self::ProbeAlsoProxy(args.into_iter().next().unwrap_or_default()),
            STOP => Self::Stop,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }

    /// Command name
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProbeUrl(_) => PROBE_URL,
            Self::ProbeAlsoProxy(_) => PROBE_ALSO_PROXY,
            Self::Stop => STOP,
        }
    }

    /// Render as a control line, without the trailing newline
    pub fn to_line(&self) -> String {
        match self {
            Self::ProbeUrl(urls) if urls.is_empty() => PROBE_URL.to_string(),
            Self::ProbeUrl(urls) => format!("{} {}", PROBE_URL, urls.join(" ")),
            Self::ProbeAlsoProxy(hostname) => format!("{} {}", PROBE_ALSO_PROXY, hostname),
            Self::Stop => STOP.to_string(),
        }
    }
}
