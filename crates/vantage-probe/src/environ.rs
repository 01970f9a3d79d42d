//! Environment snapshot taken at startup

use crate::error::SessionError;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Variable the isolation tool sets to the mounted remote filesystem root
pub const DEFAULT_ROOT_VAR: &str = "TELEPRESENCE_ROOT";

/// Environment variables visible to the probe, captured once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvironmentSnapshot {
    /// Capture the current process environment
    ///
    /// Names or values that are not valid Unicode are converted lossily.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars_os()
                .map(|(name, value)| {
                    (name.to_string_lossy().into_owned(), value.to_string_lossy().into_owned())
                })
                .collect(),
        }
    }

    /// Build a snapshot from explicit pairs
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Look up one variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Directory named by `root_var`
    pub fn execution_root(&self, root_var: &str) -> Result<PathBuf, SessionError> {
        self.get(root_var)
            .map(PathBuf::from)
            .ok_or_else(|| SessionError::MissingExecutionRoot(root_var.to_string()))
    }

    /// All captured variables
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Number of captured variables
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Check if nothing was captured
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
