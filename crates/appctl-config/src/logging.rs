//! Log encodings understood by the host subscriber.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How the host renders `tracing` events on standard error.
///
/// Parsing is case-insensitive, so `APPCTL_LOG_FORMAT=Compact` is accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[derive(Deserialize, Serialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Flattened JSON objects, one per line.
    #[default]
    Json,
    /// Terse single-line text.
    Compact,
}

impl LogFormat {
    /// Whether events carry ANSI colour codes when written to `terminal`.
    ///
    /// JSON lines stay plain so collectors can parse them.
    #[must_use]
    pub const fn colourised(self, terminal: bool) -> bool {
        match self {
            Self::Json => false,
            Self::Compact => terminal,
        }
    }
}

/// Rejection produced by `str::parse::<LogFormat>`.
pub type LogFormatParseError = strum::ParseError;
