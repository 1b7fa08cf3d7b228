//! Log output selection for the broker's diagnostic stream.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, for collection by the launching harness.
    #[default]
    Json,
    /// Human-readable single line output for interactive sessions.
    Compact,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formats_case_insensitively() {
        assert_eq!("COMPACT".parse::<LogFormat>().ok(), Some(LogFormat::Compact));
        assert!("pretty".parse::<LogFormat>().is_err());
    }
}
