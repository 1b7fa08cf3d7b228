//! Broker policies that the bootstrap protocol leaves open.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What check-in does when the name already has an active entry.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CheckInPolicy {
    /// Answer `NAME_IN_USE` and keep the existing entry.
    #[default]
    Reject,
    /// Release the existing capability and check the name in afresh.
    Replace,
}

/// How look-ups for names that are not registered yet are answered.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LookupPolicy {
    /// Answer `UNKNOWN_SERVICE` straight away.
    #[default]
    Immediate,
    /// Hold the request until the name is registered or the bounded wait
    /// elapses.
    Wait,
}

/// Capability transport the broker listens on.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TransportKind {
    /// Mach ports; children receive the broker as their bootstrap port.
    Mach,
    /// Unix datagram sockets with descriptor passing.
    Unix,
}

impl Default for TransportKind {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Self::Mach
        } else {
            Self::Unix
        }
    }
}

/// Service names answered `UNKNOWN_SERVICE` without consulting the registry.
///
/// Entries match by prefix. Accepts a comma-separated string on the command
/// line and in the environment, or a list in configuration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "DenyListRepr", into = "Vec<String>")]
pub struct DenyList(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum DenyListRepr {
    Text(String),
    Items(Vec<String>),
}

impl DenyList {
    /// Builds a deny list from its entries.
    #[must_use]
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|entry| {
                    let text: String = entry.into();
                    text.trim().to_owned()
                })
                .filter(|entry| !entry.is_empty())
                .collect(),
        )
    }

    /// Whether `name` starts with any entry.
    #[must_use]
    pub fn denies(&self, name: &str) -> bool {
        self.0.iter().any(|entry| name.starts_with(entry.as_str()))
    }

    /// The configured entries.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.0
    }
}

impl From<DenyListRepr> for DenyList {
    fn from(repr: DenyListRepr) -> Self {
        match repr {
            DenyListRepr::Text(text) => Self::new(text.split(',')),
            DenyListRepr::Items(items) => Self::new(items),
        }
    }
}

impl From<DenyList> for Vec<String> {
    fn from(list: DenyList) -> Self {
        list.0
    }
}

impl FromStr for DenyList {
    type Err = Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(input.split(',')))
    }
}

impl fmt::Display for DenyList {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0.join(","))
    }
}
