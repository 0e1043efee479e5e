use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Why a build should run. Ordered by strength so duplicate-request
/// handling can compare requests: a force build beats a conditional
/// one.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BuildCondition {
    NoBuild,
    IfModificationExists,
    ForceBuild,
}

/// The lifecycle state of one build as reported over the wire. Build
/// outcomes are always a status value, never an RPC fault.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BuildStatus {
    /// Not finished yet, or not known to this side at all.
    Unknown,
    Success,
    Failure,
    Exception,
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// The outcome recorded for a finished build. A runner that never
    /// reported anything beyond `Unknown` counts as a success.
    pub fn normalize(self) -> Self {
        match self {
            Self::Unknown => Self::Success,
            other => other,
        }
    }
}

/// Identifier of one build on one agent. Numeric internally, but always
/// a string on the wire so clients never depend on its shape.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
    Serialize,
    Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct BuildId(u64);

impl From<BuildId> for String {
    fn from(id: BuildId) -> Self {
        id.0.to_string()
    }
}

impl TryFrom<String> for BuildId {
    type Error = std::num::ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for BuildId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}
