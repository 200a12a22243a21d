use ethers::types::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Round outcome consumed by the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    Done,
    NoMajority,
    RoundTimeout,
    NoAction,
    BadSubmission,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Done => "DONE",
            Event::NoMajority => "NO_MAJORITY",
            Event::RoundTimeout => "ROUND_TIMEOUT",
            Event::NoAction => "NO_ACTION",
            Event::BadSubmission => "BAD_SUBMISSION",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Event {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "DONE" => Ok(Event::Done),
            "NO_MAJORITY" => Ok(Event::NoMajority),
            "ROUND_TIMEOUT" => Ok(Event::RoundTimeout),
            "NO_ACTION" => Ok(Event::NoAction),
            "BAD_SUBMISSION" => Ok(Event::BadSubmission),
            _ => Err(format!("Unknown event: {}", s)),
        }
    }
}

/// One agent's contribution to a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub sender: Address,
    pub content: Value,
}

impl Payload {
    pub fn new(sender: Address, content: impl Into<Value>) -> Self {
        Self {
            sender,
            content: content.into(),
        }
    }

    /// Canonical form used to compare contents across agents. `serde_json`
    /// maps keep their keys sorted, so equal contents print identically.
    pub fn canonical(&self) -> String {
        self.content.to_string()
    }
}
