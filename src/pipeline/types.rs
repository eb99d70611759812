//! Classification labels and the message lifecycle status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How much handling effort a message needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    High,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::High => "high",
        }
    }
}

impl FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Complexity::Low),
            "high" => Ok(Complexity::High),
            other => Err(format!("unknown complexity: {other}")),
        }
    }
}

/// Emotional tone of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Negative,
    Neutral,
    Positive,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Positive => "positive",
        }
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "negative" => Ok(Sentiment::Negative),
            "neutral" => Ok(Sentiment::Neutral),
            "positive" => Ok(Sentiment::Positive),
            other => Err(format!("unknown sentiment: {other}")),
        }
    }
}

/// Operational lifecycle label of a stored message.
///
/// `New` is assigned at ingestion; the classifier moves a record to one of
/// `Processed`, `NeedsOperator` or `Escalated`. `Closed` is only ever set by
/// an operator outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    New,
    Processed,
    NeedsOperator,
    Escalated,
    Closed,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 5] = [
        MessageStatus::New,
        MessageStatus::Processed,
        MessageStatus::NeedsOperator,
        MessageStatus::Escalated,
        MessageStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::New => "NEW",
            MessageStatus::Processed => "PROCESSED",
            MessageStatus::NeedsOperator => "NEEDS_OPERATOR",
            MessageStatus::Escalated => "ESCALATED",
            MessageStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    /// Case-insensitive: `"escalated"` and `"ESCALATED"` parse alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        MessageStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| format!("unknown status: {s}"))
    }
}

/// Output of the heuristic classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub complexity: Complexity,
    pub sentiment: Sentiment,
    /// Always within `[0.50, 0.99]`, two decimal places.
    pub confidence: f64,
    pub suggested_response: String,
}
