//! Status rules: classification output → lifecycle status.
//!
//! A flat priority rule, evaluated top to bottom:
//! - negative sentiment → `Escalated` (regardless of complexity)
//! - high complexity → `NeedsOperator`
//! - otherwise → `Processed`

use crate::pipeline::types::{Analysis, Complexity, MessageStatus, Sentiment};

/// Target status for a classified message.
pub fn decide_status(complexity: Complexity, sentiment: Sentiment) -> MessageStatus {
    if sentiment == Sentiment::Negative {
        return MessageStatus::Escalated;
    }
    match complexity {
        Complexity::High => MessageStatus::NeedsOperator,
        Complexity::Low => MessageStatus::Processed,
    }
}

/// Convenience wrapper over [`decide_status`].
pub fn status_for(analysis: &Analysis) -> MessageStatus {
    decide_status(analysis.complexity, analysis.sentiment)
}
