use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::block::Block;

/// Outcome of executing a transaction or processing a block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    ok: bool,
    messages: Vec<String>,
}

impl ExecutionReport {
    /// A successful report with no messages
    pub fn success() -> Self {
        ExecutionReport {
            ok: true,
            messages: Vec::new(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        ExecutionReport {
            ok: true,
            messages: vec![message.into()],
        }
    }

    pub fn ko(message: impl Into<String>) -> Self {
        ExecutionReport {
            ok: false,
            messages: vec![message.into()],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// Ok only if both sides are ok; messages are concatenated in order
    pub fn combine(mut self, other: ExecutionReport) -> Self {
        self.ok = self.ok && other.ok;
        self.messages.extend(other.messages);
        self
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.ok { "ok" } else { "failed" };
        write!(f, "{}: {}", status, self.messages.join("; "))
    }
}

/// A composed block with the trial-execution report of every input transaction
#[derive(Debug, Clone)]
pub struct BlockReceipts {
    pub block: Block,
    /// One entry per input transaction, in input order
    pub reports: Vec<ExecutionReport>,
}

impl BlockReceipts {
    pub fn included(&self) -> usize {
        self.reports.iter().filter(|r| r.is_ok()).count()
    }

    pub fn excluded(&self) -> usize {
        self.reports.len() - self.included()
    }
}
