//! Execution traces and their persistence
//!
//! An [`ExecutionTrace`] is the append-only log of every decision the
//! scheduler made during one iteration: which operation was scheduled and
//! what every nondeterministic boolean/integer draw returned. Persisted as
//! JSON via [`TraceFile`], a trace can be replayed in another process to
//! reproduce the iteration exactly.
//!
//! Wire format (readers ignore unknown fields):
//! `{"strategy": "...", "seed": N, "decisions": [{"op": 3}, {"bool": 1},
//! {"int": 5, "bound": 8}, {"hash": 123456}]}`

use serde::{Deserialize, Serialize};

use crate::error::{StrategyError, StrategyResult};
use crate::strategy::OperationId;

/// One scheduling or nondeterminism decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "DecisionRepr", try_from = "DecisionRepr")]
pub enum Decision {
    /// Control was transferred to this operation
    ScheduleOp {
        /// Identifier of the scheduled operation
        op: u64,
    },
    /// A nondeterministic boolean draw
    Bool {
        /// The value returned to the program
        value: bool,
    },
    /// A nondeterministic integer draw
    Int {
        /// The value returned to the program
        value: u32,
        /// The exclusive upper bound the program asked for
        bound: u32,
    },
    /// A state fingerprint observation (livelock heuristics)
    Hash {
        /// Stable hash of the scheduler state after the decision
        fingerprint: u64,
    },
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::ScheduleOp { op } => write!(f, "op {}", op),
            Decision::Bool { value } => write!(f, "bool {}", value),
            Decision::Int { value, bound } => write!(f, "int {} (bound {})", value, bound),
            Decision::Hash { fingerprint } => write!(f, "hash {:#x}", fingerprint),
        }
    }
}

/// JSON representation of a decision
///
/// Variant order matters: serde tries them top to bottom and each variant
/// is keyed by a distinct field name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum DecisionRepr {
    Op {
        op: u64,
    },
    Int {
        int: u32,
        bound: u32,
    },
    Bool {
        #[serde(rename = "bool")]
        value: u8,
    },
    Hash {
        hash: u64,
    },
}

impl From<Decision> for DecisionRepr {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::ScheduleOp { op } => DecisionRepr::Op { op },
            Decision::Int { value, bound } => DecisionRepr::Int { int: value, bound },
            Decision::Bool { value } => DecisionRepr::Bool {
                value: u8::from(value),
            },
            Decision::Hash { fingerprint } => DecisionRepr::Hash { hash: fingerprint },
        }
    }
}

impl TryFrom<DecisionRepr> for Decision {
    type Error = String;

    fn try_from(repr: DecisionRepr) -> Result<Self, Self::Error> {
        match repr {
            DecisionRepr::Op { op } => Ok(Decision::ScheduleOp { op }),
            DecisionRepr::Int { int, bound } => Ok(Decision::Int { value: int, bound }),
            DecisionRepr::Bool { value: 0 } => Ok(Decision::Bool { value: false }),
            DecisionRepr::Bool { value: 1 } => Ok(Decision::Bool { value: true }),
            DecisionRepr::Bool { value } => Err(format!("bool decision must be 0 or 1, got {}", value)),
            DecisionRepr::Hash { hash } => Ok(Decision::Hash { fingerprint: hash }),
        }
    }
}

/// Append-only log of scheduling decisions for one iteration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionTrace {
    decisions: Vec<Decision>,
}

impl ExecutionTrace {
    /// Empty trace
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scheduling decision
    pub fn record_scheduled(&mut self, op: OperationId) {
        self.decisions.push(Decision::ScheduleOp { op: op.as_u64() });
    }

    /// Record a nondeterministic boolean draw
    pub fn record_bool(&mut self, value: bool) {
        self.decisions.push(Decision::Bool { value });
    }

    /// Record a nondeterministic integer draw
    pub fn record_int(&mut self, value: u32, bound: u32) {
        self.decisions.push(Decision::Int { value, bound });
    }

    /// Record a state fingerprint
    pub fn record_fingerprint(&mut self, fingerprint: u64) {
        self.decisions.push(Decision::Hash { fingerprint });
    }

    /// Number of recorded decisions
    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    /// Whether the trace holds no decisions
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Decision at an index
    pub fn get(&self, index: usize) -> Option<&Decision> {
        self.decisions.get(index)
    }

    /// All recorded decisions in order
    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    /// Drop all decisions, keeping the allocation
    pub fn clear(&mut self) {
        self.decisions.clear();
    }
}

impl FromIterator<Decision> for ExecutionTrace {
    fn from_iter<I: IntoIterator<Item = Decision>>(iter: I) -> Self {
        Self {
            decisions: iter.into_iter().collect(),
        }
    }
}

/// Persistable trace: decisions plus the metadata needed to replay them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFile {
    /// Description of the strategy that produced the trace
    pub strategy: String,
    /// Iteration seed the trace was produced with
    pub seed: u64,
    /// Recorded decisions in order
    #[serde(default)]
    pub decisions: Vec<Decision>,
}

impl TraceFile {
    /// Bundle a trace with its replay metadata
    pub fn new(strategy: impl Into<String>, seed: u64, trace: &ExecutionTrace) -> Self {
        Self {
            strategy: strategy.into(),
            seed,
            decisions: trace.decisions.clone(),
        }
    }

    /// Serialize to the JSON wire format
    pub fn to_json(&self) -> StrategyResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StrategyError::ReplayDivergence {
            index: 0,
            expected: "serializable trace".to_string(),
            observed: e.to_string(),
        })
    }

    /// Deserialize from the JSON wire format; unknown fields are ignored
    pub fn from_json(json: &str) -> StrategyResult<Self> {
        serde_json::from_str(json).map_err(|e| StrategyError::ReplayDivergence {
            index: 0,
            expected: "well-formed trace JSON".to_string(),
            observed: e.to_string(),
        })
    }

    /// The decisions as an in-memory trace
    pub fn to_trace(&self) -> ExecutionTrace {
        ExecutionTrace {
            decisions: self.decisions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trace() -> ExecutionTrace {
        let mut trace = ExecutionTrace::new();
        trace.record_scheduled(OperationId(0));
        trace.record_bool(true);
        trace.record_int(5, 8);
        trace.record_scheduled(OperationId(2));
        trace.record_fingerprint(0xdead_beef);
        trace.record_bool(false);
        trace
    }

    #[test]
    fn test_json_wire_format() {
        let file = TraceFile::new("random", 42, &sample_trace());
        let json = file.to_json().unwrap();

        assert!(json.contains("\"strategy\""));
        assert!(json.contains("\"seed\": 42"));
        assert!(json.contains("\"op\": 0"));
        assert!(json.contains("\"bool\": 1"));
        assert!(json.contains("\"int\": 5"));
        assert!(json.contains("\"bound\": 8"));
    }

    #[test]
    fn test_round_trip_equality() {
        let file = TraceFile::new("pct:10", 7, &sample_trace());
        let parsed = TraceFile::from_json(&file.to_json().unwrap()).unwrap();
        assert_eq!(parsed, file);
        assert_eq!(parsed.to_trace(), sample_trace());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{"strategy": "random", "seed": 3, "decisions": [{"op": 1}], "tool": "plait"}"#;
        let file = TraceFile::from_json(json).unwrap();
        assert_eq!(file.seed, 3);
        assert_eq!(file.decisions, vec![Decision::ScheduleOp { op: 1 }]);
    }

    #[test]
    fn test_bool_decision_must_be_binary() {
        let json = r#"{"strategy": "random", "seed": 0, "decisions": [{"bool": 2}]}"#;
        assert!(TraceFile::from_json(json).is_err());
    }

    #[test]
    fn test_missing_decisions_defaults_to_empty() {
        let file = TraceFile::from_json(r#"{"strategy": "random", "seed": 0}"#).unwrap();
        assert!(file.decisions.is_empty());
    }
}
