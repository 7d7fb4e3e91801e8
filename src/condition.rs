//! Condition taxonomy and match predicates
//!
//! A condition is a single predicate over one or two data streams. The
//! variant set is closed: the engine dispatches on the tag, there is no
//! open polymorphism. Each condition belongs to one (trigger, mode) and
//! carries its position in that mode's condition set.

use crate::types::{AvailabilityType, Data, DataValue, Mode, TenantId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Operators
// ============================================================================

/// Numeric comparison operator for THRESHOLD and COMPARE conditions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompareOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl CompareOp {
    pub fn eval(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Lte => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Gte => left >= right,
            CompareOp::Eq => left == right,
        }
    }
}

/// Boundary treatment for THRESHOLD_RANGE endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RangeOp {
    /// Endpoint belongs to the range.
    Inclusive,
    /// Endpoint excluded from the range.
    Exclusive,
}

/// String comparison operator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StringOp {
    Equal,
    NotEqual,
    StartsWith,
    EndsWith,
    Contains,
    /// Full regex match over the value.
    Matches,
}

/// Availability predicate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityOp {
    Down,
    NotUp,
    Up,
}

impl AvailabilityOp {
    pub fn eval(self, state: AvailabilityType) -> bool {
        match self {
            AvailabilityOp::Down => state == AvailabilityType::Down,
            AvailabilityOp::NotUp => state != AvailabilityType::Up,
            AvailabilityOp::Up => state == AvailabilityType::Up,
        }
    }
}

// ============================================================================
// Condition
// ============================================================================

/// Variant-specific payload of a condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionSpec {
    #[serde(rename_all = "camelCase")]
    Threshold {
        data_id: String,
        op: CompareOp,
        threshold: f64,
    },
    #[serde(rename_all = "camelCase")]
    ThresholdRange {
        data_id: String,
        op_low: RangeOp,
        op_high: RangeOp,
        low: f64,
        high: f64,
        /// When false, the predicate is negated (matches outside the range).
        in_range: bool,
    },
    #[serde(rename_all = "camelCase")]
    Compare {
        data_id: String,
        op: CompareOp,
        data2_id: String,
        data2_multiplier: f64,
    },
    #[serde(rename_all = "camelCase")]
    String {
        data_id: String,
        op: StringOp,
        pattern: String,
        #[serde(default)]
        ignore_case: bool,
    },
    #[serde(rename_all = "camelCase")]
    Availability { data_id: String, op: AvailabilityOp },
    #[serde(rename_all = "camelCase")]
    Event { data_id: String, expression: String },
    #[serde(rename_all = "camelCase")]
    External {
        data_id: String,
        system_id: String,
        expression: String,
    },
}

impl ConditionSpec {
    /// Data stream this condition listens on.
    pub fn data_id(&self) -> &str {
        match self {
            ConditionSpec::Threshold { data_id, .. }
            | ConditionSpec::ThresholdRange { data_id, .. }
            | ConditionSpec::Compare { data_id, .. }
            | ConditionSpec::String { data_id, .. }
            | ConditionSpec::Availability { data_id, .. }
            | ConditionSpec::Event { data_id, .. }
            | ConditionSpec::External { data_id, .. } => data_id,
        }
    }

    /// Second data stream for COMPARE conditions.
    pub fn data2_id(&self) -> Option<&str> {
        match self {
            ConditionSpec::Compare { data2_id, .. } => Some(data2_id),
            _ => None,
        }
    }

    /// Short tag for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConditionSpec::Threshold { .. } => "THRESHOLD",
            ConditionSpec::ThresholdRange { .. } => "THRESHOLD_RANGE",
            ConditionSpec::Compare { .. } => "COMPARE",
            ConditionSpec::String { .. } => "STRING",
            ConditionSpec::Availability { .. } => "AVAILABILITY",
            ConditionSpec::Event { .. } => "EVENT",
            ConditionSpec::External { .. } => "EXTERNAL",
        }
    }
}

/// A condition within a trigger mode's condition set.
///
/// For a given (trigger, mode), `condition_set_index` values form the
/// contiguous range `1..=condition_set_size` and the size equals the number
/// of conditions. The registry enforces this on every set replacement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub tenant_id: TenantId,
    pub trigger_id: String,
    #[serde(default)]
    pub trigger_mode: Mode,
    #[serde(default = "default_set_one")]
    pub condition_set_size: usize,
    #[serde(default = "default_set_one")]
    pub condition_set_index: usize,
    #[serde(flatten)]
    pub spec: ConditionSpec,
}

fn default_set_one() -> usize {
    1
}

impl Condition {
    pub fn new(
        tenant_id: impl Into<String>,
        trigger_id: impl Into<String>,
        trigger_mode: Mode,
        spec: ConditionSpec,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            trigger_id: trigger_id.into(),
            trigger_mode,
            condition_set_size: 1,
            condition_set_index: 1,
            spec,
        }
    }

    /// Deterministic identifier derived from the condition's identity.
    pub fn condition_id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.tenant_id, self.trigger_id, self.trigger_mode, self.condition_set_index
        )
    }

    pub fn data_id(&self) -> &str {
        self.spec.data_id()
    }

    pub fn data2_id(&self) -> Option<&str> {
        self.spec.data2_id()
    }

    /// Evaluate the match predicate against a data value.
    ///
    /// `value2` supplies the comparand for COMPARE conditions. EVENT
    /// expressions are parsed per evaluation; EXTERNAL conditions are
    /// never evaluated here (the engine delegates them by system id).
    pub fn matches(
        &self,
        value: &DataValue,
        value2: Option<&DataValue>,
    ) -> Result<bool, EvaluationError> {
        match &self.spec {
            ConditionSpec::Threshold { op, threshold, .. } => {
                let v = self.numeric(value)?;
                Ok(op.eval(v, *threshold))
            }
            ConditionSpec::ThresholdRange {
                op_low,
                op_high,
                low,
                high,
                in_range,
                ..
            } => {
                let v = self.numeric(value)?;
                let above_low = match op_low {
                    RangeOp::Inclusive => *low <= v,
                    RangeOp::Exclusive => *low < v,
                };
                let below_high = match op_high {
                    RangeOp::Inclusive => v <= *high,
                    RangeOp::Exclusive => v < *high,
                };
                let inside = above_low && below_high;
                Ok(if *in_range { inside } else { !inside })
            }
            ConditionSpec::Compare {
                op,
                data2_multiplier,
                ..
            } => {
                let v = self.numeric(value)?;
                let v2 = match value2 {
                    Some(v2) => self.numeric(v2)?,
                    None => {
                        return Err(EvaluationError::MissingComparand {
                            condition_id: self.condition_id(),
                        })
                    }
                };
                Ok(op.eval(v, v2 * data2_multiplier))
            }
            ConditionSpec::String {
                op,
                pattern,
                ignore_case,
                ..
            } => {
                let s = match value {
                    DataValue::Text(s) => s.as_str(),
                    _ => {
                        return Err(EvaluationError::TypeMismatch {
                            condition_id: self.condition_id(),
                            expected: "string",
                        })
                    }
                };
                self.string_match(*op, s, pattern, *ignore_case)
            }
            ConditionSpec::Availability { op, .. } => match value {
                DataValue::Availability(state) => Ok(op.eval(*state)),
                _ => Err(EvaluationError::TypeMismatch {
                    condition_id: self.condition_id(),
                    expected: "availability",
                }),
            },
            ConditionSpec::Event { expression, .. } => match value {
                DataValue::Event(payload) => crate::engine::event_expr::evaluate(expression, payload),
                _ => Err(EvaluationError::TypeMismatch {
                    condition_id: self.condition_id(),
                    expected: "event",
                }),
            },
            ConditionSpec::External { system_id, .. } => Err(EvaluationError::Delegated {
                system_id: system_id.clone(),
            }),
        }
    }

    fn numeric(&self, value: &DataValue) -> Result<f64, EvaluationError> {
        match value {
            DataValue::Numeric(v) => Ok(*v),
            _ => Err(EvaluationError::TypeMismatch {
                condition_id: self.condition_id(),
                expected: "numeric",
            }),
        }
    }

    fn string_match(
        &self,
        op: StringOp,
        value: &str,
        pattern: &str,
        ignore_case: bool,
    ) -> Result<bool, EvaluationError> {
        if op == StringOp::Matches {
            // Anchored: MATCHES is a full-string match, not substring search.
            let source = if ignore_case {
                format!("(?i)^(?:{})$", pattern)
            } else {
                format!("^(?:{})$", pattern)
            };
            let re = regex::Regex::new(&source).map_err(|source| EvaluationError::BadPattern {
                condition_id: self.condition_id(),
                source,
            })?;
            return Ok(re.is_match(value));
        }

        let (v, p) = if ignore_case {
            (value.to_lowercase(), pattern.to_lowercase())
        } else {
            (value.to_string(), pattern.to_string())
        };
        Ok(match op {
            StringOp::Equal => v == p,
            StringOp::NotEqual => v != p,
            StringOp::StartsWith => v.starts_with(&p),
            StringOp::EndsWith => v.ends_with(&p),
            StringOp::Contains => v.contains(&p),
            StringOp::Matches => unreachable!("handled above"),
        })
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Error raised while evaluating a condition predicate.
///
/// The engine logs these and treats the evaluation as `match = false`;
/// one faulty condition never stops the other triggers.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("data type mismatch for condition {condition_id}: expected {expected} value")]
    TypeMismatch {
        condition_id: String,
        expected: &'static str,
    },

    #[error("COMPARE condition {condition_id} evaluated without its second data stream")]
    MissingComparand { condition_id: String },

    #[error("invalid pattern in condition {condition_id}: {source}")]
    BadPattern {
        condition_id: String,
        #[source]
        source: regex::Error,
    },

    #[error("event expression error: {0}")]
    Expression(String),

    #[error("EXTERNAL condition is delegated to system {system_id}, not evaluated internally")]
    Delegated { system_id: String },
}

/// Outcome of matching one condition against one data sample.
///
/// Created when a condition sees incoming data, buffered per (trigger, mode)
/// until a complete tuple forms, then consumed by the dampening stage.
/// Never persisted on its own (alerts carry frozen copies).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionEvaluation {
    pub condition: Condition,
    /// The data sample that drove this evaluation.
    pub data: Data,
    /// Comparand value snapshot for COMPARE conditions.
    #[serde(default)]
    pub value2: Option<DataValue>,
    #[serde(rename = "match")]
    pub matched: bool,
    /// When the evaluation was produced (max data timestamp of the inputs).
    pub eval_time: u64,
}

impl ConditionEvaluation {
    pub fn new(condition: Condition, data: Data, value2: Option<DataValue>, matched: bool) -> Self {
        let eval_time = data.timestamp;
        Self {
            condition,
            data,
            value2,
            matched,
            eval_time,
        }
    }

    pub fn condition_set_size(&self) -> usize {
        self.condition.condition_set_size
    }

    pub fn condition_set_index(&self) -> usize {
        self.condition.condition_set_index
    }

    /// One-line rendering for logs and alert display.
    pub fn display(&self) -> String {
        format!(
            "{} {}[{}] = {} -> {}",
            self.condition.type_tag(),
            self.data.id,
            self.data.timestamp,
            self.data.value,
            self.matched
        )
    }
}

impl Condition {
    fn type_tag(&self) -> &'static str {
        self.spec.type_name()
    }
}

// ============================================================================
// Tests
// ============================================================================
