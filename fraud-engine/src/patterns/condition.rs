//! Typed rule conditions and their interpreter
//!
//! Conditions are a closed expression language over a fixed schema of
//! [`Field`]s. Every condition evaluates to a score in [0, 1]:
//!
//! - `compare`: 1 when `field <cmp> value` holds, else 0
//! - `ramp`: linear map of `field` from `[lower, upper]` onto `[0, 1]`
//! - `all`: minimum of children, `any`: maximum, `not`: `1 - child`
//!
//! A field that cannot be resolved (no history, no device) makes the
//! enclosing condition unresolved, which rules treat as a zero score.

use crate::types::AssessmentInput;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Readable context fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// Transaction amount
    Amount,
    /// Local hour of day (0-23)
    HourOfDay,
    /// 1 inside the night window
    NightTime,
    /// Same-user transactions in the trailing velocity window
    TransactionsLastHour,
    /// Transactions in the baseline window (0 for new users)
    HistoryCount,
    /// Historical mean amount
    HistoryAvgAmount,
    /// Historical maximum amount
    HistoryMaxAmount,
    /// amount / historical average
    AmountToAvgRatio,
    /// amount / historical maximum
    AmountToMaxRatio,
    /// 1 when the recipient is outside the frequent set
    NewRecipient,
    /// 1 when the country is outside the frequent set
    UnfamiliarCountry,
    /// Device registry score (0-1)
    DeviceRiskScore,
    /// 1 for enrolled devices
    DeviceTrusted,
    /// Times the device has been seen
    DeviceSightings,
}

impl Field {
    /// Resolve against an assessment input; `None` when the data is missing
    pub fn resolve(&self, input: &AssessmentInput<'_>) -> Option<f64> {
        let ctx = input.context;
        // History with at least one prior transaction
        let known = input.history.filter(|h| !h.baseline.is_empty());

        match self {
            Field::Amount => ctx.amount_f64(),
            Field::HourOfDay => Some(ctx.local_hour() as f64),
            Field::NightTime => Some(flag(input.is_night())),
            Field::TransactionsLastHour => input.history.map(|h| h.transactions_last_hour as f64),
            Field::HistoryCount => input.history.map(|h| h.baseline.transaction_count as f64),
            Field::HistoryAvgAmount => known.and_then(|h| to_f64(h.baseline.avg_amount)),
            Field::HistoryMaxAmount => known.and_then(|h| to_f64(h.baseline.max_amount)),
            Field::AmountToAvgRatio => {
                let avg = known.and_then(|h| to_f64(h.baseline.avg_amount))?;
                ratio(ctx.amount_f64()?, avg)
            }
            Field::AmountToMaxRatio => {
                let max = known.and_then(|h| to_f64(h.baseline.max_amount))?;
                ratio(ctx.amount_f64()?, max)
            }
            Field::NewRecipient => known.map(|h| flag(!h.baseline.knows_recipient(&ctx.recipient_id))),
            Field::UnfamiliarCountry => {
                let history = known.filter(|h| !h.baseline.frequent_countries.is_empty())?;
                let country = ctx.location.country.as_deref()?;
                Some(flag(!history.baseline.knows_country(country)))
            }
            Field::DeviceRiskScore => input.device.map(|d| d.risk_score),
            Field::DeviceTrusted => input.device.map(|d| flag(d.is_trusted)),
            Field::DeviceSightings => input.device.map(|d| d.sightings as f64),
        }
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn to_f64(value: rust_decimal::Decimal) -> Option<f64> {
    rust_decimal::prelude::ToPrimitive::to_f64(&value)
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator > 0.0 {
        Some(numerator / denominator)
    } else {
        None
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// Equal
    Eq,
    /// Not equal
    Ne,
}

impl Comparison {
    fn holds(&self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Gt => left > right,
            Comparison::Gte => left >= right,
            Comparison::Lt => left < right,
            Comparison::Lte => left <= right,
            Comparison::Eq => (left - right).abs() < f64::EPSILON,
            Comparison::Ne => (left - right).abs() >= f64::EPSILON,
        }
    }
}

/// Rule condition expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// 1 when the comparison holds, else 0
    Compare {
        /// Left-hand side
        field: Field,
        /// Operator
        cmp: Comparison,
        /// Right-hand side
        value: f64,
    },
    /// Linear ramp from `lower` (0) to `upper` (1)
    Ramp {
        /// Ramped field
        field: Field,
        /// Value scoring 0
        lower: f64,
        /// Value scoring 1
        upper: f64,
    },
    /// Minimum of children
    All {
        /// Children, at least one
        conditions: Vec<Condition>,
    },
    /// Maximum of children
    Any {
        /// Children, at least one
        conditions: Vec<Condition>,
    },
    /// Complement of child
    Not {
        /// Negated condition
        condition: Box<Condition>,
    },
}

/// A field resolved to a value the interpreter cannot use
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("field {field:?} resolved to non-finite value {value}")]
pub struct EvaluationFault {
    /// Offending field
    pub field: Field,
    /// Resolved value
    pub value: f64,
}

impl Condition {
    /// `field <cmp> value`
    pub fn compare(field: Field, cmp: Comparison, value: f64) -> Self {
        Condition::Compare { field, cmp, value }
    }

    /// `field` ramped over `[lower, upper]`
    pub fn ramp(field: Field, lower: f64, upper: f64) -> Self {
        Condition::Ramp { field, lower, upper }
    }

    /// Conjunction
    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::All { conditions }
    }

    /// Disjunction
    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Any { conditions }
    }

    /// Negation
    pub fn negate(condition: Condition) -> Self {
        Condition::Not {
            condition: Box::new(condition),
        }
    }

    /// Score in [0, 1], `Ok(None)` when unresolved
    pub fn evaluate(
        &self,
        input: &AssessmentInput<'_>,
    ) -> std::result::Result<Option<f64>, EvaluationFault> {
        match self {
            Condition::Compare { field, cmp, value } => {
                let Some(actual) = resolve_finite(*field, input)? else {
                    return Ok(None);
                };
                Ok(Some(flag(cmp.holds(actual, *value))))
            }
            Condition::Ramp { field, lower, upper } => {
                let Some(actual) = resolve_finite(*field, input)? else {
                    return Ok(None);
                };
                Ok(Some(((actual - lower) / (upper - lower)).clamp(0.0, 1.0)))
            }
            Condition::All { conditions } => {
                let mut score: f64 = 1.0;
                for condition in conditions {
                    match condition.evaluate(input)? {
                        Some(s) => score = score.min(s),
                        None => return Ok(None),
                    }
                }
                Ok(Some(score))
            }
            Condition::Any { conditions } => {
                let mut best: Option<f64> = None;
                for condition in conditions {
                    if let Some(s) = condition.evaluate(input)? {
                        best = Some(best.map_or(s, |b| b.max(s)));
                    }
                }
                Ok(best)
            }
            Condition::Not { condition } => Ok(condition.evaluate(input)?.map(|s| 1.0 - s)),
        }
    }

    /// Reject malformed expressions at registration time
    pub fn validate(&self) -> Result<()> {
        match self {
            Condition::Compare { field, value, .. } => {
                if !value.is_finite() {
                    return Err(Error::InvalidConfig(format!(
                        "compare on {:?} has non-finite constant",
                        field
                    )));
                }
            }
            Condition::Ramp { field, lower, upper } => {
                if !lower.is_finite() || !upper.is_finite() || lower >= upper {
                    return Err(Error::InvalidConfig(format!(
                        "ramp on {:?} needs finite lower < upper, got [{}, {}]",
                        field, lower, upper
                    )));
                }
            }
            Condition::All { conditions } | Condition::Any { conditions } => {
                if conditions.is_empty() {
                    return Err(Error::InvalidConfig(
                        "all/any needs at least one condition".to_string(),
                    ));
                }
                for condition in conditions {
                    condition.validate()?;
                }
            }
            Condition::Not { condition } => condition.validate()?,
        }
        Ok(())
    }
}

fn resolve_finite(
    field: Field,
    input: &AssessmentInput<'_>,
) -> std::result::Result<Option<f64>, EvaluationFault> {
    match field.resolve(input) {
        Some(value) if !value.is_finite() => Err(EvaluationFault { field, value }),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistorySummary, UserHistory};
    use crate::types::fixtures::context;
    use rust_decimal::Decimal;

    fn history(count: u32, avg: i64, max: i64) -> UserHistory {
        UserHistory {
            baseline: HistorySummary {
                transaction_count: count,
                avg_amount: Decimal::from(avg),
                max_amount: Decimal::from(max),
                frequent_recipients: vec!["friend-1".to_string()],
                frequent_countries: vec!["US".to_string()],
            },
            transactions_last_hour: 2,
        }
    }

    #[test]
    fn test_compare_and_ramp() {
        let ctx = context(1_000);
        let h = history(10, 200, 500);
        let input = AssessmentInput::new(&ctx, Some(&h), None);

        let big = Condition::compare(Field::Amount, Comparison::Gte, 1_000.0);
        assert_eq!(big.evaluate(&input).unwrap(), Some(1.0));

        let ramp = Condition::ramp(Field::AmountToAvgRatio, 2.0, 10.0);
        assert_eq!(ramp.evaluate(&input).unwrap(), Some(0.375));

        let max_ratio = Condition::compare(Field::AmountToMaxRatio, Comparison::Gt, 1.5);
        assert_eq!(max_ratio.evaluate(&input).unwrap(), Some(1.0));
    }

    #[test]
    fn test_missing_history_is_unresolved() {
        let ctx = context(1_000);
        let input = AssessmentInput::new(&ctx, None, None);

        let cond = Condition::compare(Field::AmountToMaxRatio, Comparison::Gt, 1.5);
        assert_eq!(cond.evaluate(&input).unwrap(), None);

        // Negation does not turn missing data into a hit
        assert_eq!(Condition::negate(cond).evaluate(&input).unwrap(), None);
    }

    #[test]
    fn test_new_user_history_count_resolves() {
        let ctx = context(1_000);
        let h = UserHistory::default();
        let input = AssessmentInput::new(&ctx, Some(&h), None);

        let cond = Condition::compare(Field::HistoryCount, Comparison::Lt, 3.0);
        assert_eq!(cond.evaluate(&input).unwrap(), Some(1.0));

        // Ratios need prior transactions
        let ratio = Condition::compare(Field::AmountToAvgRatio, Comparison::Gt, 0.0);
        assert_eq!(ratio.evaluate(&input).unwrap(), None);
        assert_eq!(Field::NewRecipient.resolve(&input), None);
    }

    #[test]
    fn test_all_any_not() {
        let ctx = context(1_000);
        let h = history(10, 200, 500);
        let input = AssessmentInput::new(&ctx, Some(&h), None);

        let yes = Condition::compare(Field::Amount, Comparison::Gt, 10.0);
        let no = Condition::compare(Field::NewRecipient, Comparison::Eq, 1.0);
        let missing = Condition::compare(Field::DeviceRiskScore, Comparison::Gt, 0.5);

        let all = Condition::all(vec![yes.clone(), no.clone()]);
        assert_eq!(all.evaluate(&input).unwrap(), Some(0.0));

        let any = Condition::any(vec![no.clone(), yes.clone(), missing.clone()]);
        assert_eq!(any.evaluate(&input).unwrap(), Some(1.0));

        let all_missing = Condition::all(vec![yes, missing]);
        assert_eq!(all_missing.evaluate(&input).unwrap(), None);

        assert_eq!(Condition::negate(no).evaluate(&input).unwrap(), Some(1.0));
    }

    #[test]
    fn test_validation() {
        assert!(Condition::ramp(Field::Amount, 10.0, 10.0).validate().is_err());
        assert!(Condition::compare(Field::Amount, Comparison::Gt, f64::NAN)
            .validate()
            .is_err());
        assert!(Condition::all(vec![]).validate().is_err());
        assert!(Condition::negate(Condition::any(vec![Condition::ramp(
            Field::HourOfDay,
            0.0,
            6.0
        )]))
        .validate()
        .is_ok());
    }

    #[test]
    fn test_unknown_field_rejected_by_serde() {
        let ok: Condition =
            serde_json::from_str(r#"{"op":"compare","field":"amount","cmp":"gt","value":5}"#)
                .unwrap();
        assert_eq!(ok, Condition::compare(Field::Amount, Comparison::Gt, 5.0));

        let bad = serde_json::from_str::<Condition>(
            r#"{"op":"compare","field":"password","cmp":"gt","value":5}"#,
        );
        assert!(bad.is_err());
    }
}
