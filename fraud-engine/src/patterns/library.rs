//! Built-in fraud patterns

use super::{Comparison, Condition, Field, FraudPattern, FraudRule};
use crate::types::{FactorCategory, RiskLevel};

/// Patterns registered when `load_default_patterns` is set
pub fn default_patterns() -> Vec<FraudPattern> {
    vec![card_testing(), account_takeover(), mule_fan_out(), night_drain()]
}

fn is_set(field: Field) -> Condition {
    Condition::compare(field, Comparison::Eq, 1.0)
}

/// Small probing amounts in quick succession
fn card_testing() -> FraudPattern {
    let micro = || Condition::compare(Field::Amount, Comparison::Lte, 5.0);

    FraudPattern::new("card_testing", "Card testing", RiskLevel::High)
        .describe("Micro-payments probing whether stolen credentials work")
        .rule(
            FraudRule::new(
                "ct_micro_burst",
                "Micro-payment burst",
                Condition::all(vec![
                    micro(),
                    Condition::compare(Field::TransactionsLastHour, Comparison::Gte, 3.0),
                ]),
                0.7,
                1.0,
            )
            .describe("Amount of 5 or less with 3+ transactions in the last hour"),
        )
        .rule(FraudRule::new(
            "ct_micro_new_recipient",
            "Micro-payment to new recipient",
            Condition::all(vec![micro(), is_set(Field::NewRecipient)]),
            0.3,
            1.0,
        ))
}

/// Risky device moving unusual amounts to unknown recipients
fn account_takeover() -> FraudPattern {
    FraudPattern::new("account_takeover", "Account takeover", RiskLevel::Critical)
        .category(FactorCategory::Device)
        .describe("Compromised credentials used from an unfamiliar device")
        .rule(FraudRule::new(
            "ato_risky_device_new_recipient",
            "Risky device paying a new recipient",
            Condition::all(vec![
                Condition::compare(Field::DeviceRiskScore, Comparison::Gte, 0.5),
                is_set(Field::NewRecipient),
            ]),
            0.6,
            1.0,
        ))
        .rule(
            FraudRule::new(
                "ato_untrusted_amount_spike",
                "Amount spike from untrusted device",
                Condition::all(vec![
                    Condition::compare(Field::DeviceTrusted, Comparison::Eq, 0.0),
                    Condition::ramp(Field::AmountToAvgRatio, 3.0, 10.0),
                ]),
                0.4,
                0.5,
            )
            .describe("Untrusted device, amount at least 6.5x the user's average"),
        )
}

/// Fresh accounts pushing money out fast
fn mule_fan_out() -> FraudPattern {
    FraudPattern::new("mule_fan_out", "Mule fan-out", RiskLevel::High)
        .describe("Newly active account forwarding large sums to many recipients")
        .rule(FraudRule::new(
            "mule_new_account_large",
            "Large transfer from new account",
            Condition::all(vec![
                Condition::compare(Field::HistoryCount, Comparison::Lt, 3.0),
                Condition::compare(Field::Amount, Comparison::Gte, 1_000.0),
            ]),
            0.6,
            1.0,
        ))
        .rule(FraudRule::new(
            "mule_rapid_new_recipients",
            "Rapid transfers to new recipients",
            Condition::all(vec![
                is_set(Field::NewRecipient),
                Condition::compare(Field::TransactionsLastHour, Comparison::Gte, 4.0),
            ]),
            0.4,
            1.0,
        ))
}

/// Off-hours transfer to a new recipient at or above the user's maximum
fn night_drain() -> FraudPattern {
    FraudPattern::new("night_drain", "Night drain", RiskLevel::High)
        .category(FactorCategory::Temporal)
        .rule(FraudRule::new(
            "nd_night_new_recipient_max",
            "Night transfer to new recipient at historical max",
            Condition::all(vec![
                is_set(Field::NightTime),
                is_set(Field::NewRecipient),
                Condition::compare(Field::AmountToMaxRatio, Comparison::Gte, 1.0),
            ]),
            1.0,
            1.0,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistorySummary, UserHistory};
    use crate::patterns::PatternEngine;
    use crate::types::fixtures::context;
    use crate::types::AssessmentInput;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn history(count: u32, recent: u32) -> UserHistory {
        UserHistory {
            baseline: HistorySummary {
                transaction_count: count,
                avg_amount: Decimal::from(80),
                max_amount: Decimal::from(200),
                frequent_recipients: vec!["friend-1".to_string()],
                frequent_countries: vec!["US".to_string()],
            },
            transactions_last_hour: recent,
        }
    }

    fn matched(ctx: &crate::types::TransactionContext, history: &UserHistory) -> Vec<String> {
        let engine = PatternEngine::with_defaults().unwrap();
        let input = AssessmentInput::new(ctx, Some(history), None);
        engine
            .evaluate(&engine.snapshot(), &input, Utc::now())
            .matches
            .into_iter()
            .map(|m| m.pattern_id)
            .collect()
    }

    #[test]
    fn test_library_validates() {
        assert!(PatternEngine::with_defaults().is_ok());
        assert_eq!(default_patterns().len(), 4);
    }

    #[test]
    fn test_ordinary_transfer_matches_nothing() {
        assert!(matched(&context(120), &history(20, 1)).is_empty());
    }

    #[test]
    fn test_card_testing() {
        let mut ctx = context(2);
        ctx.recipient_id = "shop-x".to_string();
        assert_eq!(matched(&ctx, &history(20, 4)), vec!["card_testing", "mule_fan_out"]);
    }

    #[test]
    fn test_mule_new_account() {
        assert_eq!(matched(&context(2_500), &history(1, 0)), vec!["mule_fan_out"]);
    }

    #[test]
    fn test_night_drain() {
        let mut ctx = context(250);
        ctx.recipient_id = "stranger".to_string();
        ctx.timestamp = Utc.with_ymd_and_hms(2024, 3, 12, 3, 15, 0).unwrap();
        assert_eq!(matched(&ctx, &history(20, 0)), vec!["night_drain"]);
    }
}
