//! Burn accounting
//!
//! Burn is the amulet consumed as fees by a transaction. It is read from the
//! results of a fixed set of choices:
//!
//! - transfers: holding fees + output fees + sender change fee, taken from
//!   the transfer summary
//! - traffic purchases and preapproval/setup choices: the `amuletPaid` field
//!
//! Transfers are cross-checked against `inputs - outputs - change` derived
//! from the summary and the choice argument. The fee heuristic is
//! provisional, so a mismatch is logged and counted, never rejected.

use crate::ledger::types::ExercisedEvent;
use crate::ledger::updates_fetcher::ClassifiedUpdate;
use crate::sync::payload::{numeric, value_at};
use serde_json::Value;

/// Relative tolerance for the burn cross-check
pub const BURN_TOLERANCE: f64 = 1e-6;

const TRANSFER_CHOICES: [&str; 2] = ["AmuletRules_Transfer", "TransferPreapproval_Send"];

const AMULET_PAID_CHOICES: [&str; 4] = [
    "AmuletRules_BuyMemberTraffic",
    "AmuletRules_CreateTransferPreapproval",
    "AmuletRules_CreateExternalPartySetupProposal",
    "TransferPreapproval_Renew",
];

const INPUT_FIELDS: [&str; 4] = [
    "inputAmuletAmount",
    "inputAppRewardAmount",
    "inputValidatorRewardAmount",
    "inputSvRewardAmount",
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BurnReport {
    pub burn_total: f64,
    /// Exercises whose burn could be cross-checked
    pub checked: u64,
    pub mismatches: u64,
}

impl BurnReport {
    pub fn merge(&mut self, other: &BurnReport) {
        self.burn_total += other.burn_total;
        self.checked += other.checked;
        self.mismatches += other.mismatches;
    }
}

fn num(value: &Value, path: &str) -> Option<f64> {
    value_at(value, path).and_then(numeric)
}

fn sum_array(value: &Value, path: &str, item_path: Option<&str>) -> f64 {
    value_at(value, path)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item_path {
                    Some(p) => num(item, p),
                    None => numeric(item),
                })
                .sum()
        })
        .unwrap_or(0.0)
}

/// Transfer summary, wherever this choice version put it
fn transfer_summary(ex: &ExercisedEvent) -> Option<&Value> {
    ["summary", "result.summary", "transferResult.summary"]
        .iter()
        .find_map(|p| value_at(&ex.exercise_result, p))
}

/// Burn and independently expected burn for one exercise
pub fn exercise_burn(ex: &ExercisedEvent) -> Option<(f64, Option<f64>)> {
    let choice = ex.choice.as_str();

    if TRANSFER_CHOICES.contains(&choice) {
        let summary = transfer_summary(ex)?;
        let burn = num(summary, "holdingFees").unwrap_or(0.0)
            + sum_array(summary, "outputFees", None)
            + num(summary, "senderChangeFee").unwrap_or(0.0);

        let inputs: f64 = INPUT_FIELDS.iter().filter_map(|f| num(summary, f)).sum();
        let outputs = sum_array(&ex.choice_argument, "transfer.outputs", Some("amount"));
        let change = num(summary, "senderChangeAmount").unwrap_or(0.0);
        let expected = (inputs > 0.0).then(|| inputs - outputs - change);

        return Some((burn, expected));
    }

    if AMULET_PAID_CHOICES.contains(&choice) {
        let paid = ["amuletPaid", "result.amuletPaid", "transferResult.amuletPaid"]
            .iter()
            .find_map(|p| num(&ex.exercise_result, p))?;
        return Some((paid, None));
    }

    None
}

fn within_tolerance(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() <= BURN_TOLERANCE * expected.abs().max(1.0)
}

/// Burn across every exercised event of an update
pub fn update_burn(update: &ClassifiedUpdate) -> BurnReport {
    let mut report = BurnReport::default();

    for ex in &update.exercised {
        let Some((burn, expected)) = exercise_burn(ex) else {
            continue;
        };
        report.burn_total += burn;

        if let Some(expected) = expected {
            report.checked += 1;
            if !within_tolerance(burn, expected) {
                report.mismatches += 1;
                log::warn!(
                    "⚠️  Burn mismatch in {} ({}): computed {}, expected {}",
                    update.update_id,
                    ex.choice,
                    burn,
                    expected
                );
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn exercise(choice: &str, argument: Value, result: Value) -> ExercisedEvent {
        ExercisedEvent {
            contract_id: "00rules".to_string(),
            template_id: "pkg:Splice.AmuletRules:AmuletRules".to_string(),
            choice: choice.to_string(),
            consuming: false,
            choice_argument: argument,
            exercise_result: result,
        }
    }

    fn update_with(exercised: Vec<ExercisedEvent>) -> ClassifiedUpdate {
        ClassifiedUpdate {
            update_id: "u-burn".to_string(),
            record_time: Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
            migration_id: Some(4),
            is_reassignment: false,
            events: Vec::new(),
            exercised,
        }
    }

    fn transfer(change_amount: &str) -> ExercisedEvent {
        exercise(
            "AmuletRules_Transfer",
            json!({"transfer": {"outputs": [{"amount": "60.0"}, {"amount": "30.0"}]}}),
            json!({"summary": {
                "inputAmuletAmount": "100.0",
                "holdingFees": "0.5",
                "outputFees": ["1.0", "0.5"],
                "senderChangeFee": "0.5",
                "senderChangeAmount": change_amount
            }}),
        )
    }

    #[test]
    fn test_transfer_burn_consistent() {
        let report = update_burn(&update_with(vec![transfer("7.5")]));
        assert!((report.burn_total - 2.5).abs() < 1e-9);
        assert_eq!(report.checked, 1);
        assert_eq!(report.mismatches, 0);
    }

    #[test]
    fn test_mismatch_is_counted_not_fatal() {
        let report = update_burn(&update_with(vec![transfer("5.0")]));
        assert!((report.burn_total - 2.5).abs() < 1e-9);
        assert_eq!(report.mismatches, 1);
    }

    #[test]
    fn test_amulet_paid_and_unknown_choices() {
        let report = update_burn(&update_with(vec![
            exercise(
                "AmuletRules_BuyMemberTraffic",
                json!({}),
                json!({"amuletPaid": "12.25"}),
            ),
            exercise("Amulet_Expire", json!({}), json!({"amuletPaid": "99"})),
        ]));
        assert!((report.burn_total - 12.25).abs() < 1e-9);
        assert_eq!(report.checked, 0);
    }

    #[test]
    fn test_merge_reports() {
        let mut total = BurnReport::default();
        total.merge(&BurnReport { burn_total: 1.0, checked: 1, mismatches: 0 });
        total.merge(&BurnReport { burn_total: 2.0, checked: 2, mismatches: 1 });
        assert_eq!(total, BurnReport { burn_total: 3.0, checked: 3, mismatches: 1 });
    }
}
