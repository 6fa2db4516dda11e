//! Tool-call normalizer
//!
//! Repairs and validates model-emitted tool arguments against the data read
//! from core banking in the same turn. The model is never the source of truth
//! for which loans are cancelled, which offer applies or whose profile is
//! written.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::gateway::BankingGateway;
use crate::models::{
    round_cents, InvestorProfile, NewLoanPayload, ProfileUpdate, RefinanceContext,
    RefinanceOption, RefinancePayload,
};
use crate::tools::args::ToolArgs;
use crate::Result;

/// Offer rates are compared with this tolerance (percentage points)
const RATE_TOLERANCE: f64 = 0.01;
const AMOUNT_TOLERANCE: f64 = 0.005;

/// Authoritative refinance data for one turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefinanceGrounding {
    pub loan_number_to_id: HashMap<String, String>,
    pub eligible_loan_ids: Vec<String>,
    pub options: Vec<RefinanceOption>,
    pub total_debt: f64,
}

impl RefinanceGrounding {
    pub fn from_context(ctx: &RefinanceContext) -> Self {
        Self {
            loan_number_to_id: ctx.loan_number_map(),
            eligible_loan_ids: ctx.eligible_ids(),
            options: ctx.ranked_options(),
            total_debt: ctx.total_debt(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.eligible_loan_ids.is_empty()
    }

    fn resolve_label(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        self.loan_number_to_id
            .get(trimmed)
            .or_else(|| self.loan_number_to_id.get(&trimmed.to_uppercase()))
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }
}

fn canonical_uuid(raw: &str) -> Option<String> {
    Uuid::parse_str(raw.trim()).ok().map(|u| u.to_string())
}

/// Every eligible ID as a canonical UUID, or an error naming the first that isn't one
fn canonical_eligible_ids(grounding: &RefinanceGrounding) -> Result<Vec<String>> {
    grounding
        .eligible_loan_ids
        .iter()
        .map(|id| {
            canonical_uuid(id).ok_or_else(|| {
                OrchestrationError::MalformedToolArgs(format!(
                    "el préstamo elegible '{}' no tiene un identificador válido; no se puede refinanciar",
                    id
                ))
            })
        })
        .collect()
}

/// The eligible set, whatever the model supplied.
///
/// Labels are translated first so a correct answer expressed as loan numbers is
/// recognised, but any mismatch in membership or completeness discards the
/// supplied list entirely.
fn reconcile_loan_ids(supplied: Option<&[String]>, grounding: &RefinanceGrounding) -> Result<Vec<String>> {
    let authoritative = canonical_eligible_ids(grounding)?;

    let Some(supplied) = supplied else {
        info!(count = authoritative.len(), "sourceLoanIds missing, using eligible set");
        return Ok(authoritative);
    };

    let eligible: HashSet<&String> = authoritative.iter().collect();

    let translated: Vec<Option<String>> = supplied
        .iter()
        .map(|raw| canonical_uuid(&grounding.resolve_label(raw)))
        .collect();

    let all_valid = translated
        .iter()
        .all(|id| id.as_ref().is_some_and(|id| eligible.contains(id)));
    let supplied_set: HashSet<&String> = translated.iter().flatten().collect();

    if !(all_valid && supplied_set == eligible) {
        warn!(
            supplied = ?supplied,
            eligible = authoritative.len(),
            "sourceLoanIds replaced by eligible set"
        );
    }

    Ok(authoritative)
}

/// (amount, quotas, rate) of the offer the model picked
fn select_offer(
    option_index: Option<usize>,
    amount: Option<f64>,
    quotas: Option<u32>,
    rate: Option<f64>,
    grounding: &RefinanceGrounding,
) -> Result<(f64, u32, f64)> {
    if grounding.options.is_empty() {
        return Err(OrchestrationError::MalformedToolArgs(format!(
            "ninguna oferta disponible cubre la deuda total de ${:.2}",
            grounding.total_debt
        )));
    }

    if let Some(index) = option_index {
        let option = grounding.options.get(index.saturating_sub(1)).ok_or_else(|| {
            OrchestrationError::MalformedToolArgs(format!(
                "optionIndex {} fuera de rango: hay {} opciones",
                index,
                grounding.options.len()
            ))
        })?;
        return Ok((option.amount, option.quotas, option.rate));
    }

    let matched = match (quotas, rate) {
        (Some(q), Some(r)) => grounding
            .options
            .iter()
            .find(|o| o.quotas == q && (o.rate - r).abs() < RATE_TOLERANCE)
            .ok_or_else(|| {
                OrchestrationError::MalformedToolArgs(format!(
                    "no hay una oferta vigente de {} cuotas al {}%",
                    q, r
                ))
            })?,
        _ => {
            // Only an amount: accept it when it identifies exactly one offer
            let by_amount: Vec<&RefinanceOption> = amount
                .map(|a| {
                    grounding
                        .options
                        .iter()
                        .filter(|o| (o.amount - a).abs() < AMOUNT_TOLERANCE)
                        .collect()
                })
                .unwrap_or_default();

            match by_amount.as_slice() {
                [single] => *single,
                _ => {
                    let missing: Vec<&str> = [
                        (quotas.is_none(), "selectedQuotas"),
                        (rate.is_none(), "appliedRate"),
                    ]
                    .into_iter()
                    .filter_map(|(absent, name)| absent.then_some(name))
                    .collect();
                    return Err(OrchestrationError::MalformedToolArgs(format!(
                        "faltan campos: {} (o usar optionIndex)",
                        missing.join(", ")
                    )));
                }
            }
        }
    };

    let offered = amount.unwrap_or(matched.amount);
    if offered + AMOUNT_TOLERANCE < grounding.total_debt {
        return Err(OrchestrationError::MalformedToolArgs(format!(
            "offeredAmount ${:.2} no cubre la deuda total de ${:.2}",
            offered, grounding.total_debt
        )));
    }
    if offered > matched.amount + AMOUNT_TOLERANCE {
        return Err(OrchestrationError::MalformedToolArgs(format!(
            "offeredAmount ${:.2} supera el máximo de la oferta (${:.2})",
            offered, matched.amount
        )));
    }

    Ok((offered, matched.quotas, matched.rate))
}

pub fn normalize_refinance(
    raw_args: &Value,
    customer_id: &str,
    grounding: &RefinanceGrounding,
) -> Result<RefinancePayload> {
    let fields = ToolArgs::decode(raw_args);

    if grounding.is_empty() {
        return Err(OrchestrationError::MalformedToolArgs(
            "el cliente no tiene préstamos elegibles para refinanciar".to_string(),
        ));
    }

    if let Some(supplied) = fields.customer_id.as_deref().filter(|id| *id != customer_id) {
        warn!(supplied = %supplied, customer_id = %customer_id, "customerId replaced by turn customer");
    }

    let source_loan_ids = reconcile_loan_ids(fields.source_loan_ids.as_deref(), grounding)?;
    let (offered_amount, selected_quotas, applied_rate) = select_offer(
        fields.option_index,
        fields.amount,
        fields.quotas,
        fields.rate,
        grounding,
    )?;

    let expected_cash_out = round_cents(offered_amount - grounding.total_debt);
    if let Some(supplied) = fields.expected_cash_out {
        if (supplied - expected_cash_out).abs() >= 0.01 {
            info!(supplied, expected_cash_out, "expectedCashOut recomputed");
        }
    }

    Ok(RefinancePayload {
        customer_id: customer_id.to_string(),
        source_loan_ids,
        offered_amount,
        selected_quotas,
        applied_rate,
        expected_cash_out,
    })
}

/// Missing fields are left for the gateway to reject
pub fn normalize_new_loan(raw_args: &Value, customer_id: &str) -> NewLoanPayload {
    let fields = ToolArgs::decode(raw_args);

    if let Some(supplied) = fields.customer_id.as_deref().filter(|id| *id != customer_id) {
        warn!(supplied = %supplied, customer_id = %customer_id, "customerId replaced by turn customer");
    }

    NewLoanPayload {
        customer_id: customer_id.to_string(),
        amount: fields.amount,
        quotas: fields.quotas,
        rate: fields.rate,
    }
}

/// Merge the model's answer into the customer's current remote profile
pub async fn normalize_investor_profile(
    raw_args: &Value,
    customer_id: &str,
    gateway: &dyn BankingGateway,
) -> Result<InvestorProfile> {
    let fields = ToolArgs::decode(raw_args);
    let update = ProfileUpdate {
        risk_level: fields.risk_level,
        max_loss_percent: fields.max_loss_percent,
        horizon: fields.horizon,
    };

    if update.is_empty() {
        return Err(OrchestrationError::MalformedToolArgs(
            "se esperaba al menos uno de riskLevel, maxLossPercent u horizon".to_string(),
        ));
    }

    let current = gateway
        .investor_profile(customer_id)
        .await?
        .unwrap_or_default();

    Ok(current.merge(&update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EligibleLoan, Horizon, LoanOffer, RiskLevel};
    use crate::testing::FakeGateway;
    use serde_json::json;

    const ID_A: &str = "0b6f3a5e-8f55-4b43-9a8e-0d3f3c1c2a11";
    const ID_B: &str = "6a1e0d8c-3b2f-4f6e-8a7d-9c5b4e3f2a10";
    const ID_C: &str = "c3d2e1f0-1a2b-4c3d-8e4f-5a6b7c8d9e0f";
    const FOREIGN: &str = "ffffffff-1111-4222-8333-444444444444";

    fn loan(id: &str, number: &str, remaining: f64) -> EligibleLoan {
        EligibleLoan {
            id: id.to_string(),
            loan_number: number.to_string(),
            remaining_amount: remaining,
            paid_quotas: 2,
            total_quotas: 12,
        }
    }

    fn grounding() -> RefinanceGrounding {
        RefinanceGrounding::from_context(&RefinanceContext {
            eligible_loans: vec![
                loan(ID_A, "LOAN-001", 100_000.0),
                loan(ID_B, "LOAN-002", 50_000.0),
                loan(ID_C, "LOAN-003", 25_000.0),
            ],
            new_offers: vec![
                LoanOffer { max_amount: 200_000.0, max_quotas: 24, monthly_rate: 70.0 },
                LoanOffer { max_amount: 250_000.0, max_quotas: 36, monthly_rate: 80.0 },
                LoanOffer { max_amount: 300_000.0, max_quotas: 48, monthly_rate: 90.0 },
                LoanOffer { max_amount: 400_000.0, max_quotas: 60, monthly_rate: 95.0 },
            ],
        })
    }

    fn eligible() -> Vec<String> {
        vec![ID_A.to_string(), ID_B.to_string(), ID_C.to_string()]
    }

    #[test]
    fn test_source_ids_always_equal_eligible_set() {
        let g = grounding();
        let supplied = vec![
            json!(null),
            json!([ID_A]),
            json!([ID_A, ID_B, ID_C, FOREIGN]),
            json!([ID_C, ID_A, ID_B]),
            json!(["LOAN-001", "LOAN-002", "LOAN-003"]),
            json!(["LOAN-001", "LOAN-002"]),
            json!(["not-a-uuid", ID_B, ID_C]),
            json!([FOREIGN]),
            json!("LOAN-001"),
            json!(42),
        ];

        for ids in supplied {
            let args = json!({"sourceLoanIds": ids, "optionIndex": 1});
            let payload = normalize_refinance(&args, "C1", &g).unwrap();
            assert_eq!(payload.source_loan_ids, eligible(), "supplied {}", ids);
        }
    }

    #[test]
    fn test_non_uuid_eligible_id_is_never_submitted() {
        let g = RefinanceGrounding::from_context(&RefinanceContext {
            eligible_loans: vec![loan("LOAN-001", "LOAN-001", 100_000.0)],
            new_offers: vec![LoanOffer { max_amount: 200_000.0, max_quotas: 24, monthly_rate: 70.0 }],
        });

        let err = normalize_refinance(&json!({"optionIndex": 1}), "C1", &g).unwrap_err();
        assert!(matches!(err, OrchestrationError::MalformedToolArgs(_)));
    }

    #[test]
    fn test_eligible_ids_are_canonicalised() {
        let g = RefinanceGrounding::from_context(&RefinanceContext {
            eligible_loans: vec![loan(&ID_A.to_uppercase(), "LOAN-001", 100_000.0)],
            new_offers: vec![LoanOffer { max_amount: 200_000.0, max_quotas: 24, monthly_rate: 70.0 }],
        });

        let payload = normalize_refinance(&json!({"optionIndex": 1, "sourceLoanIds": [ID_A]}), "C1", &g).unwrap();
        assert_eq!(payload.source_loan_ids, vec![ID_A.to_string()]);
    }

    #[test]
    fn test_option_index_selects_ranked_offer() {
        let g = grounding();
        let payload = normalize_refinance(&json!({"__arg1": {"optionIndex": 4}}), "C1", &g).unwrap();

        assert_eq!(payload.offered_amount, 400_000.0);
        assert_eq!(payload.selected_quotas, 60);
        assert_eq!(payload.applied_rate, 95.0);
        assert_eq!(payload.expected_cash_out, 225_000.0);
    }

    #[test]
    fn test_quotas_and_rate_fill_missing_amount() {
        let g = grounding();
        let args = json!({"selected_quotas": 36, "applied_rate": 80, "expected_cash_out": 1});
        let payload = normalize_refinance(&args, "C1", &g).unwrap();

        assert_eq!(payload.offered_amount, 250_000.0);
        assert_eq!(payload.expected_cash_out, 75_000.0);
    }

    #[test]
    fn test_invented_offer_is_rejected() {
        let g = grounding();
        let args = json!({"offeredAmount": 250000, "selectedQuotas": 12, "appliedRate": 10});
        let err = normalize_refinance(&args, "C1", &g).unwrap_err();
        assert!(matches!(err, OrchestrationError::MalformedToolArgs(_)));

        let too_much = json!({"offeredAmount": 999999, "selectedQuotas": 24, "appliedRate": 70});
        assert!(normalize_refinance(&too_much, "C1", &g).is_err());

        let out_of_range = json!({"optionIndex": 9});
        assert!(normalize_refinance(&out_of_range, "C1", &g).is_err());
    }

    #[test]
    fn test_customer_id_is_forced() {
        let g = grounding();
        let args = json!({"customerId": "SOMEONE-ELSE", "optionIndex": 2});
        let payload = normalize_refinance(&args, "C1", &g).unwrap();
        assert_eq!(payload.customer_id, "C1");
    }

    #[test]
    fn test_no_eligible_loans_is_malformed() {
        let err = normalize_refinance(&json!({"optionIndex": 1}), "C1", &RefinanceGrounding::default())
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::MalformedToolArgs(_)));
    }

    #[test]
    fn test_new_loan_keeps_missing_fields_absent() {
        let payload = normalize_new_loan(&json!({"__arg1": "{\"amount\": 50000, \"rate\": 70}"}), "C7");
        assert_eq!(payload.customer_id, "C7");
        assert_eq!(payload.amount, Some(50_000.0));
        assert_eq!(payload.quotas, None);
        assert_eq!(payload.rate, Some(70.0));
    }

    #[tokio::test]
    async fn test_profile_merge_keeps_remote_fields() {
        let gateway = FakeGateway::new().with_profile(InvestorProfile {
            risk_level: Some(RiskLevel::Moderado),
            max_loss_percent: Some(20),
            horizon: None,
            has_profile: false,
        });

        let merged = normalize_investor_profile(
            &json!({"horizon": "largo", "hasProfile": false, "riskLevel": null}),
            "C2",
            &gateway,
        )
        .await
        .unwrap();

        assert_eq!(merged.risk_level, Some(RiskLevel::Moderado));
        assert_eq!(merged.max_loss_percent, Some(20));
        assert_eq!(merged.horizon, Some(Horizon::Long));
        assert!(merged.has_profile);
    }

    #[tokio::test]
    async fn test_profile_without_remote_starts_empty() {
        let gateway = FakeGateway::new();
        let merged = normalize_investor_profile(&json!({"riskLevel": "ALTO", "hasProfile": true}), "C2", &gateway)
            .await
            .unwrap();

        assert_eq!(merged.risk_level, Some(RiskLevel::Agresivo));
        assert!(!merged.has_profile);
    }

    #[tokio::test]
    async fn test_profile_read_failure_is_not_merged_over() {
        let gateway = FakeGateway::new().failing_reads();
        let result = normalize_investor_profile(&json!({"horizon": "SHORT"}), "C2", &gateway).await;
        assert!(matches!(result, Err(OrchestrationError::Gateway(_))));
    }
}
