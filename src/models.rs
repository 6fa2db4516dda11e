//! Core data models for the claims orchestrator

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Customer ID used when the inbound message carries none
pub const UNKNOWN_CUSTOMER: &str = "UNKNOWN";

pub fn is_known_customer(customer_id: &str) -> bool {
    let trimmed = customer_id.trim();
    !trimmed.is_empty() && trimmed != UNKNOWN_CUSTOMER
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

//
// ================= Investor profile =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Conservador,
    Moderado,
    Agresivo,
    SuperAgresivo,
}

impl RiskLevel {
    /// Accepts the wire names plus the looser labels a model tends to emit
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let key = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match key.as_str() {
            "conservador" | "conservative" | "bajo" | "low" => Some(RiskLevel::Conservador),
            "moderado" | "moderate" | "medio" | "medium" => Some(RiskLevel::Moderado),
            "agresivo" | "aggressive" | "alto" | "high" => Some(RiskLevel::Agresivo),
            "super_agresivo" | "súper_agresivo" | "super_aggressive" | "muy_alto" | "very_high" => {
                Some(RiskLevel::SuperAgresivo)
            }
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Conservador => "Conservador",
            RiskLevel::Moderado => "Moderado",
            RiskLevel::Agresivo => "Agresivo",
            RiskLevel::SuperAgresivo => "Súper Agresivo",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Horizon {
    Short,
    Medium,
    Long,
}

impl Horizon {
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let key = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match key.as_str() {
            "short" | "short_term" | "corto" | "corto_plazo" => Some(Horizon::Short),
            "medium" | "medium_term" | "mediano" | "mediano_plazo" => Some(Horizon::Medium),
            "long" | "long_term" | "largo" | "largo_plazo" => Some(Horizon::Long),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Horizon::Short => "corto plazo",
            Horizon::Medium => "mediano plazo",
            Horizon::Long => "largo plazo",
        }
    }
}

/// Investor profile as owned by the core-banking service.
///
/// `has_profile` is derived; it is recomputed on every merge and never read
/// from a model-supplied value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvestorProfile {
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub max_loss_percent: Option<u8>,
    #[serde(default)]
    pub horizon: Option<Horizon>,
    #[serde(default)]
    pub has_profile: bool,
}

impl InvestorProfile {
    pub fn is_complete(&self) -> bool {
        self.risk_level.is_some() && self.max_loss_percent.is_some() && self.horizon.is_some()
    }

    /// Fields present in `update` overwrite; absent fields keep the current value.
    pub fn merge(&self, update: &ProfileUpdate) -> InvestorProfile {
        let mut merged = InvestorProfile {
            risk_level: update.risk_level.or(self.risk_level),
            max_loss_percent: update.max_loss_percent.or(self.max_loss_percent),
            horizon: update.horizon.or(self.horizon),
            has_profile: false,
        };
        merged.has_profile = merged.is_complete();
        merged
    }

    /// Re-derive `has_profile` from the three fields
    pub fn normalized(mut self) -> InvestorProfile {
        self.has_profile = self.is_complete();
        self
    }
}

/// Partial profile answer, as extracted from text or tool arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub risk_level: Option<RiskLevel>,
    pub max_loss_percent: Option<u8>,
    pub horizon: Option<Horizon>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.risk_level.is_none() && self.max_loss_percent.is_none() && self.horizon.is_none()
    }
}

//
// ================= Loans & offers =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EligibleLoan {
    pub id: String,
    #[serde(default)]
    pub loan_number: String,
    #[serde(default)]
    pub remaining_amount: f64,
    #[serde(default)]
    pub paid_quotas: u32,
    #[serde(default)]
    pub total_quotas: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoanOffer {
    #[serde(default)]
    pub max_amount: f64,
    #[serde(default)]
    pub max_quotas: u32,
    #[serde(default)]
    pub monthly_rate: f64,
}

/// Per-request refinance data; never persisted
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RefinanceContext {
    pub eligible_loans: Vec<EligibleLoan>,
    pub new_offers: Vec<LoanOffer>,
}

/// A new offer that covers the whole debt, with its 1-based rank
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefinanceOption {
    pub index: usize,
    pub amount: f64,
    pub quotas: u32,
    pub rate: f64,
    pub cash_out: f64,
}

impl RefinanceContext {
    pub fn total_debt(&self) -> f64 {
        round_cents(self.eligible_loans.iter().map(|l| l.remaining_amount).sum())
    }

    pub fn eligible_ids(&self) -> Vec<String> {
        self.eligible_loans
            .iter()
            .filter(|l| !l.id.trim().is_empty())
            .map(|l| l.id.trim().to_string())
            .collect()
    }

    /// Human label ("LOAN-001") → loan UUID
    pub fn loan_number_map(&self) -> HashMap<String, String> {
        self.eligible_loans
            .iter()
            .filter(|l| !l.loan_number.trim().is_empty() && !l.id.trim().is_empty())
            .map(|l| (l.loan_number.trim().to_string(), l.id.trim().to_string()))
            .collect()
    }

    /// Offers whose max amount covers the debt, ascending by (amount, rate)
    pub fn ranked_options(&self) -> Vec<RefinanceOption> {
        let total_debt = self.total_debt();

        let mut covering: Vec<&LoanOffer> = self
            .new_offers
            .iter()
            .filter(|o| o.max_amount >= total_debt)
            .collect();

        covering.sort_by(|a, b| {
            a.max_amount
                .total_cmp(&b.max_amount)
                .then(a.monthly_rate.total_cmp(&b.monthly_rate))
        });

        covering
            .into_iter()
            .enumerate()
            .map(|(i, offer)| RefinanceOption {
                index: i + 1,
                amount: offer.max_amount,
                quotas: offer.max_quotas,
                rate: offer.monthly_rate,
                cash_out: round_cents(offer.max_amount - total_debt),
            })
            .collect()
    }
}

//
// ================= Transactions =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub transaction_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Clearing-system reference
    #[serde(default)]
    pub coelsa_id: Option<String>,
}

//
// ================= Execution payloads =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefinancePayload {
    pub customer_id: String,
    pub source_loan_ids: Vec<String>,
    pub offered_amount: f64,
    pub selected_quotas: u32,
    pub applied_rate: f64,
    pub expected_cash_out: f64,
}

/// `customer_id` goes in the URL; the body is amount/quotas/rate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewLoanPayload {
    #[serde(skip)]
    pub customer_id: String,
    pub amount: Option<f64>,
    pub quotas: Option<u32>,
    pub rate: Option<f64>,
}

//
// ================= Triage =================
//

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    Loan,
    Refinance,
    Investments,
    Transactions,
    Balance,
    GeneralInfo,
    Other(String),
}

impl Category {
    pub fn parse_loose(raw: &str) -> Self {
        let key = crate::classifier::fold_text(raw).to_uppercase().replace([' ', '-'], "_");
        match key.as_str() {
            "LOAN" | "LOANS" | "PRESTAMO" | "PRESTAMOS" | "NEW_LOAN" => Category::Loan,
            "REFINANCE" | "REFINANCING" | "REFINANCIACION" | "REFINANCIAR" => Category::Refinance,
            "INVESTMENTS" | "INVESTMENT" | "INVERSIONES" | "INVERSION" => Category::Investments,
            "TRANSACTIONS" | "TRANSACTION" | "TRANSFERENCIA" | "TRANSFERENCIAS" | "MOVIMIENTOS" => {
                Category::Transactions
            }
            "BALANCE" | "SALDO" | "CUENTA" => Category::Balance,
            "GENERAL_INFO" | "INFO_GENERAL" | "INFO" => Category::GeneralInfo,
            _ => Category::Other(raw.trim().to_string()),
        }
    }

    pub fn is_loan(&self) -> bool {
        matches!(self, Category::Loan | Category::Refinance)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Category::Loan => "LOAN",
            Category::Refinance => "REFINANCE",
            Category::Investments => "INVESTMENTS",
            Category::Transactions => "TRANSACTIONS",
            Category::Balance => "BALANCE",
            Category::GeneralInfo => "GENERAL_INFO",
            Category::Other(label) => label.as_str(),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriageDecision {
    Resolve,
    Escalate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriageOutcome {
    pub decision: TriageDecision,
    pub category: Category,
    pub reason: String,
    pub response_text: String,
}

//
// ================= Transport envelopes =================
//

fn unknown_customer() -> String {
    UNKNOWN_CUSTOMER.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundClaim {
    pub id: String,
    #[serde(alias = "text")]
    pub message: String,
    #[serde(rename = "customerId", alias = "clientId", default = "unknown_customer")]
    pub customer_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResolutionStatus {
    Processed,
    Escalated,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResolution {
    pub id: String,
    pub resolution: String,
    pub status: ResolutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loan(id: &str, number: &str, remaining: f64) -> EligibleLoan {
        EligibleLoan {
            id: id.to_string(),
            loan_number: number.to_string(),
            remaining_amount: remaining,
            paid_quotas: 3,
            total_quotas: 12,
        }
    }

    fn offer(amount: f64, quotas: u32, rate: f64) -> LoanOffer {
        LoanOffer {
            max_amount: amount,
            max_quotas: quotas,
            monthly_rate: rate,
        }
    }

    #[test]
    fn test_merge_never_nulls_existing_fields() {
        let current = InvestorProfile {
            risk_level: Some(RiskLevel::Moderado),
            max_loss_percent: Some(15),
            horizon: None,
            has_profile: false,
        };
        let update = ProfileUpdate {
            horizon: Some(Horizon::Long),
            ..Default::default()
        };

        let merged = current.merge(&update);
        assert_eq!(merged.risk_level, Some(RiskLevel::Moderado));
        assert_eq!(merged.max_loss_percent, Some(15));
        assert_eq!(merged.horizon, Some(Horizon::Long));
        assert!(merged.has_profile);
    }

    #[test]
    fn test_has_profile_tracks_completeness() {
        let states = [
            (None, None, None),
            (Some(RiskLevel::Agresivo), None, None),
            (Some(RiskLevel::Agresivo), Some(30), None),
            (None, Some(30), Some(Horizon::Short)),
            (Some(RiskLevel::Agresivo), Some(30), Some(Horizon::Short)),
        ];

        for (risk, loss, horizon) in states {
            let profile = InvestorProfile {
                risk_level: risk,
                max_loss_percent: loss,
                horizon,
                has_profile: true,
            }
            .normalized();
            assert_eq!(
                profile.has_profile,
                risk.is_some() && loss.is_some() && horizon.is_some()
            );
        }
    }

    #[test]
    fn test_profile_wire_format() {
        let profile: InvestorProfile = serde_json::from_str(
            r#"{"riskLevel":"SUPER_AGRESIVO","maxLossPercent":40,"horizon":null,"hasProfile":false}"#,
        )
        .unwrap();
        assert_eq!(profile.risk_level, Some(RiskLevel::SuperAgresivo));
        assert_eq!(profile.max_loss_percent, Some(40));
        assert_eq!(profile.horizon, None);
    }

    #[test]
    fn test_ranked_options_filter_and_order() {
        let ctx = RefinanceContext {
            eligible_loans: vec![loan("a", "LOAN-001", 100_000.0), loan("b", "LOAN-002", 50_000.0)],
            new_offers: vec![
                offer(400_000.0, 24, 70.0),
                offer(120_000.0, 12, 60.0),
                offer(200_000.0, 36, 90.0),
                offer(200_000.0, 48, 80.0),
            ],
        };

        let options = ctx.ranked_options();
        assert_eq!(options.len(), 3);
        assert_eq!(options[0].amount, 200_000.0);
        assert_eq!(options[0].rate, 80.0);
        assert_eq!(options[1].rate, 90.0);
        assert_eq!(options[2].amount, 400_000.0);
        assert_eq!(options[0].cash_out, 50_000.0);
        assert_eq!(options.iter().map(|o| o.index).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_inbound_claim_aliases() {
        let claim: InboundClaim =
            serde_json::from_str(r#"{"id":"c-1","text":"hola","clientId":"C9"}"#).unwrap();
        assert_eq!(claim.message, "hola");
        assert_eq!(claim.customer_id, "C9");

        let anonymous: InboundClaim =
            serde_json::from_str(r#"{"id":"c-2","message":"hola"}"#).unwrap();
        assert_eq!(anonymous.customer_id, UNKNOWN_CUSTOMER);
    }

    #[test]
    fn test_category_parse_loose() {
        assert_eq!(Category::parse_loose("préstamo"), Category::Loan);
        assert_eq!(Category::parse_loose("REFINANCIACIÓN"), Category::Refinance);
        assert_eq!(Category::parse_loose("investments"), Category::Investments);
        assert_eq!(
            Category::parse_loose("RECLAMO"),
            Category::Other("RECLAMO".to_string())
        );
    }
}
