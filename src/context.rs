//! Context builder
//!
//! Decides which core-banking reads a turn needs and renders them as a
//! narrative block for the specialist prompt, plus the side tables the
//! normalizer validates against. Gateway failures degrade the narrative;
//! they never abort the turn.

use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::classifier::fold_text;
use crate::config::OfferHeuristics;
use crate::gateway::{BankingGateway, GatewayError};
use crate::models::{is_known_customer, Category, RefinanceContext, RefinanceOption, Transaction};
use crate::normalizer::RefinanceGrounding;

const LOAN_TOPIC_KEYWORDS: &[&str] = &[
    "LOAN", "REFINANCE", "DEBT", "PRESTAMO", "REFINANCIACION", "DEUDA",
];

const MAX_TRANSACTIONS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct BuiltContext {
    pub narrative: String,
    /// Present only when the loan path ran and the loan read succeeded
    pub refinance: Option<RefinanceContext>,
    pub grounding: RefinanceGrounding,
    pub best_offer_summary: Option<String>,
}

pub struct ContextBuilder {
    gateway: Arc<dyn BankingGateway>,
    heuristics: OfferHeuristics,
}

/// Loan category, or a loan/refinance/debt keyword in reason + category
pub fn should_fetch_loan_data(reason: &str, category: &Category) -> bool {
    if category.is_loan() {
        return true;
    }
    let search = fold_text(&format!("{} {}", reason, category)).to_uppercase();
    LOAN_TOPIC_KEYWORDS.iter().any(|kw| search.contains(kw))
}

/// Which specialist handles the turn. The system prompt and the bound tools
/// both follow this, so the model is never told to call a tool it lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnFlow {
    Investments,
    Loan,
    Claims,
}

impl TurnFlow {
    pub fn for_turn(reason: &str, category: &Category) -> Self {
        match category {
            Category::Investments => TurnFlow::Investments,
            c if should_fetch_loan_data(reason, c) => TurnFlow::Loan,
            _ => TurnFlow::Claims,
        }
    }
}

fn text_or_na(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("N/A")
}

/// One line per transaction, most recent first as returned, at most ten
pub fn format_transactions(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "No hay transacciones disponibles.".to_string();
    }

    transactions
        .iter()
        .take(MAX_TRANSACTIONS)
        .map(|txn| {
            let amount = txn
                .amount
                .map(|a| format!("{:.2}", a))
                .unwrap_or_else(|| "N/A".to_string());
            format!(
                "- {}: ${} ({}) - {} [ID: {}]",
                text_or_na(&txn.transaction_date),
                amount,
                text_or_na(&txn.status),
                text_or_na(&txn.description),
                text_or_na(&txn.coelsa_id),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn trade_off_note(option: &RefinanceOption, heuristics: &OfferHeuristics) -> String {
    let mut notes = Vec::new();

    if option.quotas >= heuristics.long_term_quotas {
        notes.push("cuota mensual más baja, más interés total");
    } else if option.rate >= heuristics.high_rate_threshold {
        notes.push("más interés total");
    }
    if option.rate <= heuristics.low_rate_threshold {
        notes.push("menor costo total");
    }

    if notes.is_empty() {
        "equilibrio entre cuota y costo total".to_string()
    } else {
        notes.join("; ")
    }
}

/// Eligible loans and offers. A failed offer read yields no offers.
pub async fn fetch_refinance(
    gateway: &dyn BankingGateway,
    customer_id: &str,
) -> Result<RefinanceContext, GatewayError> {
    let eligible_loans = gateway.loans_to_cancel(customer_id).await?;

    let new_offers = match gateway.available_offers(customer_id).await {
        Ok(offers) => offers,
        Err(e) => {
            warn!(customer_id = %customer_id, error = %e, "available-offer read failed, continuing without offers");
            Vec::new()
        }
    };

    Ok(RefinanceContext {
        eligible_loans,
        new_offers,
    })
}

fn describe_option(option: &RefinanceOption) -> String {
    format!(
        "Opción {}: ${:.2} en {} cuotas, tasa {:.2}%, sobrante ${:.2}",
        option.index, option.amount, option.quotas, option.rate, option.cash_out
    )
}

impl ContextBuilder {
    pub fn new(gateway: Arc<dyn BankingGateway>, heuristics: OfferHeuristics) -> Self {
        Self {
            gateway,
            heuristics,
        }
    }

    pub async fn build(&self, customer_id: &str, reason: &str, category: &Category) -> BuiltContext {
        if !is_known_customer(customer_id) {
            debug!("No customer id, skipping context reads");
            return BuiltContext::default();
        }

        if should_fetch_loan_data(reason, category) {
            self.build_loan_context(customer_id).await
        } else {
            self.build_transactions_context(customer_id).await
        }
    }

    async fn build_loan_context(&self, customer_id: &str) -> BuiltContext {
        let refinance = match fetch_refinance(self.gateway.as_ref(), customer_id).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(customer_id = %customer_id, error = %e, "Loan context unavailable");
                return BuiltContext {
                    narrative: format!(
                        "\n\n[DATOS FINANCIEROS REALES]:\nError consultando deudas: {}. \
                         No confirmes montos ni ofertas; informá que no se pudieron consultar en este momento.",
                        e
                    ),
                    ..Default::default()
                };
            }
        };

        let grounding = RefinanceGrounding::from_context(&refinance);
        let mut narrative = String::from("\n\n[DATOS FINANCIEROS REALES]:\n");

        if refinance.eligible_loans.is_empty() {
            narrative.push_str("El cliente no tiene préstamos elegibles para refinanciar.\n");
        } else {
            let _ = writeln!(
                narrative,
                "Préstamos elegibles para refinanciar: {}",
                refinance.eligible_loans.len()
            );
            for loan in &refinance.eligible_loans {
                let _ = writeln!(
                    narrative,
                    "- Préstamo {} (ID: {}): ${:.2} restantes ({}/{} cuotas pagadas)",
                    loan.loan_number, loan.id, loan.remaining_amount, loan.paid_quotas, loan.total_quotas
                );
            }
            let _ = writeln!(narrative, "Deuda total: ${:.2}", grounding.total_debt);
            let _ = writeln!(
                narrative,
                "IMPORTANTE: sourceLoanIds debe incluir TODOS los {} préstamos: {:?}",
                grounding.eligible_loan_ids.len(),
                grounding.eligible_loan_ids
            );
        }

        let best_offer_summary = grounding.options.first().map(|best| {
            format!("Mejor oferta: {} ({})", describe_option(best), trade_off_note(best, &self.heuristics))
        });

        if grounding.options.is_empty() {
            if !refinance.eligible_loans.is_empty() {
                narrative.push_str(
                    "\nNINGUNA oferta disponible cubre la deuda total. NO inventes montos, cuotas ni tasas: \
                     informá al cliente que por ahora no hay una oferta de refinanciación disponible.\n",
                );
            }
        } else {
            let _ = writeln!(
                narrative,
                "\nOpciones de refinanciación (ordenadas por monto y tasa): {}",
                grounding.options.len()
            );
            for option in &grounding.options {
                let _ = writeln!(
                    narrative,
                    "{} [{}]",
                    describe_option(option),
                    trade_off_note(option, &self.heuristics)
                );
            }
            if let Some(summary) = &best_offer_summary {
                let _ = writeln!(narrative, "{}", summary);
            }
        }

        BuiltContext {
            narrative,
            refinance: Some(refinance),
            grounding,
            best_offer_summary,
        }
    }

    async fn build_transactions_context(&self, customer_id: &str) -> BuiltContext {
        let narrative = match self.gateway.transactions(customer_id).await {
            Ok(transactions) => format!(
                "\n\n[HISTORIAL DE TRANSACCIONES]:\n{}",
                format_transactions(&transactions)
            ),
            Err(e) => {
                warn!(customer_id = %customer_id, error = %e, "Transaction history unavailable");
                format!("\n\n[HISTORIAL DE TRANSACCIONES]:\nError al recuperar historial: {}", e)
            }
        };

        BuiltContext {
            narrative,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_loans, sample_offers, FakeGateway};

    fn builder(gateway: FakeGateway) -> (ContextBuilder, Arc<FakeGateway>) {
        let gateway = Arc::new(gateway);
        (
            ContextBuilder::new(gateway.clone(), OfferHeuristics::default()),
            gateway,
        )
    }

    #[test]
    fn test_loan_routing_decision() {
        assert!(should_fetch_loan_data("", &Category::Loan));
        assert!(should_fetch_loan_data("quiere unificar su deuda", &Category::Balance));
        assert!(should_fetch_loan_data("Consulta de PRÉSTAMO", &Category::GeneralInfo));
        assert!(should_fetch_loan_data("", &Category::Other("REFINANCIACIÓN".to_string())));
        assert!(!should_fetch_loan_data("transferencia rechazada", &Category::Transactions));
    }

    #[test]
    fn test_turn_flow() {
        assert_eq!(TurnFlow::for_turn("", &Category::Refinance), TurnFlow::Loan);
        assert_eq!(TurnFlow::for_turn("deuda de tarjeta", &Category::Transactions), TurnFlow::Loan);
        assert_eq!(TurnFlow::for_turn("quiere unificar deuda", &Category::Investments), TurnFlow::Investments);
        assert_eq!(TurnFlow::for_turn("débito duplicado", &Category::Transactions), TurnFlow::Claims);
    }

    #[tokio::test]
    async fn test_unknown_customer_makes_no_calls() {
        let (builder, gateway) = builder(FakeGateway::new().with_loans(sample_loans()));
        let ctx = builder.build("UNKNOWN", "deuda", &Category::Loan).await;

        assert!(ctx.narrative.is_empty());
        assert!(ctx.refinance.is_none());
        assert_eq!(gateway.read_count(), 0);

        let ctx = builder.build("  ", "deuda", &Category::Loan).await;
        assert!(ctx.narrative.is_empty());
    }

    #[tokio::test]
    async fn test_loan_context_lists_every_option() {
        let (builder, _) = builder(
            FakeGateway::new()
                .with_loans(sample_loans())
                .with_offers(sample_offers()),
        );
        let ctx = builder.build("C1", "refinanciar", &Category::Loan).await;

        assert_eq!(ctx.grounding.eligible_loan_ids.len(), 3);
        assert_eq!(ctx.grounding.options.len(), 4);
        assert_eq!(ctx.grounding.loan_number_to_id.get("LOAN-001").map(String::as_str), Some(sample_loans()[0].id.as_str()));
        for option in &ctx.grounding.options {
            assert!(ctx.narrative.contains(&format!("Opción {}:", option.index)));
        }
        assert!(ctx.narrative.contains("cuota mensual más baja"));
        assert!(ctx.best_offer_summary.unwrap().contains("Opción 1"));
    }

    #[tokio::test]
    async fn test_no_covering_offer_forbids_fabrication() {
        let (builder, _) = builder(FakeGateway::new().with_loans(sample_loans()).with_offers(vec![
            crate::models::LoanOffer {
                max_amount: 10.0,
                max_quotas: 12,
                monthly_rate: 50.0,
            },
        ]));
        let ctx = builder.build("C1", "", &Category::Refinance).await;

        assert!(ctx.grounding.options.is_empty());
        assert!(ctx.narrative.contains("NO inventes"));
        assert!(ctx.best_offer_summary.is_none());
    }

    #[tokio::test]
    async fn test_gateway_failure_degrades_to_narrative() {
        let (builder, _) = builder(FakeGateway::new().failing_reads());

        let loans = builder.build("C1", "", &Category::Loan).await;
        assert!(loans.narrative.contains("Error consultando deudas"));
        assert!(loans.narrative.contains("500"));
        assert!(loans.grounding.is_empty());

        let txns = builder.build("C1", "", &Category::Transactions).await;
        assert!(txns.narrative.contains("Error al recuperar historial"));
    }

    #[tokio::test]
    async fn test_transactions_context_caps_at_ten() {
        let transactions: Vec<Transaction> = (0..15)
            .map(|i| Transaction {
                id: Some(format!("t{}", i)),
                amount: Some(100.0 + i as f64),
                currency: Some("ARS".to_string()),
                status: Some("COMPLETED".to_string()),
                transaction_date: Some(format!("2024-01-{:02}", i + 1)),
                description: Some("Transferencia".to_string()),
                coelsa_id: Some(format!("CO{}", i)),
            })
            .collect();
        let (builder, _) = builder(FakeGateway::new().with_transactions(transactions));

        let ctx = builder.build("C1", "no me llegó una transferencia", &Category::Transactions).await;
        assert_eq!(ctx.narrative.matches("[ID: ").count(), 10);
        assert!(ctx.narrative.contains("- 2024-01-01: $100.00 (COMPLETED) - Transferencia [ID: CO0]"));
        assert!(ctx.refinance.is_none());
    }

    #[test]
    fn test_trade_off_notes() {
        let heuristics = OfferHeuristics::default();
        let option = |quotas, rate| RefinanceOption {
            index: 1,
            amount: 1.0,
            quotas,
            rate,
            cash_out: 0.0,
        };

        assert_eq!(trade_off_note(&option(24, 90.0), &heuristics), "más interés total");
        assert_eq!(
            trade_off_note(&option(60, 90.0), &heuristics),
            "cuota mensual más baja, más interés total"
        );
        assert_eq!(trade_off_note(&option(12, 55.0), &heuristics), "menor costo total");
        assert_eq!(
            trade_off_note(&option(24, 70.0), &heuristics),
            "equilibrio entre cuota y costo total"
        );
    }
}
