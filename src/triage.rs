//! Triage dispatcher
//!
//! Decides, per inbound message, whether to answer locally or escalate to
//! the specialist. Fast paths run in a fixed order before any model call:
//!
//! 1. Active investor questionnaire: interpret the answer locally
//! 2. Refinance intent: straight to the specialist as LOAN
//! 3. Option choice ("la opción 4"): straight to the specialist as LOAN, after pacing
//! 4. Classification model, then pacing before escalation

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::prompts::TRIAGE_INSTRUCTION;
use crate::agent::Brain;
use crate::classifier;
use crate::config::{FastPathConfig, PacingConfig};
use crate::gateway::BankingGateway;
use crate::inference::{extract_json_object, ChatMessage, InferenceBackend};
use crate::models::{is_known_customer, Category, TriageDecision, TriageOutcome};
use crate::questionnaire;
use crate::state::SessionStore;
use crate::Result;

const DEFAULT_RESOLVE_TEXT: &str = "¡Hola! Soy el asistente del banco. ¿En qué puedo ayudarte hoy?";

pub struct TriageDispatcher {
    classifier: Arc<dyn InferenceBackend>,
    brain: Arc<Brain>,
    sessions: Arc<SessionStore>,
    gateway: Arc<dyn BankingGateway>,
    pacing: PacingConfig,
    fast_path: FastPathConfig,
}

fn escalated(category: Category, reason: impl Into<String>, response_text: String) -> TriageOutcome {
    TriageOutcome {
        decision: TriageDecision::Escalate,
        category,
        reason: reason.into(),
        response_text,
    }
}

impl TriageDispatcher {
    pub fn new(
        classifier: Arc<dyn InferenceBackend>,
        brain: Arc<Brain>,
        sessions: Arc<SessionStore>,
        gateway: Arc<dyn BankingGateway>,
        pacing: PacingConfig,
        fast_path: FastPathConfig,
    ) -> Self {
        Self {
            classifier,
            brain,
            sessions,
            gateway,
            pacing,
            fast_path,
        }
    }

    pub async fn classify(&self, message_text: &str, customer_id: &str, claim_id: &str) -> Result<TriageOutcome> {
        debug!(claim_id = %claim_id, customer_id = %customer_id, message = %message_text, "Triage input");

        if is_known_customer(customer_id) && self.sessions.is_investment_active(customer_id).await? {
            return self.continue_questionnaire(message_text, customer_id, claim_id).await;
        }

        if classifier::is_refinance_intent(message_text, self.fast_path.refinance_intent_min_len) {
            info!(claim_id = %claim_id, rule = "refinance_intent", "Fast path");
            let reason = "Intención de refinanciación detectada";
            let text = self.brain.solve(customer_id, message_text, reason, &Category::Loan).await?;
            return Ok(escalated(Category::Loan, reason, text));
        }

        if let Some(option) = classifier::option_choice(message_text) {
            info!(claim_id = %claim_id, rule = "option_choice", option, "Fast path");
            tokio::time::sleep(self.pacing.before_option_choice).await;
            let reason = format!("El cliente eligió la opción {} de refinanciación", option);
            let text = self.brain.solve(customer_id, message_text, &reason, &Category::Loan).await?;
            return Ok(escalated(Category::Loan, reason, text));
        }

        self.classify_with_model(message_text, customer_id, claim_id).await
    }

    /// Answer the questionnaire locally when the text is interpretable
    async fn continue_questionnaire(&self, message_text: &str, customer_id: &str, claim_id: &str) -> Result<TriageOutcome> {
        let reason = "Cuestionario de perfil de inversor en curso";

        let current = match self.gateway.investor_profile(customer_id).await {
            Ok(profile) => Some(profile.unwrap_or_default()),
            Err(e) => {
                warn!(customer_id = %customer_id, error = %e, "Profile read failed, deferring to specialist");
                None
            }
        };

        if let Some(update) = current.as_ref().and_then(|p| questionnaire::interpret(message_text, p)) {
            let merged = current.unwrap_or_default().merge(&update);

            match self.gateway.upsert_investor_profile(customer_id, &merged).await {
                Ok(_) => {
                    info!(claim_id = %claim_id, rule = "investment_questionnaire", complete = merged.is_complete(), "Fast path");
                    self.brain.cache().invalidate_customer(customer_id).await;
                    if merged.is_complete() {
                        self.sessions.mark_investment_complete(customer_id).await?;
                    }
                    return Ok(escalated(Category::Investments, reason, questionnaire::next_step(&merged)));
                }
                Err(e) => {
                    warn!(customer_id = %customer_id, error = %e, "Profile write failed, deferring to specialist");
                }
            }
        } else {
            debug!(claim_id = %claim_id, "Questionnaire answer not interpretable");
        }

        let text = self.brain.solve(customer_id, message_text, reason, &Category::Investments).await?;
        Ok(escalated(Category::Investments, reason, text))
    }

    async fn classify_with_model(&self, message_text: &str, customer_id: &str, claim_id: &str) -> Result<TriageOutcome> {
        let messages = [ChatMessage::system(TRIAGE_INSTRUCTION), ChatMessage::human(message_text)];
        let response = self.classifier.invoke(&messages, &[]).await?;

        let parsed = extract_json_object(&response.text).unwrap_or(Value::Null);
        let field = |key: &str| parsed.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty());

        let decision = match field("decision").map(str::to_uppercase).as_deref() {
            Some("RESOLVE") => TriageDecision::Resolve,
            Some("ESCALATE") => TriageDecision::Escalate,
            _ => {
                warn!(claim_id = %claim_id, raw = %response.text, "Unparseable triage output, escalating");
                TriageDecision::Escalate
            }
        };
        let category = field("category").map(Category::parse_loose).unwrap_or(Category::GeneralInfo);
        let reason = field("reason").unwrap_or("Sin detalle del clasificador").to_string();

        info!(
            claim_id = %claim_id,
            decision = ?decision,
            category = %category,
            model = self.classifier.model_name(),
            "Triage classification"
        );

        if decision == TriageDecision::Resolve {
            return Ok(TriageOutcome {
                decision,
                category,
                reason,
                response_text: field("response_to_user").unwrap_or(DEFAULT_RESOLVE_TEXT).to_string(),
            });
        }

        tokio::time::sleep(self.pacing.before_escalation).await;
        let brain_reason = format!("{} - {}", category, reason);
        let text = self.brain.solve(customer_id, message_text, &brain_reason, &category).await?;
        Ok(escalated(category, reason, text))
    }
}
