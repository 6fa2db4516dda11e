//! Unit-of-work handler: inbound claim → resolution
//!
//! Never fails: every error becomes an ERROR resolution with a customer-facing
//! text. Claims for the same customer are serialized so session history and the
//! questionnaire flag never race within one process.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::agent::Brain;
use crate::config::Settings;
use crate::gateway::{BankingGateway, HttpBankingGateway};
use crate::gemini::GeminiClient;
use crate::inference::InferenceBackend;
use crate::models::{ClaimResolution, InboundClaim, ResolutionStatus, TriageDecision};
use crate::state::SessionStore;
use crate::triage::TriageDispatcher;
use crate::Result;

pub const RATE_LIMIT_TEXT: &str =
    "Estamos recibiendo muchas consultas en este momento. Por favor, intentá de nuevo en unos minutos.";

pub const APOLOGY_TEXT: &str = "Lo sentimos, ocurrió un error al procesar tu consulta. \
Por favor, intentá nuevamente más tarde o comunicate con nuestro equipo de soporte.";

/// ERROR resolution for an inbound line that is not a valid claim.
///
/// `None` when no id can be recovered, since the resolution could not be
/// correlated with anything.
pub fn malformed_claim_resolution(raw: &str) -> Option<ClaimResolution> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let id = match value.get("id")? {
        serde_json::Value::String(id) if !id.trim().is_empty() => id.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };

    Some(ClaimResolution {
        id,
        resolution: APOLOGY_TEXT.to_string(),
        status: ResolutionStatus::Error,
        category: None,
    })
}

pub struct ClaimProcessor {
    triage: TriageDispatcher,
    brain: Arc<Brain>,
    sessions: Arc<SessionStore>,
    customer_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ClaimProcessor {
    pub fn new(triage: TriageDispatcher, brain: Arc<Brain>, sessions: Arc<SessionStore>) -> Self {
        Self {
            triage,
            brain,
            sessions,
            customer_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the Gemini models, the banking gateway and the session store
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let triage_model: Arc<dyn InferenceBackend> = Arc::new(
            GeminiClient::new(settings.gemini.api_key.clone(), settings.gemini.triage_model.clone())?
                .with_temperature(0.0),
        );
        let specialist_model: Arc<dyn InferenceBackend> = Arc::new(GeminiClient::new(
            settings.gemini.api_key.clone(),
            settings.gemini.specialist_model.clone(),
        )?);
        let gateway: Arc<dyn BankingGateway> = Arc::new(HttpBankingGateway::new(&settings.gateway)?);
        let sessions = Arc::new(SessionStore::connect(settings.database_url.as_deref(), &settings.session));

        let brain = Arc::new(Brain::new(
            specialist_model,
            gateway.clone(),
            sessions.clone(),
            settings.pacing.clone(),
            settings.offers.clone(),
            settings.cache_ttl,
        ));
        let triage = TriageDispatcher::new(
            triage_model,
            brain.clone(),
            sessions.clone(),
            gateway,
            settings.pacing.clone(),
            settings.fast_path.clone(),
        );

        info!(
            triage_model = %settings.gemini.triage_model,
            specialist_model = %settings.gemini.specialist_model,
            sessions = sessions.backend_name(),
            "Claim processor ready"
        );

        Ok(Self::new(triage, brain, sessions))
    }

    pub async fn process(&self, claim: InboundClaim) -> ClaimResolution {
        let customer_lock = self.lock_for(&claim.customer_id).await;
        let guard = customer_lock.lock().await;

        let resolution = self.resolve(&claim).await;

        drop(guard);
        drop(customer_lock);
        self.release_lock(&claim.customer_id).await;

        resolution
    }

    async fn resolve(&self, claim: &InboundClaim) -> ClaimResolution {
        info!(claim_id = %claim.id, customer_id = %claim.customer_id, "Processing claim");

        match self.triage.classify(&claim.message, &claim.customer_id, &claim.id).await {
            Ok(outcome) => {
                let status = match outcome.decision {
                    TriageDecision::Resolve => ResolutionStatus::Processed,
                    TriageDecision::Escalate => {
                        if let Err(e) = self
                            .sessions
                            .append_turn(&claim.customer_id, &claim.message, &outcome.response_text)
                            .await
                        {
                            warn!(customer_id = %claim.customer_id, error = %e, "Failed to record turn");
                        }
                        ResolutionStatus::Escalated
                    }
                };

                ClaimResolution {
                    id: claim.id.clone(),
                    resolution: outcome.response_text,
                    status,
                    category: Some(outcome.category.to_string()),
                }
            }
            Err(e) if e.is_rate_limited() => {
                warn!(claim_id = %claim.id, error = %e, "Rate limited after retry");
                ClaimResolution {
                    id: claim.id.clone(),
                    resolution: RATE_LIMIT_TEXT.to_string(),
                    status: ResolutionStatus::Error,
                    category: None,
                }
            }
            Err(e) => {
                error!(claim_id = %claim.id, error = %e, "Claim processing failed");
                ClaimResolution {
                    id: claim.id.clone(),
                    resolution: APOLOGY_TEXT.to_string(),
                    status: ResolutionStatus::Error,
                    category: None,
                }
            }
        }
    }

    /// Drop history, the questionnaire flag and cached answers
    pub async fn clear_session(&self, customer_id: &str) -> Result<()> {
        self.sessions.clear(customer_id).await?;
        self.brain.cache().invalidate_customer(customer_id).await;
        Ok(())
    }

    async fn lock_for(&self, customer_id: &str) -> Arc<Mutex<()>> {
        self.customer_locks
            .lock()
            .await
            .entry(customer_id.to_string())
            .or_default()
            .clone()
    }

    async fn release_lock(&self, customer_id: &str) {
        let mut locks = self.customer_locks.lock().await;
        if locks.get(customer_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(customer_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FastPathConfig, OfferHeuristics, PacingConfig, SessionSettings};
    use crate::inference::InferenceError;
    use crate::memory::TurnRole;
    use crate::testing::{FakeGateway, ScriptedBackend};
    use std::time::Duration;

    fn processor(triage_model: ScriptedBackend, specialist: ScriptedBackend, gateway: FakeGateway) -> ClaimProcessor {
        let gateway = Arc::new(gateway);
        let sessions = Arc::new(SessionStore::in_memory(&SessionSettings::default()));
        let brain = Arc::new(Brain::new(
            Arc::new(specialist),
            gateway.clone(),
            sessions.clone(),
            PacingConfig::none(),
            OfferHeuristics::default(),
            Duration::from_secs(300),
        ));
        let triage = TriageDispatcher::new(
            Arc::new(triage_model),
            brain.clone(),
            sessions.clone(),
            gateway,
            PacingConfig::none(),
            FastPathConfig::default(),
        );
        ClaimProcessor::new(triage, brain, sessions)
    }

    fn claim(message: &str) -> InboundClaim {
        InboundClaim {
            id: "m-1".to_string(),
            message: message.to_string(),
            customer_id: "C1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_escalated_turn_is_recorded() {
        let p = processor(
            ScriptedBackend::new(),
            ScriptedBackend::new().then_text("Estas son tus opciones."),
            FakeGateway::new(),
        );

        let resolution = p.process(claim("quiero refinanciar mis préstamos y unificar la deuda")).await;

        assert_eq!(resolution.status, ResolutionStatus::Escalated);
        assert_eq!(resolution.category.as_deref(), Some("LOAN"));

        let history = p.sessions.history("C1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, TurnRole::Human);
        assert_eq!(history[1].text, "Estas son tus opciones.");
    }

    #[tokio::test]
    async fn test_resolved_turn_is_not_recorded() {
        let p = processor(
            ScriptedBackend::new().then_text(r#"{"decision": "RESOLVE", "category": "INFO_GENERAL", "reason": "saludo", "response_to_user": "¡Hola!"}"#),
            ScriptedBackend::new(),
            FakeGateway::new(),
        );

        let resolution = p.process(claim("hola")).await;

        assert_eq!(resolution.status, ResolutionStatus::Processed);
        assert_eq!(resolution.resolution, "¡Hola!");
        assert!(p.sessions.history("C1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_double_rate_limit_maps_to_try_again() {
        let p = processor(
            ScriptedBackend::new(),
            ScriptedBackend::new()
                .then_error(InferenceError::RateLimited("429".to_string()))
                .then_error(InferenceError::RateLimited("429".to_string())),
            FakeGateway::new(),
        );

        let resolution = p.process(claim("quiero refinanciar mis préstamos y unificar la deuda")).await;

        assert_eq!(resolution.status, ResolutionStatus::Error);
        assert_eq!(resolution.resolution, RATE_LIMIT_TEXT);
    }

    #[tokio::test]
    async fn test_unexpected_failure_maps_to_apology() {
        let p = processor(
            ScriptedBackend::new().then_error(InferenceError::InvalidRequest("missing API key".to_string())),
            ScriptedBackend::new(),
            FakeGateway::new(),
        );

        let resolution = p.process(claim("hola")).await;

        assert_eq!(resolution.status, ResolutionStatus::Error);
        assert_eq!(resolution.resolution, APOLOGY_TEXT);
        assert!(resolution.category.is_none());
    }

    #[tokio::test]
    async fn test_clear_session() {
        let p = processor(ScriptedBackend::new(), ScriptedBackend::new(), FakeGateway::new());
        p.sessions.append_turn("C1", "hola", "¡Hola!").await.unwrap();
        p.sessions.mark_investment_active("C1").await.unwrap();

        p.clear_session("C1").await.unwrap();

        assert!(p.sessions.history("C1").await.unwrap().is_empty());
        assert!(!p.sessions.is_investment_active("C1").await.unwrap());
    }

    #[test]
    fn test_malformed_claim_keeps_its_id() {
        let resolution = malformed_claim_resolution(r#"{"id": "m-9", "customerId": "C1"}"#).unwrap();
        assert_eq!(resolution.id, "m-9");
        assert_eq!(resolution.status, ResolutionStatus::Error);
        assert_eq!(resolution.resolution, APOLOGY_TEXT);

        assert_eq!(malformed_claim_resolution(r#"{"id": 42, "text": null}"#).unwrap().id, "42");
    }

    #[test]
    fn test_malformed_claim_without_id_is_dropped() {
        assert!(malformed_claim_resolution("not json").is_none());
        assert!(malformed_claim_resolution(r#"{"message": "hola"}"#).is_none());
        assert!(malformed_claim_resolution(r#"{"id": "  ", "message": 3}"#).is_none());
    }

    #[tokio::test]
    async fn test_customer_locks_are_released() {
        let p = processor(
            ScriptedBackend::new().then_text(r#"{"decision": "RESOLVE", "category": "INFO", "reason": "", "response_to_user": "ok"}"#),
            ScriptedBackend::new(),
            FakeGateway::new(),
        );

        p.process(claim("hola")).await;
        assert!(p.customer_locks.lock().await.is_empty());
    }
}
