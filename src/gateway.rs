//! Banking gateway
//!
//! Typed wrapper over the core-banking REST service. Reads are bounded GETs
//! where 204/404 is a valid empty result; writes are bounded POSTs that are
//! never retried here. An ambiguous write failure must surface to the caller.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GatewaySettings;
use crate::models::{
    is_known_customer, EligibleLoan, InvestorProfile, LoanOffer, NewLoanPayload,
    RefinancePayload, Transaction,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("invalid customer id: {0:?}")]
    InvalidCustomer(String),

    #[error("connection to core banking failed: {0}")]
    Transport(String),

    #[error("core banking returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response from core banking: {0}")]
    Decode(String),

    #[error("missing parameters: {0}")]
    MissingParameters(String),
}

/// Operations the orchestrator needs from the core-banking service
#[async_trait]
pub trait BankingGateway: Send + Sync {
    async fn loans_to_cancel(&self, customer_id: &str) -> Result<Vec<EligibleLoan>, GatewayError>;

    async fn available_offers(&self, customer_id: &str) -> Result<Vec<LoanOffer>, GatewayError>;

    async fn transactions(&self, customer_id: &str) -> Result<Vec<Transaction>, GatewayError>;

    /// `None` when the customer has no profile yet
    async fn investor_profile(
        &self,
        customer_id: &str,
    ) -> Result<Option<InvestorProfile>, GatewayError>;

    async fn upsert_investor_profile(
        &self,
        customer_id: &str,
        profile: &InvestorProfile,
    ) -> Result<Value, GatewayError>;

    async fn execute_refinance(&self, payload: &RefinancePayload) -> Result<Value, GatewayError>;

    async fn originate_loan(&self, payload: &NewLoanPayload) -> Result<Value, GatewayError>;
}

/// reqwest-backed gateway
#[derive(Clone)]
pub struct HttpBankingGateway {
    client: Client,
    base_url: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl HttpBankingGateway {
    pub fn new(settings: &GatewaySettings) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            read_timeout: settings.read_timeout,
            write_timeout: settings.write_timeout,
        })
    }

    fn require_customer(customer_id: &str) -> Result<&str, GatewayError> {
        if is_known_customer(customer_id) {
            Ok(customer_id.trim())
        } else {
            Err(GatewayError::InvalidCustomer(customer_id.to_string()))
        }
    }

    /// GET returning `None` for 204/404 or an empty body
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, GatewayError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .timeout(self.read_timeout)
            .send()
            .await
            .map_err(|e| {
                GatewayError::Transport(format!("GET {} failed: {}", path, e))
            })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            debug!(%path, %status, "Core banking returned empty result");
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(format!("GET {} body: {}", path, e)))?;

        if !status.is_success() {
            warn!(%path, %status, "Core banking read failed");
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message: error_message(&body, status),
            });
        }

        if body.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| GatewayError::Decode(format!("{}: {}", path, e)))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .timeout(self.write_timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                GatewayError::Transport(format!("POST {} failed: {}", path, e))
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(format!("POST {} body: {}", path, e)))?;

        if !status.is_success() {
            warn!(%path, %status, "Core banking write rejected");
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message: error_message(&text, status),
            });
        }

        if text.trim().is_empty() {
            return Ok(json!({}));
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// Prefer the body's `message` field, then a JSON string body, then raw text
fn error_message(body: &str, status: StatusCode) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => s,
        Ok(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(map).to_string()),
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => status
            .canonical_reason()
            .unwrap_or("no detail")
            .to_string(),
    }
}

#[async_trait]
impl BankingGateway for HttpBankingGateway {
    async fn loans_to_cancel(&self, customer_id: &str) -> Result<Vec<EligibleLoan>, GatewayError> {
        let customer_id = Self::require_customer(customer_id)?;
        Ok(self
            .get_json(&format!("/loans-to-cancel/{}", customer_id))
            .await?
            .unwrap_or_default())
    }

    async fn available_offers(&self, customer_id: &str) -> Result<Vec<LoanOffer>, GatewayError> {
        let customer_id = Self::require_customer(customer_id)?;
        Ok(self
            .get_json(&format!("/available-offer/{}", customer_id))
            .await?
            .unwrap_or_default())
    }

    async fn transactions(&self, customer_id: &str) -> Result<Vec<Transaction>, GatewayError> {
        let customer_id = Self::require_customer(customer_id)?;
        Ok(self
            .get_json(&format!("/transactions/{}", customer_id))
            .await?
            .unwrap_or_default())
    }

    async fn investor_profile(
        &self,
        customer_id: &str,
    ) -> Result<Option<InvestorProfile>, GatewayError> {
        let customer_id = Self::require_customer(customer_id)?;
        let profile: Option<InvestorProfile> = self
            .get_json(&format!("/profile-investor/{}", customer_id))
            .await?;
        Ok(profile.map(InvestorProfile::normalized))
    }

    async fn upsert_investor_profile(
        &self,
        customer_id: &str,
        profile: &InvestorProfile,
    ) -> Result<Value, GatewayError> {
        let customer_id = Self::require_customer(customer_id)?;
        let body = serde_json::to_value(profile.clone().normalized())
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        self.post_json(&format!("/new-profile-investor/{}", customer_id), &body)
            .await
    }

    async fn execute_refinance(&self, payload: &RefinancePayload) -> Result<Value, GatewayError> {
        Self::require_customer(&payload.customer_id)?;
        if payload.source_loan_ids.is_empty() {
            return Err(GatewayError::MissingParameters(
                "sourceLoanIds must not be empty".to_string(),
            ));
        }
        let body = serde_json::to_value(payload).map_err(|e| GatewayError::Decode(e.to_string()))?;
        self.post_json("/refinance", &body).await
    }

    async fn originate_loan(&self, payload: &NewLoanPayload) -> Result<Value, GatewayError> {
        let customer_id = Self::require_customer(&payload.customer_id)?;

        let (Some(amount), Some(quotas), Some(rate)) = (payload.amount, payload.quotas, payload.rate)
        else {
            return Err(GatewayError::MissingParameters(
                "amount, quotas and rate are required".to_string(),
            ));
        };

        self.post_json(
            &format!("/new-loan/{}", customer_id),
            &json!({ "amount": amount, "quotas": quotas, "rate": rate }),
        )
        .await
    }
}
