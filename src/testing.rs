//! Shared fakes for unit tests

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::gateway::{BankingGateway, GatewayError};
use crate::inference::{ChatMessage, InferenceBackend, InferenceError, InferenceResponse, ToolCall, ToolSpec};
use crate::models::{
    EligibleLoan, InvestorProfile, LoanOffer, NewLoanPayload, RefinancePayload, Transaction,
};

pub const LOAN_A: &str = "0b6f3a5e-8f55-4b43-9a8e-0d3f3c1c2a11";
pub const LOAN_B: &str = "6a1e0d8c-3b2f-4f6e-8a7d-9c5b4e3f2a10";
pub const LOAN_C: &str = "c3d2e1f0-1a2b-4c3d-8e4f-5a6b7c8d9e0f";

/// Three loans totalling $175,000
pub fn sample_loans() -> Vec<EligibleLoan> {
    [(LOAN_A, "LOAN-001", 100_000.0), (LOAN_B, "LOAN-002", 50_000.0), (LOAN_C, "LOAN-003", 25_000.0)]
        .into_iter()
        .map(|(id, number, remaining)| EligibleLoan {
            id: id.to_string(),
            loan_number: number.to_string(),
            remaining_amount: remaining,
            paid_quotas: 2,
            total_quotas: 12,
        })
        .collect()
}

/// Four offers, all covering `sample_loans`, listed out of rank order
pub fn sample_offers() -> Vec<LoanOffer> {
    [(300_000.0, 48, 90.0), (200_000.0, 24, 70.0), (400_000.0, 60, 95.0), (250_000.0, 36, 80.0)]
        .into_iter()
        .map(|(max_amount, max_quotas, monthly_rate)| LoanOffer {
            max_amount,
            max_quotas,
            monthly_rate,
        })
        .collect()
}

pub fn tool_call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        args,
    }
}

/// In-memory core banking with write counters and failure switches
#[derive(Default)]
pub struct FakeGateway {
    loans: Vec<EligibleLoan>,
    offers: Vec<LoanOffer>,
    transactions: Vec<Transaction>,
    profile: Mutex<Option<InvestorProfile>>,
    fail_reads: bool,
    reject_writes: Option<String>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    pub refinances: Mutex<Vec<RefinancePayload>>,
    pub new_loans: Mutex<Vec<NewLoanPayload>>,
    pub profile_writes: Mutex<Vec<InvestorProfile>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loans(mut self, loans: Vec<EligibleLoan>) -> Self {
        self.loans = loans;
        self
    }

    pub fn with_offers(mut self, offers: Vec<LoanOffer>) -> Self {
        self.offers = offers;
        self
    }

    pub fn with_transactions(mut self, transactions: Vec<Transaction>) -> Self {
        self.transactions = transactions;
        self
    }

    pub fn with_profile(self, profile: InvestorProfile) -> Self {
        *self.profile.lock().unwrap() = Some(profile);
        self
    }

    /// Every read answers HTTP 500
    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Every write answers HTTP 422 with `message`
    pub fn rejecting_writes(mut self, message: &str) -> Self {
        self.reject_writes = Some(message.to_string());
        self
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn current_profile(&self) -> Option<InvestorProfile> {
        self.profile.lock().unwrap().clone()
    }

    fn read(&self) -> Result<(), GatewayError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            return Err(GatewayError::Status {
                status: 500,
                message: "Internal Server Error".to_string(),
            });
        }
        Ok(())
    }

    fn write(&self) -> Result<(), GatewayError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        match &self.reject_writes {
            Some(message) => Err(GatewayError::Status {
                status: 422,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BankingGateway for FakeGateway {
    async fn loans_to_cancel(&self, _customer_id: &str) -> Result<Vec<EligibleLoan>, GatewayError> {
        self.read()?;
        Ok(self.loans.clone())
    }

    async fn available_offers(&self, _customer_id: &str) -> Result<Vec<LoanOffer>, GatewayError> {
        self.read()?;
        Ok(self.offers.clone())
    }

    async fn transactions(&self, _customer_id: &str) -> Result<Vec<Transaction>, GatewayError> {
        self.read()?;
        Ok(self.transactions.clone())
    }

    async fn investor_profile(
        &self,
        _customer_id: &str,
    ) -> Result<Option<InvestorProfile>, GatewayError> {
        self.read()?;
        Ok(self.current_profile())
    }

    async fn upsert_investor_profile(
        &self,
        _customer_id: &str,
        profile: &InvestorProfile,
    ) -> Result<Value, GatewayError> {
        self.write()?;
        let stored = profile.clone().normalized();
        self.profile_writes.lock().unwrap().push(stored.clone());
        *self.profile.lock().unwrap() = Some(stored.clone());
        Ok(serde_json::to_value(stored).unwrap_or(Value::Null))
    }

    async fn execute_refinance(&self, payload: &RefinancePayload) -> Result<Value, GatewayError> {
        self.write()?;
        self.refinances.lock().unwrap().push(payload.clone());
        Ok(json!({"operationId": "op-1", "status": "PROCESSED"}))
    }

    async fn originate_loan(&self, payload: &NewLoanPayload) -> Result<Value, GatewayError> {
        if payload.amount.is_none() || payload.quotas.is_none() || payload.rate.is_none() {
            return Err(GatewayError::MissingParameters(
                "amount, quotas and rate are required".to_string(),
            ));
        }
        self.write()?;
        self.new_loans.lock().unwrap().push(payload.clone());
        Ok(json!({"loanNumber": "LOAN-900", "status": "ACTIVE"}))
    }
}

/// Inference backend that replays queued outcomes and records every request
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<InferenceResponse, InferenceError>>>,
    requests: Mutex<Vec<(Vec<ChatMessage>, Vec<&'static str>)>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_text(self, text: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(InferenceResponse::text(text)));
        self
    }

    pub fn then_tool_calls(self, tool_calls: Vec<ToolCall>) -> Self {
        self.script.lock().unwrap().push_back(Ok(InferenceResponse {
            text: String::new(),
            tool_calls,
        }));
        self
    }

    pub fn then_error(self, error: InferenceError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn messages(&self, call: usize) -> Vec<ChatMessage> {
        self.requests.lock().unwrap()[call].0.clone()
    }

    pub fn bound_tools(&self, call: usize) -> Vec<&'static str> {
        self.requests.lock().unwrap()[call].1.clone()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<InferenceResponse, InferenceError> {
        self.requests
            .lock()
            .unwrap()
            .push((messages.to_vec(), tools.iter().map(|t| t.name).collect()));

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(InferenceError::Unknown("script exhausted".to_string())))
    }
}
