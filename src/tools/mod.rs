//! Tool trait and registry
//!
//! The specialist model sees a fixed set of banking tools, bound per category.
//! Every tool runs against the turn's customer; arguments go through the
//! normalizer before anything reaches the gateway.

pub mod args;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::context::{fetch_refinance, format_transactions, TurnFlow};
use crate::gateway::BankingGateway;
use crate::inference::ToolSpec;
use crate::models::{InvestorProfile, NewLoanPayload, RefinancePayload};
use crate::normalizer::{
    normalize_investor_profile, normalize_new_loan, normalize_refinance, RefinanceGrounding,
};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    GetRefinanceContext,
    ExecuteRefinance,
    ExecuteNewLoan,
    GetRiskProfile,
    CreateOrUpdateProfileInvestor,
    GetCustomerTransactions,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::GetRefinanceContext,
        ToolName::ExecuteRefinance,
        ToolName::ExecuteNewLoan,
        ToolName::GetRiskProfile,
        ToolName::CreateOrUpdateProfileInvestor,
        ToolName::GetCustomerTransactions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::GetRefinanceContext => "get_refinance_context",
            ToolName::ExecuteRefinance => "execute_refinance",
            ToolName::ExecuteNewLoan => "execute_new_loan",
            ToolName::GetRiskProfile => "get_risk_profile",
            ToolName::CreateOrUpdateProfileInvestor => "create_or_update_profile_investor",
            ToolName::GetCustomerTransactions => "get_customer_transactions",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name.trim())
    }

    pub fn is_investment(&self) -> bool {
        matches!(
            self,
            ToolName::GetRiskProfile | ToolName::CreateOrUpdateProfileInvestor
        )
    }

    pub fn is_write(&self) -> bool {
        self.is_money_moving() || matches!(self, ToolName::CreateOrUpdateProfileInvestor)
    }

    /// Writes that move money; guarded against duplicates within a turn
    pub fn is_money_moving(&self) -> bool {
        matches!(self, ToolName::ExecuteRefinance | ToolName::ExecuteNewLoan)
    }
}

/// What a tool did, beyond the text fed back to the model
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEffect {
    None,
    Refinanced(RefinancePayload),
    LoanOriginated(NewLoanPayload),
    Profile(InvestorProfile),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub effect: ToolEffect,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            effect: ToolEffect::None,
        }
    }
}

/// Per-turn state shared by every tool call of one model response
pub struct TurnContext {
    pub customer_id: String,
    pub gateway: Arc<dyn BankingGateway>,
    pub grounding: RefinanceGrounding,
    executed_writes: Mutex<HashSet<String>>,
}

impl TurnContext {
    pub fn new(
        customer_id: impl Into<String>,
        gateway: Arc<dyn BankingGateway>,
        grounding: RefinanceGrounding,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            gateway,
            grounding,
            executed_writes: Mutex::new(HashSet::new()),
        }
    }

    /// `false` when an identical write already ran in this turn
    pub async fn claim_write(&self, fingerprint: String) -> bool {
        self.executed_writes.lock().await.insert(fingerprint)
    }

    /// The turn's grounding, or a fresh read when the context had none
    async fn refinance_grounding(&self) -> Result<RefinanceGrounding> {
        if !self.grounding.is_empty() {
            return Ok(self.grounding.clone());
        }
        let fresh = fetch_refinance(self.gateway.as_ref(), &self.customer_id).await?;
        Ok(RefinanceGrounding::from_context(&fresh))
    }
}

/// SHA-256 over the tool name, customer and canonical payload JSON
pub fn write_fingerprint<T: Serialize>(tool: ToolName, customer_id: &str, payload: &T) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(tool.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(customer_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(serde_json::to_vec(payload)?);
    Ok(hex::encode(hasher.finalize()))
}

fn duplicate_write(tool: ToolName) -> ToolOutput {
    warn!(tool = tool.as_str(), "Duplicate write within one turn suppressed");
    ToolOutput::text(
        "Operación ya ejecutada en este turno con los mismos datos; no se volvió a enviar.",
    )
}

/// Trait for a single banking tool
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Value;
    async fn execute(&self, args: &Value, turn: &TurnContext) -> Result<ToolOutput>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().as_str(),
            description: self.description(),
            parameters: self.parameters(),
        }
    }
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Only tools bound to this registry resolve
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        ToolName::parse(name).and_then(|n| self.tools.get(&n).cloned())
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by_key(|s| s.name);
        specs
    }

    pub fn for_flow(flow: TurnFlow) -> Self {
        let mut registry = Self::new();
        match flow {
            TurnFlow::Loan => {
                registry.register(Arc::new(GetRefinanceContextTool));
                registry.register(Arc::new(ExecuteRefinanceTool));
                registry.register(Arc::new(ExecuteNewLoanTool));
            }
            TurnFlow::Investments => {
                registry.register(Arc::new(GetRiskProfileTool));
                registry.register(Arc::new(CreateOrUpdateProfileTool));
            }
            TurnFlow::Claims => {
                registry.register(Arc::new(GetCustomerTransactionsTool));
            }
        }
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn no_parameters() -> Value {
    json!({"type": "object", "properties": {}})
}

pub struct GetRefinanceContextTool;

#[async_trait]
impl Tool for GetRefinanceContextTool {
    fn name(&self) -> ToolName {
        ToolName::GetRefinanceContext
    }

    fn description(&self) -> &'static str {
        "Obtiene los préstamos elegibles para refinanciar y las ofertas nuevas del cliente."
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn execute(&self, _args: &Value, turn: &TurnContext) -> Result<ToolOutput> {
        let ctx = fetch_refinance(turn.gateway.as_ref(), &turn.customer_id).await?;
        let grounding = RefinanceGrounding::from_context(&ctx);

        Ok(ToolOutput::text(
            json!({
                "eligibleLoans": ctx.eligible_loans,
                "newOffers": ctx.new_offers,
                "totalDebt": grounding.total_debt,
                "options": grounding.options,
            })
            .to_string(),
        ))
    }
}

pub struct ExecuteRefinanceTool;

#[async_trait]
impl Tool for ExecuteRefinanceTool {
    fn name(&self) -> ToolName {
        ToolName::ExecuteRefinance
    }

    fn description(&self) -> &'static str {
        "Ejecuta la refinanciación de TODOS los préstamos elegibles. Usar solo tras confirmación explícita del cliente."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "optionIndex": {"type": "integer", "description": "Número de opción elegida (1 = primera de la lista)"},
                "sourceLoanIds": {"type": "array", "items": {"type": "string"}, "description": "UUIDs de todos los préstamos elegibles"},
                "offeredAmount": {"type": "number"},
                "selectedQuotas": {"type": "integer"},
                "appliedRate": {"type": "number"},
                "expectedCashOut": {"type": "number"}
            }
        })
    }

    async fn execute(&self, args: &Value, turn: &TurnContext) -> Result<ToolOutput> {
        let grounding = turn.refinance_grounding().await?;
        let payload = normalize_refinance(args, &turn.customer_id, &grounding)?;

        let fingerprint = write_fingerprint(self.name(), &turn.customer_id, &payload)?;
        if !turn.claim_write(fingerprint).await {
            return Ok(duplicate_write(self.name()));
        }

        info!(
            customer_id = %turn.customer_id,
            loans = payload.source_loan_ids.len(),
            amount = payload.offered_amount,
            "Submitting refinance"
        );

        match turn.gateway.execute_refinance(&payload).await {
            Ok(details) => Ok(ToolOutput {
                content: format!("Éxito: Operación procesada. Detalles: {}", details),
                effect: ToolEffect::Refinanced(payload),
            }),
            Err(e) => {
                warn!(customer_id = %turn.customer_id, error = %e, "Refinance rejected");
                Ok(ToolOutput::text(format!("Error en la refinanciación: {}", e)))
            }
        }
    }
}

pub struct ExecuteNewLoanTool;

#[async_trait]
impl Tool for ExecuteNewLoanTool {
    fn name(&self) -> ToolName {
        ToolName::ExecuteNewLoan
    }

    fn description(&self) -> &'static str {
        "Otorga un préstamo nuevo cuando el cliente tiene oferta pero no puede refinanciar. Requiere amount, quotas y rate."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "amount": {"type": "number"},
                "quotas": {"type": "integer"},
                "rate": {"type": "number"}
            },
            "required": ["amount", "quotas", "rate"]
        })
    }

    async fn execute(&self, args: &Value, turn: &TurnContext) -> Result<ToolOutput> {
        let payload = normalize_new_loan(args, &turn.customer_id);

        let fingerprint = write_fingerprint(self.name(), &turn.customer_id, &payload)?;
        if !turn.claim_write(fingerprint).await {
            return Ok(duplicate_write(self.name()));
        }

        match turn.gateway.originate_loan(&payload).await {
            Ok(details) => Ok(ToolOutput {
                content: format!("Éxito: Nuevo préstamo creado. Detalles: {}", details),
                effect: ToolEffect::LoanOriginated(payload),
            }),
            Err(e) => {
                warn!(customer_id = %turn.customer_id, error = %e, "New loan rejected");
                Ok(ToolOutput::text(format!("Error en nuevo préstamo: {}", e)))
            }
        }
    }
}

pub struct GetRiskProfileTool;

#[async_trait]
impl Tool for GetRiskProfileTool {
    fn name(&self) -> ToolName {
        ToolName::GetRiskProfile
    }

    fn description(&self) -> &'static str {
        "Obtiene el perfil de inversor del cliente (riskLevel, maxLossPercent, horizon, hasProfile)."
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn execute(&self, _args: &Value, turn: &TurnContext) -> Result<ToolOutput> {
        let profile = turn
            .gateway
            .investor_profile(&turn.customer_id)
            .await?
            .unwrap_or_default()
            .normalized();

        Ok(ToolOutput {
            content: serde_json::to_string(&profile)?,
            effect: ToolEffect::Profile(profile),
        })
    }
}

pub struct CreateOrUpdateProfileTool;

#[async_trait]
impl Tool for CreateOrUpdateProfileTool {
    fn name(&self) -> ToolName {
        ToolName::CreateOrUpdateProfileInvestor
    }

    fn description(&self) -> &'static str {
        "Crea o actualiza el perfil de inversor con las respuestas del cliente. Enviar solo los campos respondidos."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "riskLevel": {"type": "string", "enum": ["CONSERVADOR", "MODERADO", "AGRESIVO", "SUPER_AGRESIVO"]},
                "maxLossPercent": {"type": "integer", "minimum": 0, "maximum": 100},
                "horizon": {"type": "string", "enum": ["SHORT", "MEDIUM", "LONG"]}
            }
        })
    }

    async fn execute(&self, args: &Value, turn: &TurnContext) -> Result<ToolOutput> {
        let merged = normalize_investor_profile(args, &turn.customer_id, turn.gateway.as_ref()).await?;

        match turn
            .gateway
            .upsert_investor_profile(&turn.customer_id, &merged)
            .await
        {
            Ok(_) => Ok(ToolOutput {
                content: format!("Perfil de inversor actualizado: {}", serde_json::to_string(&merged)?),
                effect: ToolEffect::Profile(merged),
            }),
            Err(e) => {
                warn!(customer_id = %turn.customer_id, error = %e, "Profile upsert rejected");
                Ok(ToolOutput::text(format!("Error al guardar el perfil de inversor: {}", e)))
            }
        }
    }
}

pub struct GetCustomerTransactionsTool;

#[async_trait]
impl Tool for GetCustomerTransactionsTool {
    fn name(&self) -> ToolName {
        ToolName::GetCustomerTransactions
    }

    fn description(&self) -> &'static str {
        "Consulta las transacciones recientes del cliente (pagos fallidos, duplicados, estados)."
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn execute(&self, _args: &Value, turn: &TurnContext) -> Result<ToolOutput> {
        let transactions = turn.gateway.transactions(&turn.customer_id).await?;
        Ok(ToolOutput::text(format_transactions(&transactions)))
    }
}
