//! Specialist orchestrator - the two-phase tool-calling protocol
//!
//! CACHE_CHECK → INVOKE_1 → (no tools → DONE)
//!                        → EXECUTE_TOOLS → DIRECT_RESPONSE | INVOKE_2 → DONE

pub mod cache;
pub mod prompts;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{OfferHeuristics, PacingConfig};
use crate::context::{ContextBuilder, TurnFlow};
use crate::error::OrchestrationError;
use crate::gateway::BankingGateway;
use crate::inference::{ChatMessage, InferenceBackend, InferenceError, InferenceResponse, ToolCall, ToolSpec};
use crate::models::{Category, InvestorProfile};
use crate::questionnaire;
use crate::state::SessionStore;
use crate::tools::{ToolEffect, ToolOutput, ToolRegistry, TurnContext};
use crate::Result;

use cache::ResponseCache;

const SUCCESS_MARKERS: &[&str] = &["éxito", "exitoso", "success", "procesada", "creado"];

fn indicates_success(content: &str) -> bool {
    let lowered = content.to_lowercase();
    !lowered.trim_start().starts_with("error") && SUCCESS_MARKERS.iter().any(|m| lowered.contains(m))
}

/// One executed tool call of the current turn
struct ToolResult {
    call: ToolCall,
    write: bool,
    investment: bool,
    money_moving: bool,
    output: ToolOutput,
}

fn refinance_confirmation(effect: &ToolEffect) -> Option<String> {
    match effect {
        ToolEffect::Refinanced(p) => Some(format!(
            "¡Listo! Tu refinanciación fue procesada con éxito.\n\n\
             • Préstamos cancelados: {}\n\
             • Nuevo préstamo: ${:.2} en {} cuotas\n\
             • Tasa aplicada: {:.2}%\n\
             • Sobrante a acreditar en tu cuenta: ${:.2}\n\n\
             ¿Necesitás algo más?",
            p.source_loan_ids.len(),
            p.offered_amount,
            p.selected_quotas,
            p.applied_rate,
            p.expected_cash_out
        )),
        ToolEffect::LoanOriginated(p) => Some(format!(
            "¡Listo! Tu nuevo préstamo fue creado con éxito: ${:.2} en {} cuotas con una tasa de {:.2}%. \
             El dinero se acredita en tu cuenta en las próximas horas. ¿Necesitás algo más?",
            p.amount.unwrap_or_default(),
            p.quotas.unwrap_or_default(),
            p.rate.unwrap_or_default()
        )),
        _ => None,
    }
}

/// The specialist model plus everything it needs to act on a turn
pub struct Brain {
    backend: Arc<dyn InferenceBackend>,
    gateway: Arc<dyn BankingGateway>,
    sessions: Arc<SessionStore>,
    context_builder: ContextBuilder,
    cache: ResponseCache,
    pacing: PacingConfig,
}

impl Brain {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        gateway: Arc<dyn BankingGateway>,
        sessions: Arc<SessionStore>,
        pacing: PacingConfig,
        heuristics: OfferHeuristics,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            context_builder: ContextBuilder::new(gateway.clone(), heuristics),
            backend,
            gateway,
            sessions,
            cache: ResponseCache::new(cache_ttl),
            pacing,
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Answer one escalated claim.
    ///
    /// Only a repeated rate limit escapes as an error from the inference
    /// side; tool failures are fed back to the model as tool results.
    pub async fn solve(
        &self,
        customer_id: &str,
        claim_text: &str,
        reason: &str,
        category: &Category,
    ) -> Result<String> {
        // === CACHE_CHECK ===
        if let Some(cached) = self.cache.get(customer_id, claim_text).await {
            info!(customer_id = %customer_id, "Specialist cache hit");
            return Ok(cached);
        }

        let flow = TurnFlow::for_turn(reason, category);
        let context = self.context_builder.build(customer_id, reason, category).await;
        let registry = ToolRegistry::for_flow(flow);
        let specs = registry.specs();

        let mut messages = vec![ChatMessage::system(prompts::specialist_prompt(
            customer_id,
            reason,
            flow,
            &context,
        ))];
        messages.extend(
            self.sessions
                .history(customer_id)
                .await?
                .iter()
                .map(|turn| turn.to_chat_message()),
        );
        messages.push(ChatMessage::human(prompts::human_turn(customer_id, claim_text, &context)));

        // === INVOKE_1 ===
        let first = self.invoke_with_retry(&messages, &specs).await?;
        info!(
            customer_id = %customer_id,
            category = %category,
            model = self.backend.model_name(),
            tool_calls = first.tool_calls.len(),
            "Specialist first call complete"
        );

        if !first.has_tool_calls() {
            let text = first.text;
            self.cache.put(customer_id, claim_text, &text).await;
            return Ok(text);
        }

        // === EXECUTE_TOOLS ===
        let turn = TurnContext::new(customer_id, self.gateway.clone(), context.grounding.clone());
        let mut results = Vec::with_capacity(first.tool_calls.len());

        for call in &first.tool_calls {
            let result = self.execute_tool(&registry, call, &turn).await;
            if result.write && !matches!(result.output.effect, ToolEffect::None) {
                self.cache.invalidate_customer(customer_id).await;
            }
            results.push(result);
        }

        // === DIRECT_RESPONSE ===
        if let Some(confirmation) = results
            .iter()
            .filter(|r| r.money_moving && indicates_success(&r.output.content))
            .find_map(|r| refinance_confirmation(&r.output.effect))
        {
            info!(customer_id = %customer_id, "Money-moving tool succeeded, answering directly");
            return Ok(confirmation);
        }

        if results.iter().all(|r| r.investment) {
            let profile = results.iter().rev().find_map(|r| match &r.output.effect {
                ToolEffect::Profile(p) => Some(p.clone()),
                _ => None,
            });
            if let Some(profile) = profile {
                return self.questionnaire_step(customer_id, &profile).await;
            }
        }

        // === INVOKE_2 ===
        tokio::time::sleep(self.pacing.before_second_call).await;

        messages.push(ChatMessage::Ai {
            text: first.text.clone(),
            tool_calls: first.tool_calls.clone(),
        });
        messages.extend(results.into_iter().map(|r| ChatMessage::Tool {
            call_id: r.call.id,
            name: r.call.name,
            content: r.output.content,
        }));

        let second = self.invoke_with_retry(&messages, &specs).await?;
        if second.has_tool_calls() {
            warn!(
                customer_id = %customer_id,
                tool_calls = second.tool_calls.len(),
                "Specialist requested more tools after results; not executing"
            );
        }
        Ok(second.text)
    }

    async fn execute_tool(&self, registry: &ToolRegistry, call: &ToolCall, turn: &TurnContext) -> ToolResult {
        let Some(tool) = registry.get(&call.name) else {
            warn!(tool = %call.name, "Model called a tool outside the bound set");
            return ToolResult {
                call: call.clone(),
                write: false,
                investment: false,
                money_moving: false,
                output: ToolOutput::text(format!(
                    "Error: {}",
                    OrchestrationError::UnknownTool(call.name.clone())
                )),
            };
        };

        let name = tool.name();
        let output = match tool.execute(&call.args, turn).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = name.as_str(), error = %e, "Tool failed");
                ToolOutput::text(format!("Error: {}", e))
            }
        };
        debug!(tool = name.as_str(), content = %output.content, "Tool result");

        ToolResult {
            call: call.clone(),
            write: name.is_write(),
            investment: name.is_investment(),
            money_moving: name.is_money_moving(),
            output,
        }
    }

    /// Next question or completion summary, keeping the questionnaire flag in step
    async fn questionnaire_step(&self, customer_id: &str, profile: &InvestorProfile) -> Result<String> {
        if profile.is_complete() {
            self.sessions.mark_investment_complete(customer_id).await?;
            info!(customer_id = %customer_id, "Investor profile complete");
            Ok(questionnaire::profile_summary(profile))
        } else {
            self.sessions.mark_investment_active(customer_id).await?;
            Ok(questionnaire::next_step(profile))
        }
    }

    /// One retry after the cool-down on a rate limit; a second one surfaces
    async fn invoke_with_retry(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<InferenceResponse> {
        match self.backend.invoke(messages, tools).await {
            Err(InferenceError::RateLimited(detail)) => {
                warn!(
                    detail = %detail,
                    cooldown_ms = self.pacing.rate_limit_cooldown.as_millis() as u64,
                    "Rate limited, retrying once"
                );
                tokio::time::sleep(self.pacing.rate_limit_cooldown).await;
                Ok(self.backend.invoke(messages, tools).await?)
            }
            other => Ok(other?),
        }
    }
}
