//! Session store
//!
//! Per-customer conversation window and the investment-questionnaire flag.
//! Postgres when a database URL is configured, in-process maps otherwise.
//! Both backends expire entries after the configured TTL.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::config::SessionSettings;
use crate::error::OrchestrationError;
use crate::memory::{ConversationHistory, ConversationTurn, TurnRole};
use crate::Result;

enum SessionBackend {
    InMemory {
        histories: RwLock<HashMap<String, ConversationHistory>>,
        investment: RwLock<HashMap<String, DateTime<Utc>>>,
    },
    Postgres {
        pool: PgPool,
        schema_ready: OnceCell<()>,
    },
}

pub struct SessionStore {
    backend: SessionBackend,
    max_turn_pairs: usize,
    ttl: Duration,
}

fn db_err(context: &str) -> impl FnOnce(sqlx::Error) -> OrchestrationError + '_ {
    move |e| OrchestrationError::DatabaseError(format!("{}: {}", context, e))
}

impl SessionStore {
    pub fn in_memory(settings: &SessionSettings) -> Self {
        Self {
            backend: SessionBackend::InMemory {
                histories: RwLock::new(HashMap::new()),
                investment: RwLock::new(HashMap::new()),
            },
            max_turn_pairs: settings.max_turn_pairs,
            ttl: settings.ttl,
        }
    }

    /// Postgres when `database_url` is set and parses, in-memory otherwise
    pub fn connect(database_url: Option<&str>, settings: &SessionSettings) -> Self {
        if let Some(url) = database_url {
            match PgPoolOptions::new().max_connections(5).connect_lazy(url) {
                Ok(pool) => {
                    info!("Session store backend: postgres");
                    return Self {
                        backend: SessionBackend::Postgres {
                            pool,
                            schema_ready: OnceCell::new(),
                        },
                        max_turn_pairs: settings.max_turn_pairs,
                        ttl: settings.ttl,
                    };
                }
                Err(error) => {
                    warn!(
                        "Failed to initialize postgres session backend, falling back to in-memory: {}",
                        error
                    );
                }
            }
        }

        info!("Session store backend: in-memory");
        Self::in_memory(settings)
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            SessionBackend::InMemory { .. } => "in-memory",
            SessionBackend::Postgres { .. } => "postgres",
        }
    }

    fn is_expired(&self, at: DateTime<Utc>) -> bool {
        let elapsed = (Utc::now() - at).to_std().unwrap_or(Duration::ZERO);
        elapsed >= self.ttl
    }

    async fn ensure_schema(&self, pool: &PgPool, schema_ready: &OnceCell<()>) -> Result<()> {
        schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS session_turns (
                      seq BIGSERIAL PRIMARY KEY,
                      customer_id TEXT NOT NULL,
                      role TEXT NOT NULL,
                      text TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_session_turns_customer_seq
                    ON session_turns (customer_id, seq);
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS investment_sessions (
                      customer_id TEXT PRIMARY KEY,
                      activated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(db_err("Failed to initialize session schema"))?;

        Ok(())
    }

    /// Turns for `customer_id`, oldest first, bounded to the window
    pub async fn history(&self, customer_id: &str) -> Result<Vec<ConversationTurn>> {
        match &self.backend {
            SessionBackend::InMemory { histories, .. } => {
                let locked = histories.read().await;
                Ok(match locked.get(customer_id) {
                    Some(history) if !history.updated_at().is_some_and(|at| self.is_expired(at)) => {
                        history.turns().cloned().collect()
                    }
                    _ => Vec::new(),
                })
            }
            SessionBackend::Postgres { pool, schema_ready } => {
                self.ensure_schema(pool, schema_ready).await?;

                let rows = sqlx::query(
                    r#"
                    SELECT role, text, created_at
                    FROM session_turns
                    WHERE customer_id = $1
                      AND created_at > NOW() - make_interval(secs => $2)
                    ORDER BY seq DESC
                    LIMIT $3
                    "#,
                )
                .bind(customer_id)
                .bind(self.ttl.as_secs_f64())
                .bind((self.max_turn_pairs * 2) as i64)
                .fetch_all(pool)
                .await
                .map_err(db_err("Failed to load conversation history"))?;

                let mut turns: Vec<ConversationTurn> = rows
                    .into_iter()
                    .map(|row| {
                        let role: String = row.try_get("role").unwrap_or_else(|_| "human".to_string());
                        ConversationTurn {
                            role: TurnRole::from_db(&role),
                            text: row.try_get("text").unwrap_or_default(),
                            timestamp: row.try_get("created_at").unwrap_or_else(|_| Utc::now()),
                        }
                    })
                    .collect();
                turns.reverse();
                Ok(turns)
            }
        }
    }

    /// Append one resolved exchange and trim to the window
    pub async fn append_turn(&self, customer_id: &str, human: &str, ai: &str) -> Result<()> {
        debug!(customer_id = %customer_id, "Appending conversation turn");

        match &self.backend {
            SessionBackend::InMemory { histories, .. } => {
                let mut locked = histories.write().await;
                let history = locked.entry(customer_id.to_string()).or_default();
                if history.updated_at().is_some_and(|at| self.is_expired(at)) {
                    history.clear();
                }
                history.push_pair(human, ai);
                history.trim_to_recent(self.max_turn_pairs);
                Ok(())
            }
            SessionBackend::Postgres { pool, schema_ready } => {
                self.ensure_schema(pool, schema_ready).await?;

                let mut tx = pool
                    .begin()
                    .await
                    .map_err(db_err("Failed to begin session transaction"))?;

                for (role, text) in [(TurnRole::Human, human), (TurnRole::Ai, ai)] {
                    sqlx::query(
                        "INSERT INTO session_turns (customer_id, role, text) VALUES ($1, $2, $3)",
                    )
                    .bind(customer_id)
                    .bind(role.as_str())
                    .bind(text)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err("Failed to insert conversation turn"))?;
                }

                sqlx::query(
                    r#"
                    DELETE FROM session_turns
                    WHERE customer_id = $1
                      AND seq NOT IN (
                        SELECT seq FROM session_turns
                        WHERE customer_id = $1
                        ORDER BY seq DESC
                        LIMIT $2
                      )
                    "#,
                )
                .bind(customer_id)
                .bind((self.max_turn_pairs * 2) as i64)
                .execute(&mut *tx)
                .await
                .map_err(db_err("Failed to trim conversation window"))?;

                tx.commit()
                    .await
                    .map_err(db_err("Failed to commit conversation turn"))?;
                Ok(())
            }
        }
    }

    /// Drop history and the questionnaire flag
    pub async fn clear(&self, customer_id: &str) -> Result<()> {
        info!(customer_id = %customer_id, "Clearing session");

        match &self.backend {
            SessionBackend::InMemory {
                histories,
                investment,
            } => {
                histories.write().await.remove(customer_id);
                investment.write().await.remove(customer_id);
                Ok(())
            }
            SessionBackend::Postgres { pool, schema_ready } => {
                self.ensure_schema(pool, schema_ready).await?;

                sqlx::query("DELETE FROM session_turns WHERE customer_id = $1")
                    .bind(customer_id)
                    .execute(pool)
                    .await
                    .map_err(db_err("Failed to clear conversation history"))?;
                sqlx::query("DELETE FROM investment_sessions WHERE customer_id = $1")
                    .bind(customer_id)
                    .execute(pool)
                    .await
                    .map_err(db_err("Failed to clear investment session"))?;
                Ok(())
            }
        }
    }

    pub async fn is_investment_active(&self, customer_id: &str) -> Result<bool> {
        match &self.backend {
            SessionBackend::InMemory { investment, .. } => Ok(investment
                .read()
                .await
                .get(customer_id)
                .is_some_and(|at| !self.is_expired(*at))),
            SessionBackend::Postgres { pool, schema_ready } => {
                self.ensure_schema(pool, schema_ready).await?;

                let row = sqlx::query(
                    r#"
                    SELECT 1 AS active FROM investment_sessions
                    WHERE customer_id = $1
                      AND activated_at > NOW() - make_interval(secs => $2)
                    "#,
                )
                .bind(customer_id)
                .bind(self.ttl.as_secs_f64())
                .fetch_optional(pool)
                .await
                .map_err(db_err("Failed to read investment session"))?;
                Ok(row.is_some())
            }
        }
    }

    pub async fn mark_investment_active(&self, customer_id: &str) -> Result<()> {
        debug!(customer_id = %customer_id, "Investment questionnaire active");

        match &self.backend {
            SessionBackend::InMemory { investment, .. } => {
                investment
                    .write()
                    .await
                    .insert(customer_id.to_string(), Utc::now());
                Ok(())
            }
            SessionBackend::Postgres { pool, schema_ready } => {
                self.ensure_schema(pool, schema_ready).await?;

                sqlx::query(
                    r#"
                    INSERT INTO investment_sessions (customer_id, activated_at)
                    VALUES ($1, NOW())
                    ON CONFLICT (customer_id) DO UPDATE SET activated_at = NOW()
                    "#,
                )
                .bind(customer_id)
                .execute(pool)
                .await
                .map_err(db_err("Failed to mark investment session"))?;
                Ok(())
            }
        }
    }

    pub async fn mark_investment_complete(&self, customer_id: &str) -> Result<()> {
        debug!(customer_id = %customer_id, "Investment questionnaire complete");

        match &self.backend {
            SessionBackend::InMemory { investment, .. } => {
                investment.write().await.remove(customer_id);
                Ok(())
            }
            SessionBackend::Postgres { pool, schema_ready } => {
                self.ensure_schema(pool, schema_ready).await?;

                sqlx::query("DELETE FROM investment_sessions WHERE customer_id = $1")
                    .bind(customer_id)
                    .execute(pool)
                    .await
                    .map_err(db_err("Failed to complete investment session"))?;
                Ok(())
            }
        }
    }
}
