//! The admission circuit breaker.
//!
//! [`CircuitBreaker::should_admit`] is the single oracle every
//! orchestration consults before spending money. The machine has three
//! states (closed, open, half_open); budget exhaustion, failure streaks,
//! and operator commands open it, recovery probes close it again.
//! Providers and agents can additionally be suspended independently, with
//! optional auto-resume.
//!
//! All transitions go through one writer lock and publish an alert record;
//! readers see a point-in-time snapshot.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use orch_domain::config::BreakerConfig;
use orch_domain::event::{EventName, EventSink, OrchEvent};
use orch_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Result of an admission query.
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub admit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Admission {
    fn yes() -> Self {
        Self { admit: true, reason: None }
    }
    fn no(reason: impl Into<String>) -> Self {
        Self { admit: false, reason: Some(reason.into()) }
    }
}

/// Why the budget gate is engaged, mirrored into alerts.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitAlert {
    pub seq: u64,
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time view for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    pub suspended_providers: Vec<String>,
    pub suspended_agents: Vec<String>,
    pub override_active: bool,
    pub budget_exceeded: bool,
}

#[derive(Debug, Clone)]
struct Suspension {
    reason: String,
    resume_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct OverrideState {
    code: String,
    expires_at: DateTime<Utc>,
}

const MAX_ALERTS: usize = 256;

struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    half_open_admitted: u32,
    suspended_providers: HashMap<String, Suspension>,
    suspended_agents: HashMap<String, Suspension>,
    overrides: Vec<OverrideState>,
    /// Set by a budget_exceeded signal; cleared when the budget scope
    /// re-evaluates healthy (next day or raised limit).
    budget_exceeded: bool,
    alerts: Vec<CircuitAlert>,
    alert_seq: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CircuitBreaker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: RwLock<Inner>,
    sink: std::sync::Arc<dyn EventSink>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, sink: std::sync::Arc<dyn EventSink>) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                opened_at: None,
                half_open_admitted: 0,
                suspended_providers: HashMap::new(),
                suspended_agents: HashMap::new(),
                overrides: Vec::new(),
                budget_exceeded: false,
                alerts: Vec::new(),
                alert_seq: 0,
            }),
            sink,
        }
    }

    // ── Admission ────────────────────────────────────────────────────

    /// The single admission oracle. Checks, in order: active override,
    /// per-scope suspensions, then the circuit state.
    pub fn should_admit(&self, provider: &str, agent: &str) -> Admission {
        self.should_admit_at(provider, agent, Utc::now())
    }

    pub fn should_admit_at(&self, provider: &str, agent: &str, now: DateTime<Utc>) -> Admission {
        let mut inner = self.inner.write();
        expire_transients(&mut inner, now);

        // Scope suspensions apply even under an override: an operator
        // forcing the circuit closed does not resurrect a suspended agent.
        if let Some(s) = inner.suspended_providers.get(provider) {
            return Admission::no(format!("provider {provider} suspended: {}", s.reason));
        }
        if let Some(s) = inner.suspended_agents.get(agent) {
            return Admission::no(format!("agent {agent} suspended: {}", s.reason));
        }

        if !inner.overrides.is_empty() {
            return Admission::yes();
        }

        match inner.state {
            CircuitState::Closed => Admission::yes(),
            CircuitState::Open => {
                // Recovery may promote open -> half_open lazily here as
                // well as in the periodic tick.
                let elapsed = inner
                    .opened_at
                    .map(|t| now - t >= Duration::seconds(self.config.recovery_timeout_secs as i64))
                    .unwrap_or(false);
                if elapsed && !inner.budget_exceeded {
                    transition(&mut inner, CircuitState::HalfOpen, "recovery timeout elapsed", &*self.sink);
                    inner.half_open_admitted = 1;
                    Admission::yes()
                } else {
                    Admission::no(if inner.budget_exceeded {
                        "daily budget exceeded".to_string()
                    } else {
                        "circuit open".to_string()
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_admitted < self.config.half_open_max_calls {
                    inner.half_open_admitted += 1;
                    Admission::yes()
                } else {
                    Admission::no("half-open probe budget exhausted")
                }
            }
        }
    }

    // ── Feedback ─────────────────────────────────────────────────────

    /// A successful admitted call: decays the failure counter; a
    /// successful half-open probe closes the circuit.
    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        inner.failure_count = inner.failure_count.saturating_sub(1);
        if inner.state == CircuitState::HalfOpen {
            inner.budget_exceeded = false;
            transition(&mut inner, CircuitState::Closed, "probe succeeded", &*self.sink);
        }
    }

    /// A failure (provider error, cost spike). Reaching the threshold
    /// opens the circuit; any failure in half_open reopens it.
    pub fn record_failure(&self, reason: &str) {
        let now = Utc::now();
        let mut inner = self.inner.write();
        inner.failure_count += 1;
        inner.last_failure_at = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.opened_at = Some(now);
                transition(&mut inner, CircuitState::Open, &format!("probe failed: {reason}"), &*self.sink);
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.opened_at = Some(now);
                transition(
                    &mut inner,
                    CircuitState::Open,
                    &format!("failure threshold reached: {reason}"),
                    &*self.sink,
                );
            }
            _ => {}
        }
    }

    /// Budget exhaustion opens the circuit from any state, half_open
    /// included, and pins it until the budget scope recovers.
    pub fn on_budget_exceeded(&self, scope: &str) {
        let now = Utc::now();
        let mut inner = self.inner.write();
        inner.budget_exceeded = true;
        if inner.state != CircuitState::Open {
            inner.opened_at = Some(now);
            transition(
                &mut inner,
                CircuitState::Open,
                &format!("budget exceeded: {scope}"),
                &*self.sink,
            );
        }
    }

    /// Periodic re-evaluation. `budget_healthy` reflects the current
    /// daily-budget classification.
    pub fn tick(&self, budget_healthy: bool) {
        self.tick_at(budget_healthy, Utc::now());
    }

    pub fn tick_at(&self, budget_healthy: bool, now: DateTime<Utc>) {
        let mut inner = self.inner.write();
        expire_transients(&mut inner, now);

        if budget_healthy {
            inner.budget_exceeded = false;
        }

        if inner.state == CircuitState::Open && !inner.budget_exceeded {
            let elapsed = inner
                .opened_at
                .map(|t| now - t >= Duration::seconds(self.config.recovery_timeout_secs as i64))
                .unwrap_or(false);
            if elapsed {
                transition(&mut inner, CircuitState::HalfOpen, "recovery timeout elapsed", &*self.sink);
                inner.half_open_admitted = 0;
            }
        }
    }

    // ── Suspensions ──────────────────────────────────────────────────

    pub fn suspend_provider(&self, provider: &str, reason: &str, auto_resume: Option<Duration>) {
        let mut inner = self.inner.write();
        inner.suspended_providers.insert(
            provider.to_string(),
            Suspension {
                reason: reason.to_string(),
                resume_at: auto_resume.map(|d| Utc::now() + d),
            },
        );
        push_alert(&mut inner, "provider_suspended", "warning", &format!("{provider}: {reason}"), &*self.sink);
    }

    pub fn resume_provider(&self, provider: &str) -> bool {
        self.inner.write().suspended_providers.remove(provider).is_some()
    }

    pub fn suspend_agent(&self, agent: &str, reason: &str, auto_resume: Option<Duration>) {
        let mut inner = self.inner.write();
        inner.suspended_agents.insert(
            agent.to_string(),
            Suspension {
                reason: reason.to_string(),
                resume_at: auto_resume.map(|d| Utc::now() + d),
            },
        );
        push_alert(&mut inner, "agent_suspended", "warning", &format!("{agent}: {reason}"), &*self.sink);
    }

    pub fn resume_agent(&self, agent: &str) -> bool {
        self.inner.write().suspended_agents.remove(agent).is_some()
    }

    // ── Emergency override ───────────────────────────────────────────

    /// Force the circuit closed for `duration`. The code must be one of
    /// the operator-issued codes from configuration.
    pub fn emergency_override(&self, code: &str, duration: Duration) -> Result<DateTime<Utc>> {
        if !self.config.override_codes.iter().any(|c| c == code) {
            return Err(Error::SecurityValidation("unrecognized override code".into()));
        }
        let expires_at = Utc::now() + duration;
        let mut inner = self.inner.write();
        inner.overrides.push(OverrideState { code: code.to_string(), expires_at });
        push_alert(
            &mut inner,
            "emergency_override",
            "critical",
            &format!("override active until {expires_at}"),
            &*self.sink,
        );
        Ok(expires_at)
    }

    /// Whether an override is currently in force.
    pub fn override_active(&self) -> bool {
        let now = Utc::now();
        self.inner.read().overrides.iter().any(|o| o.expires_at > now)
    }

    // ── Introspection ────────────────────────────────────────────────

    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = Utc::now();
        let inner = self.inner.read();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
            suspended_providers: inner.suspended_providers.keys().cloned().collect(),
            suspended_agents: inner.suspended_agents.keys().cloned().collect(),
            override_active: inner.overrides.iter().any(|o| o.expires_at > now),
            budget_exceeded: inner.budget_exceeded,
        }
    }

    /// Alerts with seq greater than `after`, oldest first.
    pub fn alerts_since(&self, after: u64) -> Vec<CircuitAlert> {
        self.inner
            .read()
            .alerts
            .iter()
            .filter(|a| a.seq > after)
            .cloned()
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn expire_transients(inner: &mut Inner, now: DateTime<Utc>) {
    inner.overrides.retain(|o| o.expires_at > now);
    inner
        .suspended_providers
        .retain(|_, s| s.resume_at.map_or(true, |t| t > now));
    inner
        .suspended_agents
        .retain(|_, s| s.resume_at.map_or(true, |t| t > now));
}

fn transition(inner: &mut Inner, to: CircuitState, reason: &str, sink: &dyn EventSink) {
    let from = inner.state;
    if from == to {
        return;
    }
    inner.state = to;
    if to == CircuitState::Closed {
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.half_open_admitted = 0;
    }
    tracing::info!(?from, ?to, reason, "circuit transition");
    let severity = match to {
        CircuitState::Open => "critical",
        CircuitState::HalfOpen => "warning",
        CircuitState::Closed => "info",
    };
    push_alert(inner, "circuit_transition", severity, &format!("{from:?} -> {to:?}: {reason}"), sink);
}

fn push_alert(inner: &mut Inner, alert_type: &str, severity: &str, message: &str, sink: &dyn EventSink) {
    inner.alert_seq += 1;
    let alert = CircuitAlert {
        seq: inner.alert_seq,
        alert_type: alert_type.to_string(),
        severity: severity.to_string(),
        message: message.to_string(),
        created_at: Utc::now(),
    };
    if inner.alerts.len() >= MAX_ALERTS {
        inner.alerts.remove(0);
    }
    inner.alerts.push(alert.clone());
    sink.emit(OrchEvent::new(EventName::BudgetEvent).payload(serde_json::json!({
        "alert_type": alert.alert_type,
        "severity": alert.severity,
        "message": alert.message,
    })));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
