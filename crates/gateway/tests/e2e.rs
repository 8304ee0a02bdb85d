//! End-to-end scenarios against the scripted model client and the
//! in-memory backends.

mod support;

use std::time::Duration;

use uuid::Uuid;

use orch_domain::convo::{Conversation, ConversationStatus, CoordinationPattern, TurnStatus};
use orch_domain::Money;
use orch_flags::Strategy;
use orch_gateway::runtime::{OrchestrateOutcome, OrchestrateRequest, Orchestrator, RequestContext};
use orch_gateway::streaming::topic;
use orch_providers::ScriptedTurn;

use support::{drain_frames, fixture, fixture_with, position_of, Fixture};

fn request(message: &str, user: &str) -> OrchestrateRequest {
    OrchestrateRequest {
        message: message.into(),
        user_id: user.into(),
        conversation_id: None,
        context: RequestContext::default(),
    }
}

async fn pre_create(
    fx: &Fixture,
    user: &str,
    pattern: CoordinationPattern,
    participants: &[&str],
) -> Uuid {
    let mut conv = Conversation::new(user, pattern);
    conv.participant_agent_ids = participants.iter().map(|s| s.to_string()).collect();
    fx.state.store.create_conversation(&conv).await.unwrap();
    conv.id
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Single agent happy path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn single_agent_happy_path() {
    let fx = fixture(
        vec![ScriptedTurn::text("It is ten in the morning.").with_usage(12, 8)],
        "10",
    );
    let conv_id = pre_create(&fx, "u1", CoordinationPattern::SingleAgent, &["ali_chief_of_staff"]).await;
    let mut sub = fx.state.hub.subscribe(&topic::conversation(conv_id));

    let mut req = request("What time is it?", "u1");
    req.conversation_id = Some(conv_id);
    let outcome = Orchestrator::orchestrate(&fx.state, req).await;

    let OrchestrateOutcome::Ok(reply) = outcome else {
        panic!("expected Ok, got {outcome:?}");
    };
    assert_eq!(reply.conversation_id, conv_id);
    assert_eq!(reply.turn_count, 1);
    assert_eq!(reply.agents_used, vec!["ali_chief_of_staff"]);
    assert!(reply.response.contains("ten in the morning"));
    assert!(reply.cost_breakdown.total_cost_usd > Money::ZERO);
    assert_eq!(reply.cost_breakdown.total_tokens, 20);

    // Stream carries the canonical event sequence, in order.
    let frames = drain_frames(&mut sub.rx);
    let start = position_of(&frames, "conversation.start").unwrap();
    let invocation = position_of(&frames, "agent.invocation").unwrap();
    let chunk = position_of(&frames, "streaming.chunk").unwrap();
    let cost = position_of(&frames, "cost.tracked").unwrap();
    let fin = position_of(&frames, "final").unwrap();
    assert!(start < invocation && invocation < chunk && chunk < cost && cost < fin);
    assert_eq!(frames[fin]["status"], "completed");

    // The final frame's seq dominates the topic.
    let max_seq = frames.iter().map(|f| f["seq"].as_u64().unwrap()).max().unwrap();
    assert_eq!(frames[fin]["seq"].as_u64().unwrap(), max_seq);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing by keyword
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn finance_keywords_route_to_cfo() {
    let fx = fixture(vec![ScriptedTurn::text("Margins are stable.")], "10");
    let outcome = Orchestrator::orchestrate(
        &fx.state,
        request("Please review the Q4 budget and CAC trend", "u1"),
    )
    .await;

    let OrchestrateOutcome::Ok(reply) = outcome else {
        panic!("expected Ok, got {outcome:?}");
    };
    assert_eq!(reply.agents_used, vec!["amy_cfo"]);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Budget breaker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn budget_exhaustion_opens_circuit() {
    // Daily limit 0.001, 0.0009 already consumed; the next turn costs
    // 0.0015 on gpt-3.5-turbo and trips the breaker.
    let fx = fixture(
        vec![
            ScriptedTurn::text("an expensive answer").with_usage(500, 500),
            ScriptedTurn::text("should never run"),
        ],
        "0.001",
    );
    fx.state
        .store
        .incr_daily_cost(chrono::Utc::now().date_naive(), Money::parse("0.0009").unwrap())
        .await
        .unwrap();

    let first = Orchestrator::orchestrate(&fx.state, request("summarize the news", "u1")).await;
    assert!(matches!(first, OrchestrateOutcome::BudgetExceeded { .. }), "got {first:?}");
    assert_eq!(fx.client.call_count(), 1);

    // Second call is refused at admission; the model is never invoked.
    let second = Orchestrator::orchestrate(&fx.state, request("try again", "u1")).await;
    assert!(matches!(second, OrchestrateOutcome::CircuitOpen { .. }), "got {second:?}");
    assert_eq!(fx.client.call_count(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HITL gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn hitl_gate_pauses_then_approved_resumes() {
    let fx = fixture(vec![ScriptedTurn::text("Transfer executed.")], "10");

    let mut req = request("wire the Q4 bonus pool", "u1");
    req.context.requires_approval = true;
    let outcome = Orchestrator::orchestrate(&fx.state, req).await;

    let OrchestrateOutcome::ApprovalRequired { approval_id, conversation_id } = outcome else {
        panic!("expected ApprovalRequired, got {outcome:?}");
    };
    // No model call happened; the request is persisted pending.
    assert_eq!(fx.client.call_count(), 0);
    let pending = fx.state.approvals.get(approval_id).await.unwrap().unwrap();
    assert_eq!(pending.status, orch_domain::convo::ApprovalStatus::Pending);
    let conv = fx.state.store.get_conversation(conversation_id).await.unwrap().unwrap();
    assert_eq!(conv.status, ConversationStatus::AwaitingApproval);

    // Grant, then resume with the approval id.
    fx.state.approvals.resolve(approval_id, true).await.unwrap();
    let mut resume = request("wire the Q4 bonus pool", "u1");
    resume.conversation_id = Some(conversation_id);
    resume.context.approval_id = Some(approval_id);
    let outcome = Orchestrator::orchestrate(&fx.state, resume).await;

    let OrchestrateOutcome::Ok(reply) = outcome else {
        panic!("expected Ok, got {outcome:?}");
    };
    assert_eq!(reply.turn_count, 1);
    assert_eq!(fx.client.call_count(), 1);
}

#[tokio::test]
async fn hitl_pattern_match_forces_gate() {
    let fx = fixture_with(vec![ScriptedTurn::text("should never run")], "10", |config| {
        config.orchestration.approval_patterns = vec![r"(?i)wire\s+.*funds".into()];
    });

    // No explicit requiresApproval; the message matches a gated pattern.
    let outcome =
        Orchestrator::orchestrate(&fx.state, request("please wire the escrow funds", "u1")).await;
    assert!(matches!(outcome, OrchestrateOutcome::ApprovalRequired { .. }), "got {outcome:?}");
    assert_eq!(fx.client.call_count(), 0);
}

#[tokio::test]
async fn hitl_denied_fails_conversation() {
    let fx = fixture(vec![ScriptedTurn::text("should never run")], "10");

    let mut req = request("delete all records", "u1");
    req.context.requires_approval = true;
    let OrchestrateOutcome::ApprovalRequired { approval_id, conversation_id } =
        Orchestrator::orchestrate(&fx.state, req).await
    else {
        panic!("expected ApprovalRequired");
    };

    fx.state.approvals.resolve(approval_id, false).await.unwrap();
    let mut resume = request("delete all records", "u1");
    resume.conversation_id = Some(conversation_id);
    resume.context.approval_id = Some(approval_id);
    let outcome = Orchestrator::orchestrate(&fx.state, resume).await;

    assert!(matches!(outcome, OrchestrateOutcome::ApprovalDenied { .. }), "got {outcome:?}");
    let conv = fx.state.store.get_conversation(conversation_id).await.unwrap().unwrap();
    assert_eq!(conv.status, ConversationStatus::Failed);
    assert_eq!(conv.turn_count, 0);
    assert_eq!(fx.client.call_count(), 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cancellation_finalizes_turn_and_bills_partials() {
    // 40 chunks at 20 ms each: the turn is mid-stream at t=250 ms.
    let chunks: Vec<String> = (0..40).map(|i| format!("chunk{i} ")).collect();
    let turn = ScriptedTurn {
        chunks,
        chunk_delay: Some(Duration::from_millis(20)),
        ..ScriptedTurn::default()
    };
    let fx = fixture(vec![turn], "10");
    let conv_id = pre_create(&fx, "u1", CoordinationPattern::SingleAgent, &["ali_chief_of_staff"]).await;
    let mut sub = fx.state.hub.subscribe(&topic::conversation(conv_id));

    let state = fx.state.clone();
    let task = tokio::spawn(async move {
        let req = OrchestrateRequest {
            message: "tell me a long story".into(),
            user_id: "u1".into(),
            conversation_id: Some(conv_id),
            context: RequestContext::default(),
        };
        Orchestrator::orchestrate(&state, req).await
    });

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(fx.state.cancel_map.cancel(conv_id));
    let outcome = task.await.unwrap();

    let OrchestrateOutcome::Cancelled(reply) = outcome else {
        panic!("expected Cancelled, got {outcome:?}");
    };
    assert_eq!(reply.turn_count, 1);
    assert!(!reply.response.is_empty(), "partial output is preserved");

    // The in-flight turn persisted as cancelled, tokens billed.
    let turns = fx.state.store.list_turns(conv_id, None, None).await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].status, TurnStatus::Cancelled);
    assert!(turns[0].cost_usd > Money::ZERO);
    let conv_cost = fx.state.store.get_conversation_cost(conv_id).await.unwrap();
    assert_eq!(conv_cost, turns[0].cost_usd);

    // Stream ends error.occurred then final.
    let frames = drain_frames(&mut sub.rx);
    let err = position_of(&frames, "error.occurred").unwrap();
    let fin = position_of(&frames, "final").unwrap();
    assert!(err < fin);
    assert_eq!(frames[fin]["status"], "cancelled");

    // No further turn begins.
    assert_eq!(fx.client.call_count(), 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordination patterns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn round_robin_rotates_until_terminator() {
    let fx = fixture(
        vec![
            ScriptedTurn::text("Budget is tight; flagging for strategy."),
            ScriptedTurn::text("Acknowledged, wrapping up. TERMINATE"),
        ],
        "10",
    );
    let mut req = request("review the budget runway", "u1");
    req.context.coordination_pattern = Some(CoordinationPattern::RoundRobinGroup);
    req.context.participants = Some(vec!["amy_cfo".into(), "ali_chief_of_staff".into()]);
    let outcome = Orchestrator::orchestrate(&fx.state, req).await;

    let OrchestrateOutcome::Ok(reply) = outcome else {
        panic!("expected Ok, got {outcome:?}");
    };
    // Selector puts the CFO first (finance keywords), then rotation.
    assert_eq!(reply.agents_used, vec!["amy_cfo", "ali_chief_of_staff"]);
    assert_eq!(reply.turn_count, 2);
    assert!(reply.response.contains("TERMINATE"));
}

#[tokio::test]
async fn round_robin_with_one_participant_is_single_agent() {
    let fx = fixture(vec![ScriptedTurn::text("Done.")], "10");
    let mut req = request("quick check please", "u1");
    req.context.coordination_pattern = Some(CoordinationPattern::RoundRobinGroup);
    req.context.participants = Some(vec!["ali_chief_of_staff".into()]);
    let outcome = Orchestrator::orchestrate(&fx.state, req).await;

    let OrchestrateOutcome::Ok(reply) = outcome else {
        panic!("expected Ok, got {outcome:?}");
    };
    assert_eq!(reply.turn_count, 1);
    assert_eq!(reply.agents_used, vec!["ali_chief_of_staff"]);
}

#[tokio::test]
async fn swarm_converges_after_quiet_turns() {
    let fx = fixture(
        vec![
            ScriptedTurn::text("DECISION: pursue option beta"),
            ScriptedTurn::text("no objections"),
            ScriptedTurn::text("nothing further"),
        ],
        "10",
    );
    let mut req = request("we need a plan for the launch", "u1");
    req.context.coordination_pattern = Some(CoordinationPattern::Swarm);
    let outcome = Orchestrator::orchestrate(&fx.state, req).await;

    let OrchestrateOutcome::Ok(reply) = outcome else {
        panic!("expected Ok, got {outcome:?}");
    };
    // One decision turn, then two quiet turns reach the convergence
    // window.
    assert_eq!(reply.turn_count, 3);
}

#[tokio::test]
async fn workflow_graph_runs_steps_and_skips_failed_conditions() {
    let fx = fixture_with(
        vec![
            ScriptedTurn::text("research: two findings, no blockers"),
            ScriptedTurn::text("Executive brief: two findings."),
        ],
        "10",
        |config| {
            let raw = r#"
                [workflows.launch_brief]
                steps = [
                    { id = "research", agent = "ali_chief_of_staff", prompt = "Research: {input}" },
                    { id = "brief", agent = "amy_cfo", prompt = "Summarize {research}", after = ["research"] },
                    { id = "escalate", agent = "luca_security_expert", prompt = "Escalate {research}", after = ["research"], when = { step = "research", contains = "CRITICAL" } },
                ]
            "#;
            let parsed: orch_domain::config::Config = toml::from_str(raw).unwrap();
            config.workflows = parsed.workflows;
        },
    );

    let mut req = request("prepare the launch brief", "u1");
    req.context.coordination_pattern = Some(CoordinationPattern::WorkflowGraph);
    req.context.workflow_id = Some("launch_brief".into());
    let outcome = Orchestrator::orchestrate(&fx.state, req).await;

    let OrchestrateOutcome::Ok(reply) = outcome else {
        panic!("expected Ok, got {outcome:?}");
    };
    // The escalation step's condition fails, so only two turns run.
    assert_eq!(reply.turn_count, 2);
    assert!(reply.response.contains("Executive brief"));
    assert_eq!(fx.client.call_count(), 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Invariants & edges
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cost_records_sum_to_conversation_total() {
    let fx = fixture(
        vec![
            ScriptedTurn::text("first").with_usage(100, 60),
            ScriptedTurn::text("second").with_usage(90, 40),
            ScriptedTurn::text("third TERMINATE").with_usage(80, 20),
        ],
        "10",
    );
    let mut req = request("discuss the budget roadmap plan", "u1");
    req.context.coordination_pattern = Some(CoordinationPattern::RoundRobinGroup);
    req.context.participants = Some(vec!["amy_cfo".into(), "ali_chief_of_staff".into()]);
    let OrchestrateOutcome::Ok(reply) = Orchestrator::orchestrate(&fx.state, req).await else {
        panic!("expected Ok");
    };

    let records = fx.state.ledger.records(reply.conversation_id).await.unwrap();
    assert_eq!(records.len(), reply.turn_count as usize);
    let sum: Money = records.iter().map(|r| r.total_cost_usd).sum();
    let conv = fx
        .state
        .store
        .get_conversation(reply.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sum, conv.cumulative_cost_usd);
    assert_eq!(conv.turn_count, reply.turn_count);

    // Turn sequences are dense from 1.
    let turns = fx.state.store.list_turns(reply.conversation_id, None, None).await.unwrap();
    let seqs: Vec<u32> = turns.iter().map(|t| t.seq).collect();
    assert_eq!(seqs, (1..=reply.turn_count).collect::<Vec<u32>>());
}

#[tokio::test]
async fn empty_message_is_invalid() {
    let fx = fixture(vec![], "10");
    let outcome = Orchestrator::orchestrate(&fx.state, request("   ", "u1")).await;
    assert!(matches!(outcome, OrchestrateOutcome::Invalid { .. }));
    assert_eq!(fx.client.call_count(), 0);
}

#[tokio::test]
async fn unknown_conversation_is_invalid() {
    let fx = fixture(vec![], "10");
    let mut req = request("hello", "u1");
    req.conversation_id = Some(Uuid::new_v4());
    let outcome = Orchestrator::orchestrate(&fx.state, req).await;
    assert!(matches!(outcome, OrchestrateOutcome::Invalid { .. }));
}

#[tokio::test]
async fn concurrent_requests_on_one_conversation_get_busy() {
    let chunks: Vec<String> = (0..50).map(|i| format!("c{i} ")).collect();
    let turn = ScriptedTurn {
        chunks,
        chunk_delay: Some(Duration::from_millis(10)),
        ..ScriptedTurn::default()
    };
    let fx = fixture(vec![turn, ScriptedTurn::text("later")], "10");
    let conv_id = pre_create(&fx, "u1", CoordinationPattern::SingleAgent, &["ali_chief_of_staff"]).await;

    let state = fx.state.clone();
    let long_running = tokio::spawn(async move {
        let req = OrchestrateRequest {
            message: "long one".into(),
            user_id: "u1".into(),
            conversation_id: Some(conv_id),
            context: RequestContext::default(),
        };
        Orchestrator::orchestrate(&state, req).await
    });
    tokio::time::sleep(Duration::from_millis(80)).await;

    let mut rival = request("jump the queue", "u1");
    rival.conversation_id = Some(conv_id);
    let outcome = Orchestrator::orchestrate(&fx.state, rival).await;
    assert!(matches!(outcome, OrchestrateOutcome::Busy), "got {outcome:?}");

    fx.state.cancel_map.cancel(conv_id);
    let _ = long_running.await.unwrap();
}

#[tokio::test]
async fn pricing_fallback_event_for_unknown_model() {
    let fx = fixture(vec![], "10");
    let breakdown = fx.state.ledger.price("acme", "quantum-9", 1000, 1000);
    assert!(breakdown.fallback);
    assert_eq!(breakdown.total, Money::parse("0.003").unwrap());
}

#[tokio::test]
async fn flag_rollout_is_stable_per_user() {
    let fx = fixture(vec![], "10");
    fx.state.flags.upsert(orch_flags::FeatureFlag {
        name: "beta_path".into(),
        enabled: true,
        strategy: Strategy::Percentage { percentage: 42.0 },
        updated_at: chrono::Utc::now(),
        depends_on: vec![],
        conflicts_with: vec![],
    });
    let first = fx.state.flags.is_enabled("beta_path", Some("user-7"), None);
    for _ in 0..10 {
        assert_eq!(fx.state.flags.is_enabled("beta_path", Some("user-7"), None), first);
    }
}
