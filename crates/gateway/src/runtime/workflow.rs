//! Workflow-graph execution.
//!
//! A workflow is a DAG of steps, each binding one agent with a
//! sub-prompt. Steps run in topological waves: a wave's steps are
//! mutually independent (fan-out) and their outputs join at shared
//! successors. Turn persistence stays strictly sequential within the
//! conversation, so waves execute turn-by-turn in listed order.
//!
//! Prompt templates substitute `{input}` (the orchestrate message) and
//! `{<step_id>}` (a prior step's output). A step whose `when` condition
//! fails is skipped; its output reads as empty downstream.

use std::collections::{HashMap, HashSet};

use orch_domain::config::{WorkflowSpec, WorkflowStepSpec};
use orch_domain::event::{EventName, EventSink, OrchEvent};
use orch_domain::{Error, Result};

use crate::state::AppState;

use super::cancel::CancelToken;
use super::orchestrator::ConversationRun;
use super::turn::{run_turn, TurnParams};

/// Outcome of a full workflow pass.
pub struct WorkflowRun {
    /// Output text per executed step.
    pub outputs: HashMap<String, String>,
    pub steps_run: Vec<String>,
    pub steps_skipped: Vec<String>,
    /// Joined outputs of the terminal steps.
    pub final_output: String,
    pub cancelled: bool,
}

fn substitute(template: &str, input: &str, outputs: &HashMap<String, String>) -> String {
    let mut text = template.replace("{input}", input);
    for (step_id, output) in outputs {
        text = text.replace(&format!("{{{step_id}}}"), output);
    }
    text
}

fn condition_holds(step: &WorkflowStepSpec, outputs: &HashMap<String, String>) -> bool {
    match &step.when {
        None => true,
        Some(cond) => {
            let hit = outputs
                .get(&cond.step)
                .is_some_and(|out| out.contains(&cond.contains));
            hit != cond.negate
        }
    }
}

/// Steps nobody depends on; their outputs form the workflow result.
fn terminal_steps(spec: &WorkflowSpec) -> Vec<&str> {
    let mut depended: HashSet<&str> = HashSet::new();
    for step in &spec.steps {
        for dep in &step.after {
            depended.insert(dep.as_str());
        }
    }
    spec.steps
        .iter()
        .filter(|s| !depended.contains(s.id.as_str()))
        .map(|s| s.id.as_str())
        .collect()
}

pub async fn run_workflow(
    state: &AppState,
    cancel: &CancelToken,
    run: &mut ConversationRun,
    workflow_id: &str,
    spec: &WorkflowSpec,
    input: &str,
) -> Result<WorkflowRun> {
    state.obs.emit(
        OrchEvent::new(EventName::WorkflowStart)
            .conversation(run.conversation_id)
            .user(&run.user_id)
            .payload(serde_json::json!({
                "workflowID": workflow_id,
                "steps": spec.steps.len(),
            })),
    );

    let mut outputs: HashMap<String, String> = HashMap::new();
    let mut done: HashSet<String> = HashSet::new();
    let mut steps_run = Vec::new();
    let mut steps_skipped = Vec::new();
    let mut cancelled = false;

    'waves: while done.len() < spec.steps.len() {
        // Ready: unfinished steps whose dependencies all resolved.
        let wave: Vec<&WorkflowStepSpec> = spec
            .steps
            .iter()
            .filter(|s| !done.contains(&s.id) && s.after.iter().all(|d| done.contains(d)))
            .collect();
        if wave.is_empty() {
            // check_shape rejects cycles at load; reaching this means the
            // spec changed underneath us.
            return Err(Error::Internal(format!("workflow {workflow_id}: no runnable steps")));
        }

        for step in wave {
            if cancel.is_cancelled() {
                cancelled = true;
                break 'waves;
            }

            if !condition_holds(step, &outputs) {
                done.insert(step.id.clone());
                steps_skipped.push(step.id.clone());
                state.obs.emit(
                    OrchEvent::new(EventName::WorkflowStep)
                        .conversation(run.conversation_id)
                        .agent(&step.agent)
                        .payload(serde_json::json!({
                            "workflowID": workflow_id,
                            "step": step.id,
                            "skipped": true,
                        })),
                );
                continue;
            }

            let agent = state.agents.get(&step.agent).ok_or_else(|| {
                Error::InvalidInput(format!("workflow {workflow_id}: unknown agent {}", step.agent))
            })?;

            let message = substitute(&step.prompt, input, &outputs);
            run.seq += 1;
            let outcome = run_turn(
                state,
                cancel,
                TurnParams {
                    conversation_id: run.conversation_id,
                    user_id: run.user_id.clone(),
                    seq: run.seq,
                    agent: agent.clone(),
                    message,
                    history: run.history.clone(),
                    rationale: None,
                    plan: run.plan.clone(),
                },
            )
            .await?;

            state.obs.emit(
                OrchEvent::new(EventName::WorkflowStep)
                    .conversation(run.conversation_id)
                    .agent(&step.agent)
                    .payload(serde_json::json!({
                        "workflowID": workflow_id,
                        "step": step.id,
                        "skipped": false,
                    })),
            );

            run.absorb(&step.agent, &outcome);
            outputs.insert(step.id.clone(), outcome.turn.output_text.clone());
            done.insert(step.id.clone());
            steps_run.push(step.id.clone());

            if outcome.cancelled {
                cancelled = true;
                break 'waves;
            }
            if run.budget_tripped {
                break 'waves;
            }
        }
    }

    let final_output = terminal_steps(spec)
        .iter()
        .filter_map(|id| outputs.get(*id))
        .filter(|o| !o.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n\n");

    state.obs.emit(
        OrchEvent::new(EventName::WorkflowEnd)
            .conversation(run.conversation_id)
            .user(&run.user_id)
            .payload(serde_json::json!({
                "workflowID": workflow_id,
                "stepsRun": steps_run.len(),
                "stepsSkipped": steps_skipped.len(),
                "cancelled": cancelled,
            })),
    );

    Ok(WorkflowRun {
        outputs,
        steps_run,
        steps_skipped,
        final_output,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_domain::config::EdgeCondition;

    fn step(id: &str, after: &[&str]) -> WorkflowStepSpec {
        WorkflowStepSpec {
            id: id.into(),
            agent: "ali_chief_of_staff".into(),
            prompt: "{input}".into(),
            after: after.iter().map(|s| s.to_string()).collect(),
            when: None,
        }
    }

    #[test]
    fn substitution_replaces_input_and_steps() {
        let mut outputs = HashMap::new();
        outputs.insert("research".to_string(), "three findings".to_string());
        let text = substitute("Summarize {research} for: {input}", "the board", &outputs);
        assert_eq!(text, "Summarize three findings for: the board");
    }

    #[test]
    fn condition_checks_contains_and_negate() {
        let mut outputs = HashMap::new();
        outputs.insert("gate".to_string(), "APPROVED by reviewer".to_string());

        let mut s = step("x", &["gate"]);
        s.when = Some(EdgeCondition {
            step: "gate".into(),
            contains: "APPROVED".into(),
            negate: false,
        });
        assert!(condition_holds(&s, &outputs));

        s.when = Some(EdgeCondition {
            step: "gate".into(),
            contains: "APPROVED".into(),
            negate: true,
        });
        assert!(!condition_holds(&s, &outputs));

        // Missing output counts as no match.
        s.when = Some(EdgeCondition {
            step: "ghost".into(),
            contains: "x".into(),
            negate: false,
        });
        assert!(!condition_holds(&s, &outputs));
    }

    #[test]
    fn terminal_steps_are_leaves() {
        let spec = WorkflowSpec {
            steps: vec![step("a", &[]), step("b", &["a"]), step("c", &["a"]), step("d", &["b"])],
        };
        let mut terminals = terminal_steps(&spec);
        terminals.sort();
        assert_eq!(terminals, vec!["c", "d"]);
    }
}
