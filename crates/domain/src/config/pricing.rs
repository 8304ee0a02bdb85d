//! Data-only specs interpreted by other crates: pricing rows, flag seeds,
//! and workflow graph definitions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pricing rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One append-only pricing table row. Amounts are decimal strings so no
/// float ever touches a rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSpec {
    pub provider: String,
    pub model: String,
    pub input_per_1k: String,
    pub output_per_1k: String,
    #[serde(default)]
    pub per_request: Option<String>,
    #[serde(default)]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub effective_to: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flag seeds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A feature flag seed. `strategy` is one of: off, on, percentage,
/// user_whitelist, group_whitelist, gradual, canary, ab_test; the remaining
/// fields apply per strategy and are validated by the flag store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagSpec {
    pub name: String,
    #[serde(default = "d_on")]
    pub enabled: bool,
    pub strategy: String,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub whitelist_users: Vec<String>,
    #[serde(default)]
    pub whitelist_groups: Vec<String>,
    #[serde(default)]
    pub rollout_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rollout_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target_percentage: Option<f64>,
    #[serde(default)]
    pub variants: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub conflicts_with: Vec<String>,
}

fn d_on() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflow graphs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Condition on a prior step's output. The edge fires only when the
/// substring appears (or, negated, when it does not).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeCondition {
    pub step: String,
    pub contains: String,
    #[serde(default)]
    pub negate: bool,
}

/// One node of a workflow graph: an agent with a sub-prompt, run after its
/// dependencies. Steps with disjoint dependencies fan out in parallel and
/// join at shared successors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepSpec {
    pub id: String,
    pub agent: String,
    pub prompt: String,
    /// Ids of steps whose outputs feed this step.
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default)]
    pub when: Option<EdgeCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub steps: Vec<WorkflowStepSpec>,
}

impl WorkflowSpec {
    /// Structural validation: unique step ids, known dependency targets,
    /// no cycles. Runs at config load.
    pub fn check_shape(&self) -> Result<(), String> {
        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(format!("duplicate step id: {}", step.id));
            }
        }
        for step in &self.steps {
            for dep in &step.after {
                if !ids.contains(dep.as_str()) {
                    return Err(format!("step {} depends on unknown step {dep}", step.id));
                }
            }
            if let Some(cond) = &step.when {
                if !ids.contains(cond.step.as_str()) {
                    return Err(format!("step {} conditions on unknown step {}", step.id, cond.step));
                }
            }
        }

        // Kahn's algorithm: all steps must be reachable through the order.
        let mut indegree: std::collections::HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.after.len()))
            .collect();
        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = ready.pop() {
            visited += 1;
            for step in &self.steps {
                if step.after.iter().any(|d| d == id) {
                    let d = indegree.get_mut(step.id.as_str()).expect("known id");
                    *d -= 1;
                    if *d == 0 {
                        ready.push(step.id.as_str());
                    }
                }
            }
        }
        if visited != self.steps.len() {
            return Err("cycle detected".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, after: &[&str]) -> WorkflowStepSpec {
        WorkflowStepSpec {
            id: id.into(),
            agent: "ali_chief_of_staff".into(),
            prompt: "do {input}".into(),
            after: after.iter().map(|s| s.to_string()).collect(),
            when: None,
        }
    }

    #[test]
    fn valid_dag_passes() {
        let wf = WorkflowSpec {
            steps: vec![step("a", &[]), step("b", &["a"]), step("c", &["a"]), step("d", &["b", "c"])],
        };
        assert!(wf.check_shape().is_ok());
    }

    #[test]
    fn cycle_is_rejected() {
        let wf = WorkflowSpec { steps: vec![step("a", &["b"]), step("b", &["a"])] };
        assert_eq!(wf.check_shape().unwrap_err(), "cycle detected");
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let wf = WorkflowSpec { steps: vec![step("a", &[]), step("a", &[])] };
        assert!(wf.check_shape().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let wf = WorkflowSpec { steps: vec![step("a", &["ghost"])] };
        assert!(wf.check_shape().unwrap_err().contains("unknown step"));
    }
}
