// ABOUTME: Parses Rearrange flow strings such as "A -> B, C -> D" into an ordered execution plan.
// ABOUTME: Steps run in order; the agents named within one step run concurrently.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

const STEP_SEPARATOR: &str = "->";
const AGENT_SEPARATOR: char = ',';

/// Syntax or reference errors in a flow string. Step numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("flow is empty")]
    Empty,

    #[error("flow step {step} is empty")]
    EmptyStep { step: usize },

    #[error("flow step {step} contains an empty agent name")]
    EmptyName { step: usize },

    #[error("agent '{name}' appears more than once in flow step {step}")]
    DuplicateInStep { name: String, step: usize },

    #[error("flow references unknown agent '{0}'")]
    UnknownAgent(String),
}

/// A parsed flow: a non-empty list of non-empty steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPlan {
    steps: Vec<Vec<String>>,
}

impl FlowPlan {
    /// Parse the flow syntax without checking agent names.
    pub fn parse(flow: &str) -> Result<Self, FlowError> {
        if flow.trim().is_empty() {
            return Err(FlowError::Empty);
        }

        let mut steps = Vec::new();
        for (index, raw_step) in flow.split(STEP_SEPARATOR).enumerate() {
            let step = index + 1;
            if raw_step.trim().is_empty() {
                return Err(FlowError::EmptyStep { step });
            }

            let mut names = Vec::new();
            let mut seen = HashSet::new();
            for raw_name in raw_step.split(AGENT_SEPARATOR) {
                let name = raw_name.trim();
                if name.is_empty() {
                    return Err(FlowError::EmptyName { step });
                }
                if !seen.insert(name) {
                    return Err(FlowError::DuplicateInStep {
                        name: name.to_string(),
                        step,
                    });
                }
                names.push(name.to_string());
            }
            steps.push(names);
        }

        Ok(Self { steps })
    }

    /// Parse the flow and require every referenced agent to be in `known`.
    pub fn parse_for<'a>(
        flow: &str,
        known: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, FlowError> {
        let plan = Self::parse(flow)?;
        let known: HashSet<&str> = known.into_iter().collect();
        if let Some(missing) = plan.agent_names().find(|name| !known.contains(name)) {
            return Err(FlowError::UnknownAgent(missing.to_string()));
        }
        Ok(plan)
    }

    pub fn steps(&self) -> &[Vec<String>] {
        &self.steps
    }

    /// Every agent reference in execution order, repeats included.
    pub fn agent_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().flatten().map(String::as_str)
    }
}

impl fmt::Display for FlowPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.steps.iter().map(|step| step.join(", ")).collect();
        f.write_str(&rendered.join(" -> "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chain_with_fan_out() {
        let plan = FlowPlan::parse("A -> B, C -> D").unwrap();
        assert_eq!(
            plan.steps(),
            &[
                vec!["A".to_string()],
                vec!["B".to_string(), "C".to_string()],
                vec!["D".to_string()],
            ]
        );
        assert_eq!(plan.to_string(), "A -> B, C -> D");
    }

    #[test]
    fn single_step_is_valid() {
        let plan = FlowPlan::parse("A, B").unwrap();
        assert_eq!(plan.steps().len(), 1);
        assert_eq!(plan.steps()[0].len(), 2);
    }

    #[test]
    fn whitespace_is_insignificant() {
        let plan = FlowPlan::parse("  Writer->Editor ,Critic  ").unwrap();
        assert_eq!(plan.to_string(), "Writer -> Editor, Critic");
    }

    #[test]
    fn agent_may_reappear_in_a_later_step() {
        let plan = FlowPlan::parse("A -> B -> A").unwrap();
        assert_eq!(plan.agent_names().collect::<Vec<_>>(), vec!["A", "B", "A"]);
    }

    #[test]
    fn malformed_flows_are_rejected() {
        assert_eq!(FlowPlan::parse("   "), Err(FlowError::Empty));
        assert_eq!(FlowPlan::parse("A -> -> B"), Err(FlowError::EmptyStep { step: 2 }));
        assert_eq!(FlowPlan::parse("A ->"), Err(FlowError::EmptyStep { step: 2 }));
        assert_eq!(FlowPlan::parse("A, , B"), Err(FlowError::EmptyName { step: 1 }));
        assert_eq!(
            FlowPlan::parse("A -> B, B"),
            Err(FlowError::DuplicateInStep {
                name: "B".to_string(),
                step: 2
            })
        );
    }

    #[test]
    fn parse_for_checks_names() {
        assert!(FlowPlan::parse_for("A -> B", ["A", "B"]).is_ok());
        assert_eq!(
            FlowPlan::parse_for("A -> Z", ["A", "B"]),
            Err(FlowError::UnknownAgent("Z".to_string()))
        );
    }
}
