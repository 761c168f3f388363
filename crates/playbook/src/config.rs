//! Playbook definition, deserialized from TOML and validated up front.
//!
//! ```toml
//! initial = "greeting"
//!
//! [[stages]]
//! id = "greeting"
//! prompt = "Greet the caller and find out what they need."
//! tools = ["get_weather"]
//! max_turns = 3
//!
//! [[transitions]]
//! from = "greeting"
//! to = "main"
//! priority = 10
//! condition = { keyword = { keywords = ["help", "assist"] } }
//! ```

use std::path::Path;

use serde::Deserialize;

use vx_domain::{Error, Result};

/// Matches any stage in a transition's `from` field.
pub const WILDCARD_STAGE: &str = "*";

#[derive(Debug, Clone, Deserialize)]
pub struct Playbook {
    /// The stage every new session starts in.
    pub initial: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Stage {
    pub id: String,
    /// Appended to the session system prompt while this stage is active.
    pub prompt: String,
    /// Names of registry tools exposed to the LLM in this stage.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Silent tool loop followed by one spoken streaming call.
    #[serde(default = "default_two_phase")]
    pub two_phase: bool,
    /// Turn count that satisfies a `max_turns` transition out of here.
    #[serde(default)]
    pub max_turns: Option<u32>,
    /// What happens to history when this stage is entered.
    #[serde(default)]
    pub history: HistoryPolicy,
}

fn default_two_phase() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    /// Keep the full (capped) history across the transition.
    #[default]
    Full,
    /// Start the stage with empty history.
    Reset,
    /// Keep only the most recent messages.
    LastN { keep: usize },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transition {
    /// Source stage id, or `"*"` for any stage.
    pub from: String,
    pub to: String,
    /// Higher wins; ties resolve by declaration order.
    #[serde(default)]
    pub priority: i32,
    pub condition: TransitionCondition,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCondition {
    /// Case-insensitive substring match against the LLM response.
    Keyword { keywords: Vec<String> },
    /// The model called `playbook_transition` targeting this stage.
    LlmDecision,
    /// A tool result carried `__transition` naming this stage.
    ToolResult,
    /// The stage's `max_turns` was reached this turn.
    MaxTurns,
}

impl TransitionCondition {
    /// Wire value for the `stage-change` reason field.
    pub fn reason(&self) -> &'static str {
        match self {
            TransitionCondition::Keyword { .. } => "keyword",
            TransitionCondition::LlmDecision => "llm_decision",
            TransitionCondition::ToolResult => "tool_result",
            TransitionCondition::MaxTurns => "max_turns",
        }
    }
}

impl Playbook {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let playbook: Playbook =
            toml::from_str(raw).map_err(|e| Error::Playbook(format!("parse: {e}")))?;
        playbook.validate()?;
        Ok(playbook)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Reject unknown stage references and duplicate ids before serving.
    fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::Playbook("no stages defined".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.id.as_str()) {
                return Err(Error::Playbook(format!("duplicate stage id `{}`", stage.id)));
            }
        }

        if self.stage(&self.initial).is_none() {
            return Err(Error::Playbook(format!(
                "initial stage `{}` does not exist",
                self.initial
            )));
        }

        for t in &self.transitions {
            if t.from != WILDCARD_STAGE && self.stage(&t.from).is_none() {
                return Err(Error::Playbook(format!(
                    "transition from unknown stage `{}`",
                    t.from
                )));
            }
            if self.stage(&t.to).is_none() {
                return Err(Error::Playbook(format!(
                    "transition to unknown stage `{}`",
                    t.to
                )));
            }
        }

        Ok(())
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn initial_stage(&self) -> &Stage {
        // Validation guarantees presence.
        self.stage(&self.initial).expect("validated initial stage")
    }

    /// Candidate transitions out of a stage: own plus wildcard, ordered by
    /// priority descending with declaration order breaking ties.
    pub fn transitions_from(&self, stage_id: &str) -> Vec<&Transition> {
        let mut candidates: Vec<(usize, &Transition)> = self
            .transitions
            .iter()
            .enumerate()
            .filter(|(_, t)| t.from == stage_id || t.from == WILDCARD_STAGE)
            .collect();
        candidates.sort_by(|(ia, a), (ib, b)| b.priority.cmp(&a.priority).then(ia.cmp(ib)));
        candidates.into_iter().map(|(_, t)| t).collect()
    }

    /// Whether the stage needs the reserved `playbook_transition` tool
    /// injected (it has an outgoing `llm_decision` transition).
    pub fn needs_transition_tool(&self, stage_id: &str) -> bool {
        self.transitions_from(stage_id)
            .iter()
            .any(|t| matches!(t.condition, TransitionCondition::LlmDecision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        initial = "greeting"

        [[stages]]
        id = "greeting"
        prompt = "Greet the caller."
        max_turns = 3

        [[stages]]
        id = "main"
        prompt = "Help with the request."
        tools = ["get_weather"]
        two_phase = false
        history = "reset"

        [[transitions]]
        from = "greeting"
        to = "main"
        priority = 10
        condition = { keyword = { keywords = ["help", "assist"] } }

        [[transitions]]
        from = "*"
        to = "greeting"
        condition = "llm_decision"
    "#;

    #[test]
    fn parses_and_validates() {
        let pb = Playbook::from_toml_str(SAMPLE).unwrap();
        assert_eq!(pb.initial_stage().id, "greeting");
        assert_eq!(pb.stages.len(), 2);
        assert!(pb.stage("greeting").unwrap().two_phase);
        assert!(!pb.stage("main").unwrap().two_phase);
        assert_eq!(pb.stage("main").unwrap().history, HistoryPolicy::Reset);
    }

    #[test]
    fn wildcard_transitions_apply_everywhere() {
        let pb = Playbook::from_toml_str(SAMPLE).unwrap();
        let from_main = pb.transitions_from("main");
        assert_eq!(from_main.len(), 1);
        assert_eq!(from_main[0].to, "greeting");
    }

    #[test]
    fn priority_orders_candidates() {
        let pb = Playbook::from_toml_str(SAMPLE).unwrap();
        let from_greeting = pb.transitions_from("greeting");
        assert_eq!(from_greeting.len(), 2);
        // priority 10 beats the default 0.
        assert_eq!(from_greeting[0].to, "main");
    }

    #[test]
    fn needs_transition_tool_only_for_llm_decision() {
        let pb = Playbook::from_toml_str(SAMPLE).unwrap();
        assert!(pb.needs_transition_tool("greeting"));
        assert!(pb.needs_transition_tool("main"));
    }

    #[test]
    fn unknown_initial_rejected() {
        let raw = r#"
            initial = "ghost"
            [[stages]]
            id = "a"
            prompt = "p"
        "#;
        assert!(Playbook::from_toml_str(raw).is_err());
    }

    #[test]
    fn unknown_transition_target_rejected() {
        let raw = r#"
            initial = "a"
            [[stages]]
            id = "a"
            prompt = "p"
            [[transitions]]
            from = "a"
            to = "ghost"
            condition = "llm_decision"
        "#;
        assert!(Playbook::from_toml_str(raw).is_err());
    }

    #[test]
    fn duplicate_stage_ids_rejected() {
        let raw = r#"
            initial = "a"
            [[stages]]
            id = "a"
            prompt = "p"
            [[stages]]
            id = "a"
            prompt = "q"
        "#;
        assert!(Playbook::from_toml_str(raw).is_err());
    }

    #[test]
    fn last_n_history_policy_parses() {
        let raw = r#"
            initial = "a"
            [[stages]]
            id = "a"
            prompt = "p"
            history = { last_n = { keep = 4 } }
        "#;
        let pb = Playbook::from_toml_str(raw).unwrap();
        assert_eq!(pb.stage("a").unwrap().history, HistoryPolicy::LastN { keep: 4 });
    }
}
