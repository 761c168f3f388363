//! Transition evaluation.
//!
//! Runs after the LLM response is finalized, before the turn ends.
//! Candidates are the current stage's transitions plus wildcards, already
//! ordered by priority then declaration; the first satisfied one wins.

use serde_json::{json, Value};

use vx_domain::message::ToolDefinition;

use crate::config::{Playbook, Transition, TransitionCondition};

/// Reserved pseudo-tool letting the model request a stage change.
pub const TRANSITION_TOOL: &str = "playbook_transition";

/// Tool result field a handler can set to force a transition.
pub const TRANSITION_RESULT_FIELD: &str = "__transition";

/// Definition injected into stages with outgoing `llm_decision`
/// transitions.
pub fn transition_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: TRANSITION_TOOL.into(),
        description: "Move the conversation to a different stage when the \
                      current stage's goal is complete."
            .into(),
        parameters: json!({
            "type": "object",
            "properties": {
                "target": {
                    "type": "string",
                    "description": "Id of the stage to move to."
                },
                "reason": {
                    "type": "string",
                    "description": "Why the transition should happen."
                }
            },
            "required": ["target"]
        }),
    }
}

/// A `playbook_transition` call recorded during the turn.
#[derive(Debug, Clone)]
pub struct RequestedTransition {
    pub target: String,
    pub reason: Option<String>,
}

/// Everything transition conditions look at, collected over one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnRecord {
    /// The finalized LLM response text.
    pub response_text: String,
    /// Recorded `playbook_transition` call, if any.
    pub requested_transition: Option<RequestedTransition>,
    /// Raw results of every tool executed this turn.
    pub tool_results: Vec<Value>,
    /// Turns completed in the current stage, this one included.
    pub turns_in_stage: u32,
}

#[derive(Debug)]
pub struct TransitionMatch<'a> {
    pub transition: &'a Transition,
    pub reason: &'static str,
}

/// Pick the transition to apply, if any.
pub fn evaluate_transitions<'a>(
    playbook: &'a Playbook,
    current_stage: &str,
    record: &TurnRecord,
) -> Option<TransitionMatch<'a>> {
    for transition in playbook.transitions_from(current_stage) {
        if satisfied(playbook, current_stage, transition, record) {
            return Some(TransitionMatch {
                transition,
                reason: transition.condition.reason(),
            });
        }
    }
    None
}

fn satisfied(
    playbook: &Playbook,
    current_stage: &str,
    transition: &Transition,
    record: &TurnRecord,
) -> bool {
    match &transition.condition {
        TransitionCondition::Keyword { keywords } => {
            let response = record.response_text.to_lowercase();
            keywords
                .iter()
                .any(|kw| response.contains(&kw.to_lowercase()))
        }
        TransitionCondition::LlmDecision => record
            .requested_transition
            .as_ref()
            .is_some_and(|req| req.target == transition.to),
        TransitionCondition::ToolResult => record.tool_results.iter().any(|result| {
            result
                .get(TRANSITION_RESULT_FIELD)
                .and_then(|v| v.as_str())
                .is_some_and(|target| target == transition.to)
        }),
        TransitionCondition::MaxTurns => playbook
            .stage(current_stage)
            .and_then(|s| s.max_turns)
            .is_some_and(|n| record.turns_in_stage >= n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playbook(transitions: &str) -> Playbook {
        let raw = format!(
            r#"
            initial = "greeting"
            [[stages]]
            id = "greeting"
            prompt = "g"
            max_turns = 3
            [[stages]]
            id = "main"
            prompt = "m"
            [[stages]]
            id = "wrapup"
            prompt = "w"
            {transitions}
            "#
        );
        Playbook::from_toml_str(&raw).unwrap()
    }

    #[test]
    fn keyword_matches_case_insensitively() {
        let pb = playbook(
            r#"
            [[transitions]]
            from = "greeting"
            to = "main"
            condition = { keyword = { keywords = ["HELP"] } }
            "#,
        );
        let record = TurnRecord {
            response_text: "I can help with that.".into(),
            ..Default::default()
        };
        let m = evaluate_transitions(&pb, "greeting", &record).unwrap();
        assert_eq!(m.transition.to, "main");
        assert_eq!(m.reason, "keyword");
    }

    #[test]
    fn highest_priority_satisfied_wins() {
        let pb = playbook(
            r#"
            [[transitions]]
            from = "greeting"
            to = "main"
            priority = 1
            condition = { keyword = { keywords = ["go"] } }
            [[transitions]]
            from = "greeting"
            to = "wrapup"
            priority = 5
            condition = { keyword = { keywords = ["go"] } }
            "#,
        );
        let record = TurnRecord {
            response_text: "go".into(),
            ..Default::default()
        };
        assert_eq!(
            evaluate_transitions(&pb, "greeting", &record).unwrap().transition.to,
            "wrapup"
        );
    }

    #[test]
    fn ties_resolve_by_declaration_order() {
        let pb = playbook(
            r#"
            [[transitions]]
            from = "greeting"
            to = "main"
            condition = { keyword = { keywords = ["go"] } }
            [[transitions]]
            from = "greeting"
            to = "wrapup"
            condition = { keyword = { keywords = ["go"] } }
            "#,
        );
        let record = TurnRecord {
            response_text: "go".into(),
            ..Default::default()
        };
        assert_eq!(
            evaluate_transitions(&pb, "greeting", &record).unwrap().transition.to,
            "main"
        );
    }

    #[test]
    fn unsatisfied_high_priority_is_skipped() {
        let pb = playbook(
            r#"
            [[transitions]]
            from = "greeting"
            to = "wrapup"
            priority = 100
            condition = { keyword = { keywords = ["never said"] } }
            [[transitions]]
            from = "greeting"
            to = "main"
            condition = { keyword = { keywords = ["go"] } }
            "#,
        );
        let record = TurnRecord {
            response_text: "go".into(),
            ..Default::default()
        };
        assert_eq!(
            evaluate_transitions(&pb, "greeting", &record).unwrap().transition.to,
            "main"
        );
    }

    #[test]
    fn llm_decision_requires_matching_target() {
        let pb = playbook(
            r#"
            [[transitions]]
            from = "greeting"
            to = "main"
            condition = "llm_decision"
            "#,
        );

        let mut record = TurnRecord {
            requested_transition: Some(RequestedTransition {
                target: "wrapup".into(),
                reason: None,
            }),
            ..Default::default()
        };
        assert!(evaluate_transitions(&pb, "greeting", &record).is_none());

        record.requested_transition = Some(RequestedTransition {
            target: "main".into(),
            reason: None,
        });
        let m = evaluate_transitions(&pb, "greeting", &record).unwrap();
        assert_eq!(m.reason, "llm_decision");
    }

    #[test]
    fn tool_result_transition_field() {
        let pb = playbook(
            r#"
            [[transitions]]
            from = "*"
            to = "wrapup"
            condition = "tool_result"
            "#,
        );
        let record = TurnRecord {
            tool_results: vec![json!({"ok": true, "__transition": "wrapup"})],
            ..Default::default()
        };
        let m = evaluate_transitions(&pb, "main", &record).unwrap();
        assert_eq!(m.transition.to, "wrapup");
        assert_eq!(m.reason, "tool_result");
    }

    #[test]
    fn max_turns_fires_at_threshold() {
        let pb = playbook(
            r#"
            [[transitions]]
            from = "greeting"
            to = "main"
            condition = "max_turns"
            "#,
        );

        let mut record = TurnRecord {
            turns_in_stage: 2,
            ..Default::default()
        };
        assert!(evaluate_transitions(&pb, "greeting", &record).is_none());

        record.turns_in_stage = 3;
        assert!(evaluate_transitions(&pb, "greeting", &record).is_some());
    }

    #[test]
    fn no_candidates_no_transition() {
        let pb = playbook("");
        let record = TurnRecord {
            response_text: "anything".into(),
            ..Default::default()
        };
        assert!(evaluate_transitions(&pb, "greeting", &record).is_none());
    }
}
