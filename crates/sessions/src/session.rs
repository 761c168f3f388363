//! One conversational identity.
//!
//! A `Session` exclusively owns its history, pending attachments, and the
//! active turn's cancellation token. Its lock is held only for state
//! mutation, never across I/O: the orchestrator snapshots what it needs
//! before awaiting and appends results afterwards.

use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use vx_domain::message::{Attachment, AttachmentSlot, Message, ToolCall};

use crate::cancel::TurnToken;

/// Template for new sessions.
#[derive(Debug, Clone)]
pub struct SessionPrototype {
    pub system_prompt: String,
    /// Most-recent non-system messages kept in history.
    pub history_cap: usize,
    /// Initial playbook stage, when a playbook is configured.
    pub initial_stage: Option<String>,
}

impl Default for SessionPrototype {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            history_cap: 8,
            initial_stage: None,
        }
    }
}

/// Playbook runtime state carried across turns.
#[derive(Debug, Clone)]
pub struct StageState {
    pub stage_id: String,
    /// Completed turns while in this stage.
    pub turns_in_stage: u32,
}

pub struct Session {
    id: Uuid,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    system_prompt: String,
    history: Vec<Message>,
    history_cap: usize,
    /// Latest-wins camera / screen frames awaiting the next turn.
    pending: [Option<Attachment>; 2],
    active_turn: Option<TurnToken>,
    last_activity: Instant,
    stage: Option<StageState>,
}

impl Session {
    pub fn new(id: Uuid, proto: &SessionPrototype) -> Self {
        Self {
            id,
            inner: Mutex::new(SessionInner {
                system_prompt: proto.system_prompt.clone(),
                history: Vec::new(),
                history_cap: proto.history_cap,
                pending: [None, None],
                active_turn: None,
                last_activity: Instant::now(),
                stage: proto.initial_stage.clone().map(|stage_id| StageState {
                    stage_id,
                    turns_in_stage: 0,
                }),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn system_prompt(&self) -> String {
        self.inner.lock().system_prompt.clone()
    }

    // ── Turn lifecycle ─────────────────────────────────────────────

    /// Start a new turn: cancel any previous token, mint a fresh one, and
    /// consume the pending attachments.
    pub fn begin_turn(&self) -> (TurnToken, Vec<Attachment>) {
        let mut inner = self.inner.lock();
        if let Some(prev) = inner.active_turn.take() {
            prev.cancel();
        }
        let token = TurnToken::new();
        inner.active_turn = Some(token.clone());

        let attachments = inner.pending.iter_mut().filter_map(Option::take).collect();
        inner.last_activity = Instant::now();
        (token, attachments)
    }

    /// Clear the active token, but only if `token` is still the active
    /// turn — a barge-in may already have replaced it.
    pub fn finish_turn(&self, token: &TurnToken) {
        let mut inner = self.inner.lock();
        if inner
            .active_turn
            .as_ref()
            .is_some_and(|active| active.same_turn(token))
        {
            inner.active_turn = None;
        }
    }

    /// Cancel the in-progress turn, if any. Returns whether one existed.
    pub fn cancel_active(&self) -> bool {
        let inner = self.inner.lock();
        match &inner.active_turn {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_active_turn(&self) -> bool {
        self.inner.lock().active_turn.is_some()
    }

    // ── History ────────────────────────────────────────────────────

    pub fn append_user(&self, text: impl Into<String>, attachments: Vec<Attachment>) {
        self.append(Message::user_with_attachments(text, attachments));
    }

    pub fn append_assistant(&self, text: impl Into<String>) {
        self.append(Message::assistant(text));
    }

    pub fn append_assistant_tool_use(&self, text: impl Into<String>, calls: Vec<ToolCall>) {
        self.append(Message::assistant_tool_use(text, calls));
    }

    pub fn append_tool(
        &self,
        tool_name: impl Into<String>,
        call_id: impl Into<String>,
        content: impl Into<String>,
    ) {
        self.append(Message::tool_result(tool_name, call_id, content));
    }

    fn append(&self, msg: Message) {
        let mut inner = self.inner.lock();
        inner.history.push(msg);
        let cap = inner.history_cap;
        while inner.history.len() > cap {
            inner.history.remove(0);
        }
        inner.last_activity = Instant::now();
    }

    /// Snapshot of the capped history (system prompt not included).
    pub fn history(&self) -> Vec<Message> {
        self.inner.lock().history.clone()
    }

    pub fn history_is_empty(&self) -> bool {
        self.inner.lock().history.is_empty()
    }

    /// Drop all history (playbook `reset` policy).
    pub fn clear_history(&self) {
        self.inner.lock().history.clear();
    }

    /// Keep only the `keep` most recent messages (playbook `last_n`).
    pub fn truncate_history(&self, keep: usize) {
        let mut inner = self.inner.lock();
        let len = inner.history.len();
        if len > keep {
            inner.history.drain(..len - keep);
        }
    }

    // ── Attachments ────────────────────────────────────────────────

    /// Replace the slot this frame belongs to (latest wins).
    pub fn set_attachment(&self, attachment: Attachment) {
        let slot = match attachment.source.unwrap_or(AttachmentSlot::Camera) {
            AttachmentSlot::Camera => 0,
            AttachmentSlot::Screen => 1,
        };
        let mut inner = self.inner.lock();
        inner.pending[slot] = Some(attachment);
        inner.last_activity = Instant::now();
    }

    // ── Playbook state ─────────────────────────────────────────────

    pub fn stage(&self) -> Option<StageState> {
        self.inner.lock().stage.clone()
    }

    /// Move to a new stage, resetting its turn counter.
    pub fn set_stage(&self, stage_id: impl Into<String>) {
        self.inner.lock().stage = Some(StageState {
            stage_id: stage_id.into(),
            turns_in_stage: 0,
        });
    }

    /// Count one completed turn in the current stage, returning the total.
    pub fn bump_stage_turns(&self) -> u32 {
        let mut inner = self.inner.lock();
        match inner.stage.as_mut() {
            Some(stage) => {
                stage.turns_in_stage += 1;
                stage.turns_in_stage
            }
            None => 0,
        }
    }

    // ── Liveness ───────────────────────────────────────────────────

    pub fn touch(&self) {
        self.inner.lock().last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.inner.lock().last_activity.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vx_domain::message::Role;

    fn session() -> Session {
        Session::new(Uuid::new_v4(), &SessionPrototype::default())
    }

    #[test]
    fn history_cap_keeps_most_recent() {
        let s = Session::new(
            Uuid::new_v4(),
            &SessionPrototype {
                history_cap: 4,
                ..Default::default()
            },
        );

        for i in 0..6 {
            s.append_user(format!("u{i}"), Vec::new());
        }

        let history = s.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "u2");
        assert_eq!(history[3].content, "u5");
    }

    #[test]
    fn begin_turn_cancels_previous() {
        let s = session();
        let (first, _) = s.begin_turn();
        assert!(!first.is_cancelled());

        let (second, _) = s.begin_turn();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn begin_turn_consumes_attachments() {
        let s = session();
        s.set_attachment(Attachment {
            data: "data:image/png;base64,AAAA".into(),
            mime_type: "image/png".into(),
            alt: None,
            source: Some(AttachmentSlot::Camera),
        });

        let (_, attachments) = s.begin_turn();
        assert_eq!(attachments.len(), 1);

        // Consumed: the next turn sees nothing.
        let (_, attachments) = s.begin_turn();
        assert!(attachments.is_empty());
    }

    #[test]
    fn attachment_slots_are_latest_wins() {
        let s = session();
        for data in ["one", "two"] {
            s.set_attachment(Attachment {
                data: data.into(),
                mime_type: "image/png".into(),
                alt: None,
                source: Some(AttachmentSlot::Screen),
            });
        }
        let (_, attachments) = s.begin_turn();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].data, "two");
    }

    #[test]
    fn finish_turn_only_clears_own_token() {
        let s = session();
        let (first, _) = s.begin_turn();
        let (_second, _) = s.begin_turn();

        // Finishing the stale turn must not clear the active one.
        s.finish_turn(&first);
        assert!(s.has_active_turn());
    }

    #[test]
    fn cancel_active_is_false_when_idle() {
        let s = session();
        assert!(!s.cancel_active());
        let (token, _) = s.begin_turn();
        assert!(s.cancel_active());
        assert!(token.is_cancelled());
    }

    #[test]
    fn stage_turn_counter_resets_on_transition() {
        let s = Session::new(
            Uuid::new_v4(),
            &SessionPrototype {
                initial_stage: Some("greeting".into()),
                ..Default::default()
            },
        );

        assert_eq!(s.bump_stage_turns(), 1);
        assert_eq!(s.bump_stage_turns(), 2);

        s.set_stage("main");
        let stage = s.stage().unwrap();
        assert_eq!(stage.stage_id, "main");
        assert_eq!(stage.turns_in_stage, 0);
        assert_eq!(s.bump_stage_turns(), 1);
    }

    #[test]
    fn truncate_history_keeps_tail() {
        let s = session();
        for i in 0..5 {
            s.append_assistant(format!("a{i}"));
        }
        s.truncate_history(2);
        let history = s.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "a3");
    }

    #[test]
    fn tool_messages_keep_role_chain() {
        let s = session();
        s.append_user("hi", Vec::new());
        s.append_assistant_tool_use("", vec![]);
        s.append_tool("get_weather", "c1", "{}");
        let roles: Vec<Role> = s.history().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool]);
    }
}
