//! End-to-end orchestrator tests over scripted providers: the legal
//! event schedule, cancellation semantics, TTS fallback, and history
//! bookkeeping.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{collect_events, kind, kinds, StateBuilder};

use vx_domain::event::TurnEvent;
use vx_domain::message::Role;
use vx_domain::ErrorCode;
use vx_gateway::runtime::run_turn;
use vx_providers::testing::{ScriptedLlm, ScriptedReply, ScriptedStt, ScriptedTts};

#[tokio::test]
async fn happy_path_event_schedule() {
    let state = StateBuilder::new(
        ScriptedStt::new("What's the weather in Tokyo?"),
        ScriptedLlm::new([ScriptedReply::chunks(["It's ", "cloudy."])]),
    )
    .build();
    let session = state.sessions.create(None, &state.session_prototype());

    let (_, rx) = run_turn(state.clone(), session.clone(), vec![0; 4]);
    let events = collect_events(rx).await;

    assert_eq!(
        kinds(&events),
        vec![
            "transcript",
            "llm-chunk",
            "llm-chunk",
            "llm-done",
            "llm",
            "tts-start",
            "tts-chunk",
            "tts-chunk",
            "tts-complete",
        ]
    );

    match &events[0] {
        TurnEvent::Transcript { text, is_final } => {
            assert_eq!(text, "What's the weather in Tokyo?");
            assert!(*is_final);
        }
        other => panic!("expected transcript, got {other:?}"),
    }
    match &events[4] {
        TurnEvent::LlmFull { text } => assert_eq!(text, "It's cloudy."),
        other => panic!("expected llm full, got {other:?}"),
    }

    // History: user + assistant.
    let history = session.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "It's cloudy.");
}

#[tokio::test]
async fn stt_failure_is_fatal_to_turn() {
    let state = StateBuilder::new(
        ScriptedStt::failing(),
        ScriptedLlm::new([ScriptedReply::text("never used")]),
    )
    .build();
    let session = state.sessions.create(None, &state.session_prototype());

    let (_, rx) = run_turn(state.clone(), session.clone(), vec![0; 4]);
    let events = collect_events(rx).await;

    assert_eq!(kinds(&events), vec!["error"]);
    match &events[0] {
        TurnEvent::Error { code, .. } => assert_eq!(*code, ErrorCode::SttError),
        other => panic!("expected error, got {other:?}"),
    }
    assert!(session.history_is_empty());
}

#[tokio::test]
async fn empty_reply_ends_after_llm_done() {
    let state = StateBuilder::new(
        ScriptedStt::new("hello"),
        ScriptedLlm::new([ScriptedReply::default()]),
    )
    .build();
    let session = state.sessions.create(None, &state.session_prototype());

    let (_, rx) = run_turn(state.clone(), session.clone(), vec![0; 4]);
    let events = collect_events(rx).await;

    // No TTS events, no full-text event, no assistant message.
    assert_eq!(kinds(&events), vec!["transcript", "llm-done"]);
    assert_eq!(session.history().len(), 1);
}

#[tokio::test]
async fn barge_in_mid_stream_cancels_without_assistant_history() {
    let state = StateBuilder::new(
        ScriptedStt::new("hello"),
        ScriptedLlm::hanging([ScriptedReply::chunks(["Hel"])]),
    )
    .build();
    let session = state.sessions.create(None, &state.session_prototype());

    let (_, mut rx) = run_turn(state.clone(), session.clone(), vec![0; 4]);

    // Wait for the stream to be mid-flight.
    assert_eq!(kind(&rx.recv().await.unwrap()), "transcript");
    assert_eq!(kind(&rx.recv().await.unwrap()), "llm-chunk");

    // Barge-in: the next turn's speech-start cancels this token.
    assert!(session.cancel_active());

    // Terminal within bounded time even though the provider hangs.
    let terminal = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("cancellation must terminate the turn")
        .unwrap();
    assert_eq!(kind(&terminal), "tts-cancelled");

    // Nothing after the terminal event.
    let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("channel should close");
    assert!(closed.is_none());

    // The partial reply is not recorded.
    let history = session.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
}

#[tokio::test]
async fn cancel_during_playback_keeps_assistant_history() {
    let state = StateBuilder::new(
        ScriptedStt::new("hello"),
        ScriptedLlm::new([ScriptedReply::text("Hello there.")]),
    )
    .tts(ScriptedTts::new().with_chunk_delay(Duration::from_secs(30)))
    .build();
    let session = state.sessions.create(None, &state.session_prototype());

    let (_, mut rx) = run_turn(state.clone(), session.clone(), vec![0; 4]);

    // Drain until playback starts.
    loop {
        let ev = rx.recv().await.unwrap();
        if kind(&ev) == "tts-start" {
            break;
        }
    }

    session.cancel_active();
    let terminal = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("cancellation must terminate the turn")
        .unwrap();
    assert_eq!(kind(&terminal), "tts-cancelled");

    // The LLM had fully completed, so the assistant message stays.
    let history = session.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "Hello there.");
}

#[tokio::test]
async fn tts_stream_failure_falls_back_to_oneshot() {
    let builder = StateBuilder::new(
        ScriptedStt::new("tell me things"),
        ScriptedLlm::new([ScriptedReply::text("First one. Second two. Third three.")]),
    )
    .tts(ScriptedTts::new().fail_stream_containing("Second"));
    let tts = builder.tts.clone();
    let state = builder.build();
    let session = state.sessions.create(None, &state.session_prototype());

    let (_, rx) = run_turn(state.clone(), session, vec![0; 4]);
    let events = collect_events(rx).await;

    // The fallback is silent: no error event, turn completes.
    assert!(!kinds(&events).contains(&"error"));
    assert_eq!(*kinds(&events).last().unwrap(), "tts-complete");

    // Sentences 1 and 3 stream in two chunks; sentence 2 is one block.
    let chunk_count = events.iter().filter(|e| kind(e) == "tts-chunk").count();
    assert_eq!(chunk_count, 5);

    assert_eq!(tts.stream_calls.load(Ordering::SeqCst), 3);
    assert_eq!(tts.oneshot_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn tts_double_failure_skips_sentence_and_continues() {
    let state = StateBuilder::new(
        ScriptedStt::new("tell me things"),
        ScriptedLlm::new([ScriptedReply::text("First one. Second two. Third three.")]),
    )
    .tts(ScriptedTts::new().fail_stream_containing("Second").fail_oneshot())
    .build();
    let session = state.sessions.create(None, &state.session_prototype());

    let (_, rx) = run_turn(state.clone(), session, vec![0; 4]);
    let events = collect_events(rx).await;

    let tags = kinds(&events);
    assert_eq!(tags.iter().filter(|t| **t == "error").count(), 1);
    assert_eq!(*tags.last().unwrap(), "tts-complete");

    // Only sentences 1 and 3 produced audio.
    assert_eq!(tags.iter().filter(|t| **t == "tts-chunk").count(), 4);

    let error = events.iter().find(|e| kind(e) == "error").unwrap();
    match error {
        TurnEvent::Error { code, .. } => assert_eq!(*code, ErrorCode::TtsError),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn history_cap_holds_across_turns() {
    let state = StateBuilder::new(
        ScriptedStt::new("another question"),
        ScriptedLlm::new([
            ScriptedReply::text("Answer one."),
            ScriptedReply::text("Answer two."),
            ScriptedReply::text("Answer three."),
        ]),
    )
    .config(|c| c.session.history_cap = 4)
    .build();
    let session = state.sessions.create(None, &state.session_prototype());

    for _ in 0..3 {
        let (_, rx) = run_turn(state.clone(), session.clone(), vec![0; 4]);
        collect_events(rx).await;
    }

    let history = session.history();
    assert_eq!(history.len(), 4);
    // Oldest turn evicted; most recent answer retained.
    assert_eq!(history[3].content, "Answer three.");
    assert_eq!(history[0].role, Role::User);
}
