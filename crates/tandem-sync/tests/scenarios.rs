//! End-to-end scenarios: a `Session` driven against an in-memory API and a
//! push channel made of plain mpsc queues.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::{Instant, timeout};
use uuid::Uuid;

use tandem_sync::{
    ApiError, ChatApi, Conversation, Draft, FailurePolicy, Session, SessionHandle, SessionNotice, Snapshot,
    SyncConfig, SyncError, UploadFile,
};
use tandem_types::api::{MessageResponse, PinResponse, SendMessageRequest};
use tandem_types::{Attachment, ChatEvent, ClientCommand, MessageStatus, Reaction};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tandem_sync=trace")
        .with_test_writer()
        .try_init();
}

fn message(conversation_id: Uuid, sender_id: Uuid, content: &str, created_at: DateTime<Utc>) -> MessageResponse {
    MessageResponse {
        id: Uuid::new_v4(),
        conversation_id,
        sender_id,
        content: content.into(),
        attachments: vec![],
        created_at,
        status: Some(MessageStatus::Sent),
        read_by: vec![],
        reactions: vec![],
        starred_by: vec![],
        pinned_by: vec![],
        deleted_by: vec![],
        deleted_for_everyone: false,
        reply_to: None,
        is_edited: false,
        forwarded_from: None,
        local_id: None,
    }
}

// -- Fake server --

struct FakeApi {
    me: Uuid,
    send_gate: Semaphore,
    history_gate: Semaphore,
    fail_sends: AtomicBool,
    history: Vec<MessageResponse>,
    /// Server ids to hand out, keyed by message content.
    assigned_ids: Mutex<HashMap<String, Uuid>>,
    sent: Mutex<Vec<SendMessageRequest>>,
    reactions: Mutex<Vec<(Uuid, String)>>,
    deletes: Mutex<Vec<(Uuid, bool)>>,
}

impl FakeApi {
    fn new(me: Uuid) -> Self {
        Self {
            me,
            send_gate: Semaphore::new(Semaphore::MAX_PERMITS),
            history_gate: Semaphore::new(Semaphore::MAX_PERMITS),
            fail_sends: AtomicBool::new(false),
            history: vec![],
            assigned_ids: Mutex::new(HashMap::new()),
            sent: Mutex::new(vec![]),
            reactions: Mutex::new(vec![]),
            deletes: Mutex::new(vec![]),
        }
    }

    /// Sends block until `release_sends` hands out permits.
    fn gate_sends(mut self) -> Self {
        self.send_gate = Semaphore::new(0);
        self
    }

    fn gate_history(mut self) -> Self {
        self.history_gate = Semaphore::new(0);
        self
    }

    fn with_history(mut self, history: Vec<MessageResponse>) -> Self {
        self.history = history;
        self
    }

    fn release_sends(&self, n: usize) {
        self.send_gate.add_permits(n);
    }

    fn release_history(&self) {
        self.history_gate.add_permits(1);
    }

    fn assign_id(&self, content: &str, id: Uuid) {
        self.assigned_ids.lock().unwrap().insert(content.to_string(), id);
    }

    fn sent(&self) -> Vec<SendMessageRequest> {
        self.sent.lock().unwrap().clone()
    }
}

impl ChatApi for FakeApi {
    async fn send(&self, conversation_id: Uuid, req: SendMessageRequest) -> Result<MessageResponse, ApiError> {
        self.sent.lock().unwrap().push(req.clone());
        self.send_gate
            .acquire()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?
            .forget();
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection refused".into()));
        }
        let id = self
            .assigned_ids
            .lock()
            .unwrap()
            .remove(&req.content)
            .unwrap_or_else(Uuid::new_v4);
        let mut resp = message(conversation_id, self.me, &req.content, Utc::now());
        resp.id = id;
        resp.attachments = req.attachments;
        resp.local_id = Some(req.local_id);
        Ok(resp)
    }

    async fn edit(&self, _message_id: Uuid, _content: String) -> Result<(), ApiError> {
        Ok(())
    }

    async fn react(&self, message_id: Uuid, emoji: String) -> Result<(), ApiError> {
        self.reactions.lock().unwrap().push((message_id, emoji));
        Ok(())
    }

    async fn pin(&self, _message_id: Uuid) -> Result<PinResponse, ApiError> {
        Ok(PinResponse { is_pinned: true })
    }

    async fn star(&self, _message_id: Uuid) -> Result<(), ApiError> {
        Ok(())
    }

    async fn delete(&self, message_id: Uuid, delete_for_everyone: bool) -> Result<(), ApiError> {
        self.deletes.lock().unwrap().push((message_id, delete_for_everyone));
        Ok(())
    }

    async fn list_messages(&self, _conversation_id: Uuid, limit: u32) -> Result<Vec<MessageResponse>, ApiError> {
        self.history_gate
            .acquire()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?
            .forget();
        Ok(self.history.iter().take(limit as usize).cloned().collect())
    }

    async fn upload(&self, files: Vec<UploadFile>) -> Result<Vec<Attachment>, ApiError> {
        Ok(files
            .into_iter()
            .map(|f| Attachment {
                url: format!("https://files.test/{}", f.name),
                file_type: f.mime,
                file_size: f.bytes.len() as u64,
                duration: None,
            })
            .collect())
    }
}

// -- Harness --

struct Harness {
    api: Arc<FakeApi>,
    handle: SessionHandle,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
    events: mpsc::UnboundedSender<ChatEvent>,
    push: mpsc::UnboundedReceiver<ClientCommand>,
}

impl Harness {
    fn open(conversation_id: Uuid, api: FakeApi, config: SyncConfig) -> Self {
        init_tracing();
        let me = api.me;
        let api = Arc::new(api);
        let (push_tx, push) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (handle, notices) = Session::spawn(conversation_id, me, config, Arc::clone(&api), push_tx, events_rx);
        Self {
            api,
            handle,
            notices,
            events,
            push,
        }
    }

    fn emit(&self, event: ChatEvent) {
        self.events.send(event).unwrap();
    }

    async fn wait_until(&self, pred: impl FnMut(&Snapshot) -> bool) -> Snapshot {
        let mut rx = self.handle.subscribe();
        let snapshot = timeout(WAIT, rx.wait_for(pred))
            .await
            .expect("timed out waiting for snapshot")
            .expect("session ended");
        Snapshot::clone(&snapshot)
    }

    async fn next_notice(&mut self) -> SessionNotice {
        timeout(WAIT, self.notices.recv())
            .await
            .expect("timed out waiting for notice")
            .expect("session ended")
    }

    async fn next_push(&mut self) -> ClientCommand {
        timeout(WAIT, self.push.recv())
            .await
            .expect("timed out waiting for push command")
            .expect("push channel closed")
    }
}

fn setup() -> (Uuid, Uuid) {
    (Uuid::new_v4(), Uuid::new_v4())
}

// -- Scenarios --

#[tokio::test]
async fn send_is_optimistic_then_confirmed() {
    let (conv, me) = setup();
    let mut h = Harness::open(conv, FakeApi::new(me).gate_sends(), SyncConfig::default());
    h.wait_until(|s| s.messages.is_empty()).await;

    let local_id = h.handle.send(Draft::text("hello")).await.unwrap();
    let snap = h.handle.snapshot();
    assert_eq!(snap.messages.len(), 1);
    assert_eq!(snap.messages[0].status, MessageStatus::Sending);
    assert_eq!(snap.messages[0].key.local_id(), Some(local_id));

    let server_id = Uuid::new_v4();
    h.api.assign_id("hello", server_id);
    h.api.release_sends(1);

    let snap = h.wait_until(|s| s.pending_sends == 0).await;
    assert_eq!(snap.messages.len(), 1);
    assert_eq!(snap.messages[0].server_id(), Some(server_id));
    assert_eq!(snap.messages[0].status, MessageStatus::Sent);
    assert_eq!(
        h.next_notice().await,
        SessionNotice::SendConfirmed {
            local_id,
            message_id: server_id
        }
    );
    assert_eq!(h.api.sent()[0].local_id, local_id);
}

#[tokio::test]
async fn push_echo_before_http_response_leaves_one_message() {
    let (conv, me) = setup();
    let h = Harness::open(conv, FakeApi::new(me).gate_sends(), SyncConfig::default());

    // One send is echoed with its local id, the other without.
    let first = h.handle.send(Draft::text("first")).await.unwrap();
    let second = h.handle.send(Draft::text("second")).await.unwrap();
    let (first_id, second_id) = (Uuid::new_v4(), Uuid::new_v4());
    h.api.assign_id("first", first_id);
    h.api.assign_id("second", second_id);

    let mut echo = message(conv, me, "first", Utc::now());
    echo.id = first_id;
    echo.local_id = Some(first);
    h.emit(ChatEvent::NewMessage { message: echo });

    let mut bare = message(conv, me, "second", Utc::now());
    bare.id = second_id;
    h.emit(ChatEvent::NewMessage { message: bare });

    let snap = h
        .wait_until(|s| s.messages.iter().any(|m| m.server_id() == Some(first_id)))
        .await;
    assert_eq!(snap.messages.len(), 2);

    h.api.release_sends(2);
    let snap = h.wait_until(|s| s.pending_sends == 0).await;
    let ids: Vec<_> = snap.messages.iter().filter_map(|m| m.server_id()).collect();
    assert_eq!(snap.messages.len(), 2);
    assert!(ids.contains(&first_id));
    assert!(ids.contains(&second_id));
    assert!(snap.messages.iter().all(|m| m.key.local_id() != Some(second)));
}

#[tokio::test]
async fn concurrent_sends_resolve_independently() {
    let (conv, me) = setup();
    let h = Harness::open(conv, FakeApi::new(me).gate_sends(), SyncConfig::default());

    let mut local_ids = vec![];
    for body in ["one", "two", "three"] {
        local_ids.push(h.handle.send(Draft::text(body)).await.unwrap());
    }
    assert_eq!(h.handle.snapshot().pending_sends, 3);
    local_ids.dedup();
    assert_eq!(local_ids.len(), 3);

    h.api.release_sends(3);
    let snap = h.wait_until(|s| s.pending_sends == 0 && s.messages.len() == 3).await;
    assert!(snap.messages.iter().all(|m| m.status == MessageStatus::Sent));
}

#[tokio::test]
async fn failed_send_is_removed_and_reported() {
    let (conv, me) = setup();
    let api = FakeApi::new(me);
    api.fail_sends.store(true, Ordering::SeqCst);
    let mut h = Harness::open(conv, api, SyncConfig::default());

    let local_id = h.handle.send(Draft::text("doomed")).await.unwrap();
    match h.next_notice().await {
        SessionNotice::SendFailed {
            local_id: failed,
            retained,
            ..
        } => {
            assert_eq!(failed, local_id);
            assert!(!retained);
        }
        other => panic!("unexpected notice {:?}", other),
    }
    let snap = h.wait_until(|s| s.pending_sends == 0).await;
    assert!(snap.messages.is_empty());
}

#[tokio::test]
async fn kept_failure_is_retried_on_request() {
    let (conv, me) = setup();
    let api = FakeApi::new(me);
    api.fail_sends.store(true, Ordering::SeqCst);
    let config = SyncConfig {
        failure_policy: FailurePolicy::MarkFailed,
        ..Default::default()
    };
    let mut h = Harness::open(conv, api, config);

    let local_id = h.handle.send(Draft::text("try again")).await.unwrap();
    assert!(matches!(
        h.next_notice().await,
        SessionNotice::SendFailed { retained: true, .. }
    ));
    let snap = h
        .wait_until(|s| s.messages.first().is_some_and(|m| m.status == MessageStatus::Failed))
        .await;
    assert_eq!(snap.messages.len(), 1);

    h.api.fail_sends.store(false, Ordering::SeqCst);
    h.handle.retry(local_id).await.unwrap();
    assert!(matches!(h.next_notice().await, SessionNotice::SendConfirmed { .. }));

    let snap = h.wait_until(|s| s.pending_sends == 0).await;
    assert_eq!(snap.messages.len(), 1);
    assert_eq!(snap.messages[0].status, MessageStatus::Sent);
    assert_eq!(h.api.sent().len(), 2);

    // Nothing left to retry.
    assert!(matches!(h.handle.retry(local_id).await, Err(SyncError::InvalidState(_))));
}

#[tokio::test]
async fn attachments_are_uploaded_before_send() {
    let (conv, me) = setup();
    let h = Harness::open(conv, FakeApi::new(me), SyncConfig::default());

    let draft = Draft {
        content: String::new(),
        files: vec![UploadFile {
            name: "cat.png".into(),
            mime: "image/png".into(),
            bytes: Bytes::from_static(b"\x89PNG"),
        }],
        reply_to: None,
    };
    h.handle.send(draft).await.unwrap();
    let snap = h.wait_until(|s| s.pending_sends == 0 && !s.messages.is_empty()).await;

    let sent = h.api.sent();
    let req = &sent[0];
    assert_eq!(req.content, " ");
    assert_eq!(req.attachments.len(), 1);
    assert_eq!(req.attachments[0].url, "https://files.test/cat.png");
    assert_eq!(snap.messages[0].attachments[0].file_size, 4);
}

#[tokio::test]
async fn reaction_toggle_converges_to_zero() {
    let (conv, me) = setup();
    let peer = Uuid::new_v4();
    let m1 = message(conv, peer, "react here", Utc::now());
    let id = m1.id;
    let h = Harness::open(conv, FakeApi::new(me).with_history(vec![m1]), SyncConfig::default());
    h.wait_until(|s| s.messages.len() == 1).await;

    h.handle.react(id, "👍").await.unwrap();
    h.emit(ChatEvent::MessageReactionUpdated {
        conversation_id: conv,
        message_id: id,
        actor_id: me,
        reactions: vec![Reaction {
            user_id: me,
            emoji: "👍".into(),
        }],
    });
    h.wait_until(|s| s.messages[0].reaction_count("👍") == 1).await;

    h.handle.react(id, "👍").await.unwrap();
    h.emit(ChatEvent::MessageReactionUpdated {
        conversation_id: conv,
        message_id: id,
        actor_id: me,
        reactions: vec![],
    });
    let snap = h.wait_until(|s| s.messages[0].reaction_count("👍") == 0).await;
    assert!(snap.messages[0].reactions.is_empty());
    assert_eq!(h.api.reactions.lock().unwrap().len(), 2);
}

#[test]
fn delete_for_me_then_for_everyone() {
    let conv = Uuid::new_v4();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let m1 = message(conv, b, "m1", Utc::now());
    let id = m1.id;

    let mut engine = Conversation::new(conv, a, SyncConfig::default());
    engine.merge_history(vec![m1]);
    assert_eq!(engine.visible_for(a).count(), 1);
    assert_eq!(engine.visible_for(b).count(), 1);

    engine.apply_event(
        ChatEvent::MessageDeleted {
            conversation_id: conv,
            message_id: id,
            user_id: a,
            deleted_at: Utc::now(),
        },
        Instant::now(),
    );
    assert_eq!(engine.visible_for(a).count(), 0);
    assert_eq!(engine.visible_for(b).count(), 1);
    assert_eq!(engine.store().len(), 1);

    engine.apply_event(
        ChatEvent::MessageDeletedForEveryone {
            conversation_id: conv,
            message_id: id,
        },
        Instant::now(),
    );
    assert_eq!(engine.visible_for(a).count(), 0);
    assert_eq!(engine.visible_for(b).count(), 0);
    assert!(engine.store().get_confirmed(id).is_none());
}

#[tokio::test]
async fn delete_is_mirrored_once_the_server_accepts_it() {
    let (conv, me) = setup();
    let m1 = message(conv, Uuid::new_v4(), "bye", Utc::now());
    let id = m1.id;
    let h = Harness::open(conv, FakeApi::new(me).with_history(vec![m1.clone()]), SyncConfig::default());
    h.wait_until(|s| s.messages.len() == 1).await;

    h.handle.delete(id, true).await.unwrap();
    assert!(h.handle.snapshot().messages.is_empty());
    assert_eq!(*h.api.deletes.lock().unwrap(), vec![(id, true)]);

    // A late duplicate of the message does not bring it back.
    h.emit(ChatEvent::NewMessage { message: m1 });
    h.emit(ChatEvent::UserTyping {
        conversation_id: conv,
        user_id: Uuid::new_v4(),
        is_typing: true,
    });
    let snap = h.wait_until(|s| !s.typing.is_empty()).await;
    assert!(snap.messages.is_empty());
}

#[tokio::test(start_paused = true)]
async fn typing_expires_without_stop_event() {
    let (conv, me) = setup();
    let peer = Uuid::new_v4();
    let h = Harness::open(conv, FakeApi::new(me), SyncConfig::default());

    h.emit(ChatEvent::UserTyping {
        conversation_id: conv,
        user_id: peer,
        is_typing: true,
    });
    h.wait_until(|s| s.typing == vec![peer]).await;
    let started = Instant::now();

    h.wait_until(|s| s.typing.is_empty()).await;
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn history_merges_with_events_received_first() {
    let (conv, me) = setup();
    let peer = Uuid::new_v4();
    let now = Utc::now();
    let old = message(conv, peer, "from history", now - chrono::Duration::minutes(5));
    let old_id = old.id;
    let h = Harness::open(
        conv,
        FakeApi::new(me).with_history(vec![old]).gate_history(),
        SyncConfig::default(),
    );

    let live = message(conv, peer, "live", now);
    let live_id = live.id;
    h.emit(ChatEvent::NewMessage { message: live });
    h.wait_until(|s| s.messages.len() == 1).await;

    h.api.release_history();
    let snap = h.wait_until(|s| s.messages.len() == 2).await;
    let ids: Vec<_> = snap.messages.iter().filter_map(|m| m.server_id()).collect();
    assert_eq!(ids, vec![old_id, live_id]);
}

#[tokio::test]
async fn events_for_other_conversations_are_ignored() {
    let (conv, me) = setup();
    let peer = Uuid::new_v4();
    let h = Harness::open(conv, FakeApi::new(me), SyncConfig::default());

    h.emit(ChatEvent::NewMessage {
        message: message(Uuid::new_v4(), peer, "elsewhere", Utc::now()),
    });
    h.emit(ChatEvent::NewMessage {
        message: message(conv, peer, "here", Utc::now()),
    });
    let snap = h.wait_until(|s| !s.messages.is_empty()).await;
    assert_eq!(snap.messages.len(), 1);
    assert_eq!(snap.messages[0].content, "here");
}

#[tokio::test]
async fn mutations_on_unknown_messages_are_rejected() {
    let (conv, me) = setup();
    let h = Harness::open(conv, FakeApi::new(me), SyncConfig::default());
    let ghost = Uuid::new_v4();

    assert!(matches!(h.handle.edit(ghost, "x").await, Err(SyncError::UnknownMessage(id)) if id == ghost));
    assert!(matches!(h.handle.pin(ghost).await, Err(SyncError::UnknownMessage(_))));
    assert!(matches!(h.handle.delete(ghost, false).await, Err(SyncError::UnknownMessage(_))));
    assert!(h.api.deletes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn pin_cursor_stays_in_range_when_unpinned_remotely() {
    let (conv, me) = setup();
    let peer = Uuid::new_v4();
    let now = Utc::now();
    let mut older = message(conv, peer, "older", now - chrono::Duration::minutes(1));
    let mut newer = message(conv, peer, "newer", now);
    older.pinned_by = vec![peer];
    newer.pinned_by = vec![peer];
    let older_id = older.id;
    let h = Harness::open(conv, FakeApi::new(me).with_history(vec![older, newer]), SyncConfig::default());

    let snap = h.wait_until(|s| s.pinned.len() == 2).await;
    assert_eq!(snap.pinned[1], older_id);

    h.handle.next_pin().unwrap();
    let snap = h.wait_until(|s| s.pinned_cursor == 1).await;
    assert_eq!(snap.current_pin(), Some(older_id));

    h.emit(ChatEvent::MessagePinUpdated {
        conversation_id: conv,
        message_id: older_id,
        pinned_by: vec![],
    });
    let snap = h.wait_until(|s| s.pinned.len() == 1).await;
    assert!(snap.pinned_cursor < snap.pinned.len());
}

#[tokio::test]
async fn pin_cursor_jumps_to_a_chosen_pin() {
    let (conv, me) = setup();
    let peer = Uuid::new_v4();
    let now = Utc::now();
    let mut older = message(conv, peer, "older", now - chrono::Duration::minutes(1));
    let mut newer = message(conv, peer, "newer", now);
    older.pinned_by = vec![peer];
    newer.pinned_by = vec![peer];
    let older_id = older.id;
    let h = Harness::open(conv, FakeApi::new(me).with_history(vec![older, newer]), SyncConfig::default());
    h.wait_until(|s| s.pinned.len() == 2).await;

    h.handle.select_pin(older_id).await.unwrap();
    let snap = h.handle.snapshot();
    assert_eq!(snap.current_pin(), Some(older_id));

    let ghost = Uuid::new_v4();
    assert!(matches!(h.handle.select_pin(ghost).await, Err(SyncError::UnknownMessage(id)) if id == ghost));
}

#[tokio::test]
async fn join_presence_and_leave_go_through_push_channel() {
    let (conv, me) = setup();
    let mut h = Harness::open(conv, FakeApi::new(me), SyncConfig::default());

    assert_eq!(h.next_push().await, ClientCommand::JoinChat { conversation_id: conv });
    assert_eq!(h.next_push().await, ClientCommand::PresenceRequest { conversation_id: conv });

    h.emit(ChatEvent::PresenceRequest {
        conversation_id: conv,
        from_user_id: Uuid::new_v4(),
    });
    assert_eq!(
        h.next_push().await,
        ClientCommand::PresenceAnnounce {
            conversation_id: conv,
            online: true
        }
    );

    h.handle.typing(true).unwrap();
    assert_eq!(
        h.next_push().await,
        ClientCommand::Typing {
            conversation_id: conv,
            is_typing: true
        }
    );

    assert!(h.handle.close().await.unwrap().is_empty());
    assert_eq!(
        h.next_push().await,
        ClientCommand::Typing {
            conversation_id: conv,
            is_typing: false
        }
    );
    assert_eq!(h.next_push().await, ClientCommand::LeaveChat { conversation_id: conv });
    assert!(h.handle.snapshot().closed);
    assert!(matches!(h.handle.send(Draft::text("late")).await, Err(SyncError::SessionClosed)));
}

#[tokio::test]
async fn close_abandons_sends_still_in_flight() {
    let (conv, me) = setup();
    let mut h = Harness::open(conv, FakeApi::new(me).gate_sends(), SyncConfig::default());

    let local_id = h.handle.send(Draft::text("never confirmed")).await.unwrap();
    assert_eq!(h.handle.close().await.unwrap(), vec![local_id]);

    // The request still completes on the server side; nobody is notified.
    h.api.release_sends(1);
    assert!(timeout(Duration::from_millis(200), h.notices.recv()).await.ok().flatten().is_none());
    assert_eq!(h.handle.snapshot().pending_sends, 0);
}
