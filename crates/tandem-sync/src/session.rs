//! Async driver for one open conversation.
//!
//! A single task owns the `Conversation` and multiplexes user commands, push
//! events, network completions and the typing-expiry timer, so every store
//! mutation happens on one logical event loop. Network requests run on
//! spawned tasks and report back through the completion channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_types::api::MessageResponse;
use tandem_types::{ChatEvent, ClientCommand, LocalId};

use crate::api::{ChatApi, Draft, PushSink};
use crate::config::SyncConfig;
use crate::conversation::{Conversation, SendOutcome, Snapshot};
use crate::error::{ApiError, SyncError};
use crate::pipeline::SendPipeline;

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

/// Asynchronous outcomes the user should be told about.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    SendConfirmed { local_id: LocalId, message_id: Uuid },
    SendFailed { local_id: LocalId, error: ApiError, retained: bool },
    HistoryFailed { error: ApiError },
}

enum SessionCommand {
    Send { draft: Draft, reply: Reply<LocalId> },
    Retry { local_id: LocalId, reply: Reply<()> },
    Edit { message_id: Uuid, content: String, reply: Reply<()> },
    React { message_id: Uuid, emoji: String, reply: Reply<()> },
    Pin { message_id: Uuid, reply: Reply<bool> },
    Star { message_id: Uuid, reply: Reply<()> },
    Delete { message_id: Uuid, for_everyone: bool, reply: Reply<()> },
    Typing { composing: bool },
    NextPin,
    PreviousPin,
    SelectPin { message_id: Uuid, reply: Reply<()> },
    Close { reply: oneshot::Sender<Vec<LocalId>> },
}

enum Completion {
    History(Result<Vec<MessageResponse>, ApiError>),
    Sent {
        local_id: LocalId,
        result: Result<MessageResponse, ApiError>,
    },
    Deleted {
        message_id: Uuid,
        for_everyone: bool,
        result: Result<(), ApiError>,
        reply: Reply<()>,
    },
}

/// Cheap to clone; every clone drives the same session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<Snapshot>,
}

impl SessionHandle {
    /// Queue a message. Resolves once the optimistic copy is in the store,
    /// not when the server confirms it; watch the notices for that.
    pub async fn send(&self, draft: Draft) -> Result<LocalId, SyncError> {
        self.request(|reply| SessionCommand::Send { draft, reply }).await
    }

    pub async fn retry(&self, local_id: LocalId) -> Result<(), SyncError> {
        self.request(|reply| SessionCommand::Retry { local_id, reply }).await
    }

    pub async fn edit(&self, message_id: Uuid, content: impl Into<String>) -> Result<(), SyncError> {
        let content = content.into();
        self.request(|reply| SessionCommand::Edit {
            message_id,
            content,
            reply,
        })
        .await
    }

    pub async fn react(&self, message_id: Uuid, emoji: impl Into<String>) -> Result<(), SyncError> {
        let emoji = emoji.into();
        self.request(|reply| SessionCommand::React {
            message_id,
            emoji,
            reply,
        })
        .await
    }

    /// Toggle the pin. Returns whether the message is pinned afterwards.
    pub async fn pin(&self, message_id: Uuid) -> Result<bool, SyncError> {
        self.request(|reply| SessionCommand::Pin { message_id, reply }).await
    }

    pub async fn star(&self, message_id: Uuid) -> Result<(), SyncError> {
        self.request(|reply| SessionCommand::Star { message_id, reply }).await
    }

    pub async fn delete(&self, message_id: Uuid, for_everyone: bool) -> Result<(), SyncError> {
        self.request(|reply| SessionCommand::Delete {
            message_id,
            for_everyone,
            reply,
        })
        .await
    }

    /// Report local composing state; typing signals are throttled inside.
    pub fn typing(&self, composing: bool) -> Result<(), SyncError> {
        self.fire(SessionCommand::Typing { composing })
    }

    pub fn next_pin(&self) -> Result<(), SyncError> {
        self.fire(SessionCommand::NextPin)
    }

    pub fn previous_pin(&self) -> Result<(), SyncError> {
        self.fire(SessionCommand::PreviousPin)
    }

    /// Move the pin cursor to `message_id`, which must be pinned.
    pub async fn select_pin(&self, message_id: Uuid) -> Result<(), SyncError> {
        self.request(|reply| SessionCommand::SelectPin { message_id, reply }).await
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Leave the conversation. Returns the sends that were still pending.
    pub async fn close(&self) -> Result<Vec<LocalId>, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.fire(SessionCommand::Close { reply: tx })?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }

    fn fire(&self, cmd: SessionCommand) -> Result<(), SyncError> {
        self.commands.send(cmd).map_err(|_| SyncError::SessionClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> SessionCommand) -> Result<T, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.fire(make(tx))?;
        rx.await.map_err(|_| SyncError::SessionClosed)?
    }
}

pub struct Session<A, P> {
    conversation: Conversation,
    api: Arc<A>,
    pipeline: SendPipeline<A>,
    push: P,
    events: mpsc::UnboundedReceiver<ChatEvent>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    snapshots: watch::Sender<Snapshot>,
    notices: mpsc::UnboundedSender<SessionNotice>,
}

impl<A: ChatApi, P: PushSink> Session<A, P> {
    /// Open `conversation_id` and drive it on a new task. Must be called
    /// from within a tokio runtime.
    pub fn spawn(
        conversation_id: Uuid,
        self_id: Uuid,
        config: SyncConfig,
        api: Arc<A>,
        push: P,
        events: mpsc::UnboundedReceiver<ChatEvent>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionNotice>) {
        let conversation = Conversation::new(conversation_id, self_id, config);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let (snapshots, snapshots_rx) = watch::channel(conversation.snapshot(Instant::now()));

        let session = Session {
            conversation,
            pipeline: SendPipeline::new(Arc::clone(&api)),
            api,
            push,
            events,
            commands,
            completions_tx,
            completions,
            snapshots,
            notices,
        };
        tokio::spawn(session.run());

        (
            SessionHandle {
                commands: commands_tx,
                snapshots: snapshots_rx,
            },
            notices_rx,
        )
    }

    async fn run(mut self) {
        let conversation_id = self.conversation.conversation_id();
        info!("Joining conversation {}", conversation_id);

        // Subscribe and fetch independently; whichever lands first, history
        // is merged on top of what events already applied.
        self.push_command(ClientCommand::JoinChat { conversation_id });
        self.push_command(ClientCommand::PresenceRequest { conversation_id });
        self.spawn_history_fetch();

        let mut events_open = true;
        let mut close_reply = None;

        loop {
            let expiry = self.conversation.next_typing_expiry(Instant::now());

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::Close { reply }) => {
                        close_reply = Some(reply);
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("Push channel closed for conversation {}", conversation_id);
                        events_open = false;
                    }
                },
                Some(done) = self.completions.recv() => self.handle_completion(done),
                _ = sleep_until_opt(expiry) => {
                    if self.conversation.prune_typing(Instant::now()) {
                        self.publish();
                    }
                }
            }
        }

        let abandoned = self.shutdown();
        if let Some(reply) = close_reply {
            let _ = reply.send(abandoned);
        }
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Send { draft, reply } => {
                if let Some(stop) = self.conversation.end_typing() {
                    self.push_command(stop);
                }
                let result = self.conversation.begin_send(draft.clone());
                if let Ok(local_id) = result {
                    self.spawn_send(local_id, draft);
                    self.publish();
                }
                let _ = reply.send(result);
            }
            SessionCommand::Retry { local_id, reply } => {
                let result = self.conversation.retry_send(local_id).map(|draft| {
                    self.spawn_send(local_id, draft);
                });
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            SessionCommand::Edit {
                message_id,
                content,
                reply,
            } => {
                // No optimistic edit: the `message-edited` broadcast applies it.
                self.spawn_request(message_id, reply, move |api| async move {
                    api.edit(message_id, content).await
                });
            }
            SessionCommand::React {
                message_id,
                emoji,
                reply,
            } => {
                self.spawn_request(message_id, reply, move |api| async move {
                    api.react(message_id, emoji).await
                });
            }
            SessionCommand::Pin { message_id, reply } => {
                self.spawn_request(message_id, reply, move |api| async move {
                    api.pin(message_id).await.map(|resp| resp.is_pinned)
                });
            }
            SessionCommand::Star { message_id, reply } => {
                self.spawn_request(message_id, reply, move |api| async move {
                    api.star(message_id).await
                });
            }
            SessionCommand::Delete {
                message_id,
                for_everyone,
                reply,
            } => {
                if let Err(e) = self.conversation.ensure_known(message_id) {
                    let _ = reply.send(Err(e));
                    return;
                }
                let api = Arc::clone(&self.api);
                let completions = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = api.delete(message_id, for_everyone).await;
                    let _ = completions.send(Completion::Deleted {
                        message_id,
                        for_everyone,
                        result,
                        reply,
                    });
                });
            }
            SessionCommand::Typing { composing } => {
                let cmd = if composing {
                    self.conversation.typing_input(Instant::now())
                } else {
                    self.conversation.end_typing()
                };
                if let Some(cmd) = cmd {
                    self.push_command(cmd);
                }
            }
            SessionCommand::NextPin => {
                self.conversation.next_pin();
                self.publish();
            }
            SessionCommand::PreviousPin => {
                self.conversation.previous_pin();
                self.publish();
            }
            SessionCommand::SelectPin { message_id, reply } => {
                let result = if self.conversation.select_pin(message_id) {
                    self.publish();
                    Ok(())
                } else {
                    Err(SyncError::UnknownMessage(message_id))
                };
                let _ = reply.send(result);
            }
            // Handled by the run loop.
            SessionCommand::Close { .. } => {}
        }
    }

    fn handle_event(&mut self, event: ChatEvent) {
        let applied = self.conversation.apply_event(event, Instant::now());
        if applied.announce_presence {
            let announce = self.conversation.presence_announce();
            self.push_command(announce);
        }
        if applied.changed {
            self.publish();
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::History(Ok(history)) => {
                self.conversation.merge_history(history);
                self.publish();
            }
            Completion::History(Err(error)) => {
                warn!(
                    "History fetch for {} failed: {}",
                    self.conversation.conversation_id(),
                    error
                );
                self.notify(SessionNotice::HistoryFailed { error });
            }
            Completion::Sent { local_id, result } => {
                match self.conversation.complete_send(local_id, result) {
                    SendOutcome::Confirmed { message_id } => {
                        self.notify(SessionNotice::SendConfirmed { local_id, message_id });
                    }
                    SendOutcome::Failed { error, retained } => {
                        self.notify(SessionNotice::SendFailed {
                            local_id,
                            error,
                            retained,
                        });
                    }
                    SendOutcome::Orphaned => {}
                }
                self.publish();
            }
            Completion::Deleted {
                message_id,
                for_everyone,
                result,
                reply,
            } => {
                if result.is_ok() && self.conversation.apply_local_delete(message_id, for_everyone) {
                    self.publish();
                }
                let _ = reply.send(result.map_err(SyncError::from));
            }
        }
    }

    fn spawn_history_fetch(&self) {
        let api = Arc::clone(&self.api);
        let completions = self.completions_tx.clone();
        let conversation_id = self.conversation.conversation_id();
        let limit = self.conversation.config().history_limit;
        tokio::spawn(async move {
            let result = api.list_messages(conversation_id, limit).await;
            let _ = completions.send(Completion::History(result));
        });
    }

    fn spawn_send(&self, local_id: LocalId, draft: Draft) {
        let pipeline = self.pipeline.clone();
        let completions = self.completions_tx.clone();
        let conversation_id = self.conversation.conversation_id();
        tokio::spawn(async move {
            let result = pipeline.submit(conversation_id, local_id, draft).await;
            let _ = completions.send(Completion::Sent { local_id, result });
        });
    }

    /// Run a non-optimistic request against a known message and reply with
    /// its result. The store only changes when the broadcast comes back.
    fn spawn_request<T, F, Fut>(&self, message_id: Uuid, reply: Reply<T>, call: F)
    where
        T: Send + 'static,
        F: FnOnce(Arc<A>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        if let Err(e) = self.conversation.ensure_known(message_id) {
            let _ = reply.send(Err(e));
            return;
        }
        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            let result = call(api).await;
            if let Err(e) = &result {
                warn!("Request on message {} failed: {}", message_id, e);
            }
            let _ = reply.send(result.map_err(SyncError::from));
        });
    }

    fn push_command(&self, cmd: ClientCommand) {
        if let Err(e) = self.push.send_command(cmd) {
            warn!("Failed to queue push command: {}", e);
        }
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }

    fn publish(&self) {
        self.snapshots
            .send_replace(self.conversation.snapshot(Instant::now()));
    }

    fn shutdown(&mut self) -> Vec<LocalId> {
        let conversation_id = self.conversation.conversation_id();
        if let Some(stop) = self.conversation.end_typing() {
            self.push_command(stop);
        }
        self.push_command(ClientCommand::LeaveChat { conversation_id });
        let abandoned = self.conversation.close();
        self.publish();
        debug!("Session for {} stopped", conversation_id);
        abandoned
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
