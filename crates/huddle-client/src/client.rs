//! The client event loop.
//!
//! [`ChatClient::start`] spawns one task owning every piece of messaging
//! state: presence, the open conversation, the conversation list and typing
//! indicators. The task multiplexes UI commands, channel notifications,
//! results of store calls (which run on their own tasks) and timer
//! deadlines. Call signaling is forwarded to the call task.
//!
//! [`ChatClient`] is the cheap, cloneable handle the UI holds.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use huddle_media::{CallNegotiator, MediaBackend};
use huddle_net::{ChannelNotification, ConnectionManager, Connector, PresenceRegistry};
use huddle_shared::protocol::OutgoingMessage;
use huddle_shared::{
    CallKind, ClientEvent, ConversationSummary, Message, MessageId, MessagePage, Pagination,
    ServerEvent, User, UserId,
};
use huddle_store::{MessageStore, PageRequest, StoreError, Upload, UploadedFile};

use crate::calls::{spawn_call_task, CallHandle, CallInput, CallStatus, Reply};
use crate::config::ClientConfig;
use crate::directory::Directory;
use crate::error::ClientError;
use crate::events::UiEvent;
use crate::history::{History, InsertOutcome, LoadTicket, PageOutcome};
use crate::messaging::{self, Draft};
use crate::typing::TypingTracker;

// ---------------------------------------------------------------------------
// Commands and task results
// ---------------------------------------------------------------------------

enum Command {
    Open(UserId),
    Close,
    LoadOlder,
    Send { draft: Draft, reply: Reply },
    Keystroke,
    DeleteMessage { id: MessageId, reply: Reply },
    DeleteConversation { counterpart: UserId, reply: Reply },
    RefreshConversations,
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Results of store calls, delivered back to the loop.
enum TaskDone {
    Uploaded {
        receiver: UserId,
        body: String,
        file: Upload,
        result: Result<UploadedFile, StoreError>,
        reply: Reply,
    },
    Page {
        ticket: LoadTicket,
        result: Result<MessagePage, StoreError>,
    },
    Conversations(Result<Vec<ConversationSummary>, StoreError>),
    MessageDeleted {
        id: MessageId,
        result: Result<(), StoreError>,
        reply: Reply,
    },
    ConversationDeleted {
        counterpart: UserId,
        result: Result<(), StoreError>,
        reply: Reply,
    },
}

/// Point-in-time copy of the client state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub me: User,
    pub connected: bool,
    pub online: Vec<UserId>,
    pub open: Option<UserId>,
    pub messages: Vec<Message>,
    pub pagination: Pagination,
    pub loading_history: bool,
    pub conversations: Vec<ConversationSummary>,
    pub typing: Vec<UserId>,
    pub call: CallStatus,
}

impl Snapshot {
    pub fn is_online(&self, user: UserId) -> bool {
        self.online.contains(&user)
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ChatClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    calls: mpsc::UnboundedSender<CallInput>,
}

impl ChatClient {
    /// Connect and spawn the client. Returns the handle plus the stream of
    /// UI notifications.
    pub fn start<C: Connector>(
        user: User,
        config: ClientConfig,
        connector: C,
        store: Arc<dyn MessageStore>,
        media: MediaBackend,
    ) -> (ChatClient, mpsc::UnboundedReceiver<UiEvent>) {
        let (connection, notif_rx) = ConnectionManager::connect(connector, config.connection());
        if let Err(e) = connection.identify(user.id) {
            warn!(error = %e, "Could not queue identity");
        }

        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let negotiator = CallNegotiator::new(
            user.id,
            user.display_name.clone(),
            media.devices,
            media.peers,
            config.rtc(),
        );
        let calls = spawn_call_task(negotiator, media.events, connection.clone(), ui_tx.clone());

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let handle = ChatClient {
            cmd_tx,
            calls: calls.input.clone(),
        };

        info!(user = %user.id, tenant = %user.tenant, "Starting chat client");
        let state = ClientLoop {
            presence: PresenceRegistry::new(),
            history: History::new(user.id),
            directory: Directory::new(config.directory_debounce),
            typing: TypingTracker::new(user.id, config.typing_timeout),
            me: user,
            config,
            connection,
            store,
            calls,
            ui_tx,
            task_tx,
        };
        tokio::spawn(state.run(cmd_rx, notif_rx, task_rx));

        (handle, ui_rx)
    }

    pub fn open_conversation(&self, counterpart: UserId) {
        let _ = self.cmd_tx.send(Command::Open(counterpart));
    }

    pub fn close_conversation(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }

    /// Load the next older page of the open conversation, if there is one.
    pub fn load_older(&self) {
        let _ = self.cmd_tx.send(Command::LoadOlder);
    }

    /// Call on every keystroke in the composer.
    pub fn keystroke(&self) {
        let _ = self.cmd_tx.send(Command::Keystroke);
    }

    pub fn refresh_conversations(&self) {
        let _ = self.cmd_tx.send(Command::RefreshConversations);
    }

    /// Send to the open conversation. Resolves once the message is on the
    /// channel (after the upload, if there is an attachment).
    pub async fn send(&self, draft: Draft) -> Result<(), ClientError> {
        self.request(|reply| Command::Send { draft, reply }).await
    }

    pub async fn send_text(&self, body: impl Into<String>) -> Result<(), ClientError> {
        self.send(Draft::text(body)).await
    }

    pub async fn delete_message(&self, id: MessageId) -> Result<(), ClientError> {
        self.request(|reply| Command::DeleteMessage { id, reply }).await
    }

    pub async fn delete_conversation(&self, counterpart: UserId) -> Result<(), ClientError> {
        self.request(|reply| Command::DeleteConversation { counterpart, reply })
            .await
    }

    pub async fn start_call(&self, to: UserId, kind: CallKind) -> Result<(), ClientError> {
        self.call_request(|reply| CallInput::Start { to, kind, reply }).await
    }

    pub async fn accept_call(&self) -> Result<(), ClientError> {
        self.call_request(|reply| CallInput::Accept { reply }).await
    }

    pub async fn reject_call(&self) -> Result<(), ClientError> {
        self.call_request(|reply| CallInput::Reject { reply }).await
    }

    pub fn hang_up(&self) {
        let _ = self.calls.send(CallInput::HangUp);
    }

    pub async fn snapshot(&self) -> Result<Snapshot, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Snapshot(tx))
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// End any call, release media and close the channel.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Command) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(make(tx)).map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    async fn call_request(&self, make: impl FnOnce(Reply) -> CallInput) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.calls.send(make(tx)).map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

struct ClientLoop {
    me: User,
    config: ClientConfig,
    connection: ConnectionManager,
    store: Arc<dyn MessageStore>,
    presence: PresenceRegistry,
    history: History,
    directory: Directory,
    typing: TypingTracker,
    calls: CallHandle,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
    task_tx: mpsc::UnboundedSender<TaskDone>,
}

impl ClientLoop {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut notif_rx: mpsc::Receiver<ChannelNotification>,
        mut task_rx: mpsc::UnboundedReceiver<TaskDone>,
    ) {
        // Initial load of the conversation list
        self.directory.refresh_now(Instant::now());

        loop {
            let typing_deadline = self.typing.next_deadline();
            let directory_deadline = self.directory.next_deadline();

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None => {
                        self.shutdown().await;
                        break;
                    }
                    Some(Command::Shutdown(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                },

                Some(notification) = notif_rx.recv() => self.handle_notification(notification),

                Some(done) = task_rx.recv() => self.handle_task(done),

                _ = sleep_until(typing_deadline) => self.expire_typing(),

                _ = sleep_until(directory_deadline) => self.refresh_directory(),
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Open(counterpart) => self.open(counterpart),
            Command::Close => {
                self.stop_typing();
                self.history.close();
            }
            Command::LoadOlder => match self.history.load_older() {
                Some(ticket) => self.load_page(ticket),
                None => debug!("No older page to load"),
            },
            Command::Send { draft, reply } => self.send(draft, reply),
            Command::Keystroke => {
                if let Some(counterpart) = self.history.counterpart() {
                    for event in self.typing.keystroke(counterpart, Instant::now()) {
                        self.emit(event);
                    }
                }
            }
            Command::DeleteMessage { id, reply } => {
                let store = self.store.clone();
                let tx = self.task_tx.clone();
                tokio::spawn(async move {
                    let result = store.delete_message(id).await;
                    let _ = tx.send(TaskDone::MessageDeleted { id, result, reply });
                });
            }
            Command::DeleteConversation { counterpart, reply } => {
                let store = self.store.clone();
                let tx = self.task_tx.clone();
                tokio::spawn(async move {
                    let result = store.delete_conversation(counterpart).await;
                    let _ = tx.send(TaskDone::ConversationDeleted {
                        counterpart,
                        result,
                        reply,
                    });
                });
            }
            Command::RefreshConversations => self.directory.refresh_now(Instant::now()),
            Command::Snapshot(tx) => {
                let _ = tx.send(self.snapshot());
            }
            Command::Shutdown(_) => {}
        }
    }

    fn open(&mut self, counterpart: UserId) {
        self.stop_typing();
        let ticket = self.history.open(counterpart);
        info!(counterpart = %counterpart, "Conversation opened");
        self.notify(UiEvent::ConversationOpened { counterpart });
        self.load_page(ticket);

        self.emit(ClientEvent::MarkRead {
            sender_id: counterpart,
        });
        self.directory.refresh_debounced(Instant::now());
    }

    fn load_page(&self, ticket: LoadTicket) {
        let store = self.store.clone();
        let tx = self.task_tx.clone();
        let limit = self.config.page_size;
        debug!(counterpart = %ticket.counterpart, page = ticket.page, "Loading history");
        tokio::spawn(async move {
            let request = PageRequest {
                page: ticket.page,
                limit,
            };
            let result = store.messages(ticket.counterpart, request).await;
            let _ = tx.send(TaskDone::Page { ticket, result });
        });
    }

    fn send(&mut self, draft: Draft, reply: Reply) {
        let receiver = match messaging::validate(
            self.history.counterpart(),
            &draft,
            self.config.max_upload_bytes,
        ) {
            Ok(receiver) => receiver,
            Err(e) => {
                debug!(error = %e, "Send rejected");
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        self.stop_typing();

        match draft.attachment {
            None => {
                let result = self.send_composed(messaging::compose(receiver, &draft.body, None));
                let _ = reply.send(result);
            }
            Some(file) => {
                debug!(name = %file.name, size = file.len(), "Uploading attachment");
                let store = self.store.clone();
                let tx = self.task_tx.clone();
                let body = draft.body;
                tokio::spawn(async move {
                    let result = store.upload_file(file.clone()).await;
                    let _ = tx.send(TaskDone::Uploaded {
                        receiver,
                        body,
                        file,
                        result,
                        reply,
                    });
                });
            }
        }
    }

    fn send_composed(
        &mut self,
        message: OutgoingMessage,
    ) -> Result<(), ClientError> {
        let receiver = message.receiver_id;
        self.connection.emit(ClientEvent::SendMessage(message))?;
        debug!(receiver = %receiver, "Message sent");
        self.directory.refresh_now(Instant::now());
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Channel
    // -----------------------------------------------------------------------

    fn handle_notification(&mut self, notification: ChannelNotification) {
        match notification {
            ChannelNotification::Connected => {
                self.notify(UiEvent::Connected);
                self.directory.refresh_now(Instant::now());
            }
            ChannelNotification::Disconnected { reason } => {
                self.notify(UiEvent::Disconnected { reason });
            }
            ChannelNotification::Event(event) => self.handle_server_event(event),
        }
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::UpdateOnlineUsers(users) => {
                if self.presence.apply_snapshot(users) {
                    self.notify(UiEvent::PresenceChanged {
                        online: self.presence.online_users(),
                    });
                }
            }
            ServerEvent::ReceiveMessage(message) => self.on_receive(message),
            ServerEvent::UserTyping { sender_id } => {
                if self.typing.remote_typing(sender_id, Instant::now()) {
                    self.notify(UiEvent::TypingChanged {
                        user: sender_id,
                        typing: true,
                    });
                }
            }
            ServerEvent::UserStopTyping { sender_id } => self.clear_remote_typing(sender_id),
            ServerEvent::MessagesRead { reader_id } => {
                if self.history.mark_outbound_read(reader_id) > 0 {
                    self.notify(UiEvent::MessagesChanged {
                        counterpart: reader_id,
                    });
                }
            }
            signal @ (ServerEvent::CallInitiated { .. }
            | ServerEvent::CallAccepted { .. }
            | ServerEvent::CallRejected
            | ServerEvent::IceCandidate { .. }
            | ServerEvent::CallEnded) => {
                if self.calls.input.send(CallInput::Signal(signal)).is_err() {
                    warn!("Call task gone, dropping signal");
                }
            }
        }
    }

    fn on_receive(&mut self, message: Message) {
        let me = self.me.id;
        let sender = message.sender_id;
        let counterpart = message.counterpart_of(me);
        debug!(id = %message.id, sender = %sender, "Message received");

        if sender != me {
            self.clear_remote_typing(sender);
        }

        match self.history.insert(message) {
            InsertOutcome::Appended => {
                if sender != me {
                    // Seen as it arrives
                    self.emit(ClientEvent::MarkRead { sender_id: sender });
                    self.history.mark_inbound_read(sender);
                }
                self.notify(UiEvent::MessagesChanged { counterpart });
            }
            InsertOutcome::Duplicate => debug!(sender = %sender, "Duplicate message ignored"),
            InsertOutcome::NotOpen => {}
        }

        self.directory.refresh_debounced(Instant::now());
    }

    // -----------------------------------------------------------------------
    // Task results
    // -----------------------------------------------------------------------

    fn handle_task(&mut self, done: TaskDone) {
        match done {
            TaskDone::Uploaded {
                receiver,
                body,
                file,
                result,
                reply,
            } => {
                let result = match result {
                    Ok(stored) => {
                        let message = messaging::compose(receiver, &body, Some((&file, stored)));
                        self.send_composed(message)
                    }
                    Err(e) => {
                        error!(name = %file.name, error = %e, "Attachment upload failed");
                        Err(e.into())
                    }
                };
                let _ = reply.send(result);
            }

            TaskDone::Page { ticket, result } => match result {
                Ok(page) => match self.history.apply_page(ticket, page) {
                    PageOutcome::Stale => {
                        debug!(counterpart = %ticket.counterpart, page = ticket.page, "Discarding stale history page");
                    }
                    PageOutcome::Applied { added } => {
                        debug!(counterpart = %ticket.counterpart, page = ticket.page, added, "History page applied");
                        if ticket.page == 1 {
                            // mark_read went out when the conversation opened
                            self.history.mark_inbound_read(ticket.counterpart);
                        }
                        self.notify(UiEvent::HistoryLoaded {
                            counterpart: ticket.counterpart,
                            pagination: self.history.pagination(),
                        });
                        self.notify(UiEvent::MessagesChanged {
                            counterpart: ticket.counterpart,
                        });
                    }
                },
                Err(e) => {
                    if self.history.is_current(&ticket) {
                        error!(counterpart = %ticket.counterpart, error = %e, "History load failed");
                        self.history.load_failed(&ticket);
                        self.notify_error(e.into());
                    }
                }
            },

            TaskDone::Conversations(result) => match result {
                Ok(conversations) => {
                    debug!(count = conversations.len(), "Conversations refreshed");
                    self.directory.complete(conversations.clone());
                    self.notify(UiEvent::ConversationsRefreshed { conversations });
                }
                Err(e) => {
                    self.directory.failed();
                    error!(error = %e, "Conversation list refresh failed");
                    self.notify_error(e.into());
                }
            },

            TaskDone::MessageDeleted { id, result, reply } => {
                let result = match result {
                    Ok(()) => {
                        info!(id = %id, "Message deleted");
                        if let Some(counterpart) = self.history.counterpart() {
                            if self.history.remove(id) {
                                self.notify(UiEvent::MessagesChanged { counterpart });
                            }
                        }
                        self.directory.refresh_now(Instant::now());
                        Ok(())
                    }
                    Err(e) => {
                        error!(id = %id, error = %e, "Delete failed");
                        Err(e.into())
                    }
                };
                let _ = reply.send(result);
            }

            TaskDone::ConversationDeleted {
                counterpart,
                result,
                reply,
            } => {
                let result = match result {
                    Ok(()) => {
                        info!(counterpart = %counterpart, "Conversation deleted");
                        if self.history.clear_conversation(counterpart) {
                            self.notify(UiEvent::MessagesChanged { counterpart });
                        }
                        self.directory.refresh_now(Instant::now());
                        Ok(())
                    }
                    Err(e) => {
                        error!(counterpart = %counterpart, error = %e, "Delete failed");
                        Err(e.into())
                    }
                };
                let _ = reply.send(result);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn expire_typing(&mut self) {
        let expired = self.typing.expire(Instant::now());
        if let Some(stop) = expired.stop {
            self.emit(stop);
        }
        for user in expired.cleared {
            self.notify(UiEvent::TypingChanged {
                user,
                typing: false,
            });
        }
    }

    fn refresh_directory(&mut self) {
        if !self.directory.begin(Instant::now()) {
            return;
        }
        let store = self.store.clone();
        let tx = self.task_tx.clone();
        tokio::spawn(async move {
            let result = store.conversations().await;
            let _ = tx.send(TaskDone::Conversations(result));
        });
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn stop_typing(&mut self) {
        if let Some(stop) = self.typing.stop() {
            self.emit(stop);
        }
    }

    fn clear_remote_typing(&mut self, user: UserId) {
        if self.typing.remote_stopped(user) {
            self.notify(UiEvent::TypingChanged {
                user,
                typing: false,
            });
        }
    }

    /// Fire-and-forget emit. Nothing is queued while offline.
    fn emit(&self, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.connection.emit(event) {
            warn!(event = name, error = %e, "Event not sent");
        }
    }

    fn notify(&self, event: UiEvent) {
        let _ = self.ui_tx.send(event);
    }

    fn notify_error(&self, err: ClientError) {
        self.notify(UiEvent::Error(err.user_message()));
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            me: self.me.clone(),
            connected: self.connection.is_connected(),
            online: self.presence.online_users(),
            open: self.history.counterpart(),
            messages: self.history.messages().to_vec(),
            pagination: self.history.pagination(),
            loading_history: self.history.is_loading(),
            conversations: self.directory.conversations().to_vec(),
            typing: self.typing.typing_users(),
            call: self.calls.status.borrow().clone(),
        }
    }

    async fn shutdown(&mut self) {
        self.stop_typing();

        let (done_tx, done_rx) = oneshot::channel();
        if self
            .calls
            .input
            .send(CallInput::Shutdown { done: done_tx })
            .is_ok()
        {
            let _ = done_rx.await;
        }

        self.connection.disconnect();
        info!(user = %self.me.id, "Chat client stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
