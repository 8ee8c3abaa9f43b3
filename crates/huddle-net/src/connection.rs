//! Connection manager with a tokio command/notification pattern.
//!
//! The channel runs in a dedicated tokio task. [`ConnectionManager`] is the
//! cheap, cloneable handle the rest of the client holds: it emits events,
//! supplies the user identity and closes the channel. Everything the server
//! pushes comes back as [`ChannelNotification`]s on a single receiver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use huddle_shared::{ClientEvent, ServerEvent, UserId};

use crate::error::TransportError;
use crate::transport::{ConnectTarget, Connector, Link};

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the connection task.
#[derive(Debug)]
enum ChannelCommand {
    Emit(ClientEvent),
    Identify(UserId),
    Shutdown,
}

/// Notifications sent *from* the connection task to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelNotification {
    /// A link is up (first connect or reconnect).
    Connected,
    /// The link went away; the task is already retrying.
    Disconnected { reason: String },
    /// A decoded server event.
    Event(ServerEvent),
}

/// Exponential backoff between connect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Upper bound of the random delay added to every wait.
    pub jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: Duration::from_millis(250),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.min(32) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.delay_for(attempt) + Duration::from_millis(extra)
    }
}

/// Configuration for spawning the connection task.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub target: ConnectTarget,
    pub reconnect: ReconnectPolicy,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to the single persistent channel of this session.
#[derive(Clone)]
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<ChannelCommand>,
    connected: Arc<AtomicBool>,
}

impl ConnectionManager {
    /// Spawn the connection task and start connecting immediately.
    ///
    /// Returns the handle plus the receiver every component subscribes
    /// through. The identity may be supplied later with [`identify`].
    ///
    /// [`identify`]: ConnectionManager::identify
    pub fn connect<C: Connector>(
        connector: C,
        config: ConnectionConfig,
    ) -> (ConnectionManager, mpsc::Receiver<ChannelNotification>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (notif_tx, notif_rx) = mpsc::channel(256);
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_connection(
            connector,
            config,
            cmd_rx,
            notif_tx,
            connected.clone(),
        ));

        (ConnectionManager { cmd_tx, connected }, notif_rx)
    }

    /// Queue an event for the server. Fails fast when no link is up; nothing
    /// is buffered for later delivery.
    pub fn emit(&self, event: ClientEvent) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.cmd_tx
            .send(ChannelCommand::Emit(event))
            .map_err(|_| TransportError::Closed)
    }

    /// Bind the session identity. `join` goes out now if connected, or on
    /// the next successful connect otherwise.
    pub fn identify(&self, user: UserId) -> Result<(), TransportError> {
        self.cmd_tx
            .send(ChannelCommand::Identify(user))
            .map_err(|_| TransportError::Closed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Close the channel for good. No reconnect follows.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(ChannelCommand::Shutdown);
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

async fn run_connection<C: Connector>(
    connector: C,
    config: ConnectionConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<ChannelCommand>,
    notif_tx: mpsc::Sender<ChannelNotification>,
    connected: Arc<AtomicBool>,
) {
    let mut identity: Option<UserId> = None;
    let mut attempt: u32 = 0;

    loop {
        let conn_id = Uuid::new_v4();
        debug!(conn = %conn_id, url = %config.target.url, attempt, "Connecting channel");

        let link = match connector.connect(&config.target).await {
            Ok(link) => link,
            Err(e) => {
                warn!(conn = %conn_id, error = %e, attempt, "Channel connect failed");
                let delay = config.reconnect.jittered(attempt);
                attempt = attempt.saturating_add(1);
                if !wait_backoff(delay, &mut cmd_rx, &mut identity).await {
                    break;
                }
                continue;
            }
        };

        attempt = 0;
        connected.store(true, Ordering::SeqCst);
        info!(conn = %conn_id, tenant = %config.target.tenant, "Channel connected");
        if notif_tx.send(ChannelNotification::Connected).await.is_err() {
            break;
        }

        match drive_link(conn_id, link, &mut cmd_rx, &notif_tx, &mut identity).await {
            LinkEnd::Shutdown => break,
            LinkEnd::Lost(reason) => {
                connected.store(false, Ordering::SeqCst);
                warn!(conn = %conn_id, reason = %reason, "Channel disconnected");
                if notif_tx
                    .send(ChannelNotification::Disconnected { reason })
                    .await
                    .is_err()
                {
                    break;
                }
                let delay = config.reconnect.jittered(attempt);
                attempt = attempt.saturating_add(1);
                if !wait_backoff(delay, &mut cmd_rx, &mut identity).await {
                    break;
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    info!("Channel closed");
}

enum LinkEnd {
    Shutdown,
    Lost(String),
}

/// Pump one live link until it drops or the handle shuts the channel down.
async fn drive_link(
    conn_id: Uuid,
    link: Link,
    cmd_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    notif_tx: &mpsc::Sender<ChannelNotification>,
    identity: &mut Option<UserId>,
) -> LinkEnd {
    let Link {
        outbound,
        mut inbound,
    } = link;

    // The user we announced on this link, if any. Reset by every reconnect.
    let mut announced: Option<UserId> = None;
    if let Some(user) = *identity {
        if let Err(reason) = write_event(&outbound, &ClientEvent::Join(user)).await {
            return LinkEnd::Lost(reason);
        }
        info!(conn = %conn_id, user = %user, "Identity announced");
        announced = Some(user);
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None | Some(ChannelCommand::Shutdown) => return LinkEnd::Shutdown,
                Some(ChannelCommand::Identify(user)) => {
                    *identity = Some(user);
                    if announced == Some(user) {
                        continue;
                    }
                    if let Err(reason) = write_event(&outbound, &ClientEvent::Join(user)).await {
                        return LinkEnd::Lost(reason);
                    }
                    info!(conn = %conn_id, user = %user, "Identity announced");
                    announced = Some(user);
                }
                Some(ChannelCommand::Emit(event)) => {
                    debug!(conn = %conn_id, event = event.name(), "Emitting");
                    if let Err(reason) = write_event(&outbound, &event).await {
                        return LinkEnd::Lost(reason);
                    }
                }
            },

            frame = inbound.recv() => match frame {
                Some(text) => match ServerEvent::from_json(&text) {
                    Ok(event) => {
                        debug!(conn = %conn_id, event = event.name(), "Received");
                        if notif_tx.send(ChannelNotification::Event(event)).await.is_err() {
                            return LinkEnd::Shutdown;
                        }
                    }
                    Err(e) => warn!(conn = %conn_id, error = %e, "Ignoring malformed frame"),
                },
                None => return LinkEnd::Lost("connection closed".into()),
            },
        }
    }
}

async fn write_event(outbound: &mpsc::Sender<String>, event: &ClientEvent) -> Result<(), String> {
    let frame = event.to_json().map_err(|e| e.to_string())?;
    outbound
        .send(frame)
        .await
        .map_err(|_| "send failed: link closed".to_string())
}

/// Sleep for `delay` while still serving commands. Events emitted in the
/// meantime are dropped, never queued. Returns `false` on shutdown.
async fn wait_backoff(
    delay: Duration,
    cmd_rx: &mut mpsc::UnboundedReceiver<ChannelCommand>,
    identity: &mut Option<UserId>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(ChannelCommand::Shutdown) => return false,
                Some(ChannelCommand::Identify(user)) => *identity = Some(user),
                Some(ChannelCommand::Emit(event)) => {
                    warn!(event = event.name(), "Dropping event while disconnected");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryConnector, MemoryServer};
    use huddle_shared::TenantId;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            target: ConnectTarget {
                url: "memory://test".into(),
                tenant: TenantId::new("acme"),
                auth_token: None,
            },
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                backoff_factor: 2.0,
                jitter: Duration::ZERO,
            },
        }
    }

    async fn start() -> (
        ConnectionManager,
        mpsc::Receiver<ChannelNotification>,
        MemoryServer,
        MemoryConnector,
    ) {
        let (connector, server) = MemoryConnector::pair();
        let (manager, notif_rx) = ConnectionManager::connect(connector.clone(), config());
        (manager, notif_rx, server, connector)
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = config().reconnect;
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
        assert_eq!(policy.delay_for(10), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_join_after_connect_when_identity_arrives_late() {
        let (manager, mut notif_rx, mut server, _) = start().await;
        let mut peer = server.accept().await.unwrap();
        assert_eq!(notif_rx.recv().await, Some(ChannelNotification::Connected));
        assert_eq!(peer.target.tenant, TenantId::new("acme"));

        manager.identify(UserId(7)).unwrap();
        assert_eq!(peer.recv().await, Some(ClientEvent::Join(UserId(7))));

        // Same identity again must not re-announce on this link
        manager.identify(UserId(7)).unwrap();
        manager
            .emit(ClientEvent::MarkRead {
                sender_id: UserId(2),
            })
            .unwrap();
        assert_eq!(
            peer.recv().await,
            Some(ClientEvent::MarkRead {
                sender_id: UserId(2)
            })
        );
    }

    #[tokio::test]
    async fn test_join_on_connect_when_identity_arrives_first() {
        let (connector, mut server) = MemoryConnector::pair();
        connector.fail_next(1);
        let (manager, mut notif_rx) = ConnectionManager::connect(connector, config());
        manager.identify(UserId(9)).unwrap();

        let mut peer = server.accept().await.unwrap();
        assert_eq!(notif_rx.recv().await, Some(ChannelNotification::Connected));
        assert_eq!(peer.recv().await, Some(ClientEvent::Join(UserId(9))));
        assert!(peer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_after_reconnect() {
        let (manager, mut notif_rx, mut server, _) = start().await;
        manager.identify(UserId(3)).unwrap();

        let mut first = server.accept().await.unwrap();
        assert_eq!(first.recv().await, Some(ClientEvent::Join(UserId(3))));
        assert_eq!(notif_rx.recv().await, Some(ChannelNotification::Connected));

        drop(first);
        assert!(matches!(
            notif_rx.recv().await,
            Some(ChannelNotification::Disconnected { .. })
        ));
        assert!(matches!(
            manager.emit(ClientEvent::MarkRead {
                sender_id: UserId(1)
            }),
            Err(TransportError::NotConnected)
        ));

        let mut second = server.accept().await.unwrap();
        assert_eq!(notif_rx.recv().await, Some(ChannelNotification::Connected));
        assert_eq!(second.recv().await, Some(ClientEvent::Join(UserId(3))));
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_server_events_are_decoded() {
        let (_manager, mut notif_rx, mut server, _) = start().await;
        let peer = server.accept().await.unwrap();
        assert_eq!(notif_rx.recv().await, Some(ChannelNotification::Connected));

        peer.send_raw("not json").await.unwrap();
        peer.send(&ServerEvent::UpdateOnlineUsers(vec![UserId(1)]))
            .await
            .unwrap();

        assert_eq!(
            notif_rx.recv().await,
            Some(ChannelNotification::Event(ServerEvent::UpdateOnlineUsers(
                vec![UserId(1)]
            )))
        );
    }

    #[tokio::test]
    async fn test_disconnect_stops_task() {
        let (manager, mut notif_rx, mut server, _) = start().await;
        let _peer = server.accept().await.unwrap();
        assert_eq!(notif_rx.recv().await, Some(ChannelNotification::Connected));

        manager.disconnect();
        assert_eq!(notif_rx.recv().await, None);
        assert!(!manager.is_connected());
    }
}
