//! One client's WebSocket session.
//!
//! Three loops run concurrently for every socket:
//!
//! - read: decodes frames and turns them into hub calls
//! - write: forwards the outbound queue to the socket
//! - liveness: pings the peer periodically and removes it on failure
//!
//! The socket is closed only after all three have finished.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket},
};
use futures_util::{
    sink::{Sink, SinkExt},
    stream::{SplitStream, StreamExt},
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    time::{Instant, timeout},
};

use crate::{
    domain::{ConnectionId, DispatchError, Envelope, EnvelopeKind, HubError, Membership},
    hub::{Dispatcher, FanoutJob, Hub},
    infrastructure::dto::websocket::decode_envelope,
};

/// Interval between liveness probes
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);
/// Deadline for writing a liveness probe
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for writing one outbound frame
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-connection timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Errors that end a connection's read loop
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Write half of a socket shared by the write and liveness loops
type SharedSink<S> = Arc<Mutex<S>>;

/// Routing state of one attached client
pub struct Connection {
    id: ConnectionId,
    hub: Arc<Hub>,
    dispatcher: Arc<Dispatcher>,
}

impl Connection {
    /// Attach a new connection to the hub.
    pub async fn attach(
        hub: Arc<Hub>,
        dispatcher: Arc<Dispatcher>,
    ) -> (Self, mpsc::Receiver<Envelope>) {
        let (id, rx) = hub.attach().await;
        let connection = Self {
            id,
            hub,
            dispatcher,
        };
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Groups this connection currently belongs to, as the hub sees them
    pub async fn membership(&self) -> Membership {
        self.hub.membership(self.id).await
    }

    /// Drive `socket` until the read, write and liveness loops have all exited.
    pub async fn serve(
        socket: WebSocket,
        hub: Arc<Hub>,
        dispatcher: Arc<Dispatcher>,
        config: ConnectionConfig,
    ) {
        let (connection, rx) = Self::attach(hub.clone(), dispatcher).await;
        let id = connection.id;
        tracing::info!("Connection {} opened", id);

        let (sink, stream) = socket.split();
        let sink = Arc::new(Mutex::new(sink));

        let read_task = tokio::spawn(connection.read_loop(stream));
        let write_task = tokio::spawn(write_loop(id, rx, sink.clone(), config.write_timeout));
        let liveness_task = tokio::spawn(liveness_loop(id, hub.clone(), sink.clone(), config));

        let (read, write, liveness) = tokio::join!(read_task, write_task, liveness_task);
        for (name, result) in [("read", read), ("write", write), ("liveness", liveness)] {
            if let Err(e) = result {
                tracing::error!("Connection {}: {} loop panicked: {}", id, name, e);
            }
        }

        let departure = hub.remove_everywhere(id).await;
        if let Err(e) = sink.lock().await.close().await {
            tracing::debug!("Connection {}: closing socket failed: {}", id, e);
        }
        tracing::info!(
            "Connection {} closed (queue closed at teardown: {})",
            id,
            departure.closed_queue
        );
    }

    /// Route one decoded envelope.
    ///
    /// JOIN registers the connection under the sender's own group and requests
    /// a history replay. CONTENT joins the target group on demand, pulls the
    /// recipient's connections into it, and queues the fan-out.
    pub async fn handle_envelope(&self, envelope: Envelope) -> Result<(), ConnectionError> {
        match envelope.kind {
            EnvelopeKind::Join => {
                tracing::info!(
                    "Connection {} initialized as '{}'",
                    self.id,
                    envelope.sender_id
                );
                let membership = self.hub.join(self.id, envelope.group_id.clone()).await?;
                tracing::debug!("Connection {} is in {} group(s)", self.id, membership.len());
                self.dispatcher
                    .submit(FanoutJob::Replay {
                        envelope,
                        connection: self.id,
                    })
                    .await?;
            }
            EnvelopeKind::Content => {
                tracing::debug!(
                    "Connection {}: message from '{}' to group '{}'",
                    self.id,
                    envelope.sender_id,
                    envelope.group_id
                );
                if !self.hub.is_member(self.id, &envelope.group_id).await {
                    self.hub.join(self.id, envelope.group_id.clone()).await?;
                }
                if let Some(receiver_id) = &envelope.receiver_id {
                    self.hub
                        .pull_members(receiver_id, &envelope.group_id)
                        .await;
                }
                self.dispatcher
                    .submit(FanoutJob::Broadcast(envelope))
                    .await?;
            }
        }
        Ok(())
    }

    async fn read_loop(self, mut stream: SplitStream<WebSocket>) {
        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Connection {}: read failed: {}", self.id, e);
                    break;
                }
            };

            let text = match frame {
                Message::Text(text) => text.to_string(),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        tracing::debug!("Connection {}: ignoring non UTF-8 binary frame", self.id);
                        continue;
                    }
                },
                Message::Close(_) => {
                    tracing::info!("Connection {} requested close", self.id);
                    break;
                }
                // Ping/pong is answered by the WebSocket layer
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            let envelope = match decode_envelope(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!("Connection {}: rejected envelope: {}", self.id, e);
                    continue;
                }
            };

            if let Err(e) = self.handle_envelope(envelope).await {
                tracing::warn!("Connection {}: stopped reading: {}", self.id, e);
                break;
            }
        }
        tracing::debug!("Connection {}: read loop finished", self.id);
    }
}

async fn write_loop<S>(
    id: ConnectionId,
    mut rx: mpsc::Receiver<Envelope>,
    sink: SharedSink<S>,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(envelope) = rx.recv().await {
        let frame = Message::Text(envelope.payload.into());
        match timeout(write_timeout, async { sink.lock().await.send(frame).await }).await {
            Ok(Ok(())) => {
                tracing::debug!(
                    "Connection {}: wrote message for group '{}'",
                    id,
                    envelope.group_id
                );
            }
            Ok(Err(e)) => {
                tracing::warn!("Connection {}: write failed: {}", id, e);
                return;
            }
            Err(_) => {
                tracing::warn!("Connection {}: write timed out after {:?}", id, write_timeout);
                return;
            }
        }
    }

    // The hub closed our queue: ask the peer to hang up
    tracing::info!("Connection {}: outbound queue closed", id);
    let _ = timeout(write_timeout, async {
        sink.lock().await.send(Message::Close(None)).await
    })
    .await;
}

async fn liveness_loop<S>(
    id: ConnectionId,
    hub: Arc<Hub>,
    sink: SharedSink<S>,
    config: ConnectionConfig,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut ticker = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );

    loop {
        ticker.tick().await;

        if !hub.is_attached(id).await {
            tracing::debug!("Connection {}: detached, stopping liveness probes", id);
            return;
        }

        let probe = timeout(config.ping_timeout, async {
            sink.lock().await.send(Message::Ping(Bytes::new())).await
        })
        .await;

        match probe {
            Ok(Ok(())) => tracing::debug!("Pinged connection {}", id),
            Ok(Err(e)) => {
                tracing::warn!("Connection {}: liveness probe failed: {}", id, e);
                hub.remove_everywhere(id).await;
                return;
            }
            Err(_) => {
                tracing::warn!(
                    "Connection {}: liveness probe timed out after {:?}",
                    id,
                    config.ping_timeout
                );
                hub.remove_everywhere(id).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{convert::Infallible, pin::Pin};

    use futures_util::sink;

    use crate::{
        domain::{GroupId, HistoryStore},
        hub::{FanoutConfig, HubConfig},
        infrastructure::history::InMemoryHistoryStore,
    };

    fn group(name: &str) -> GroupId {
        GroupId::try_from(name).unwrap()
    }

    struct Fixture {
        hub: Arc<Hub>,
        dispatcher: Arc<Dispatcher>,
        history: Arc<InMemoryHistoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(HubConfig::default())
        }

        fn with_config(config: HubConfig) -> Self {
            let history = Arc::new(InMemoryHistoryStore::new());
            let hub = Arc::new(Hub::new(history.clone(), config));
            let dispatcher = Arc::new(Dispatcher::spawn(hub.clone(), FanoutConfig::default()));
            Self {
                hub,
                dispatcher,
                history,
            }
        }

        async fn connect(&self) -> (Connection, mpsc::Receiver<Envelope>) {
            Connection::attach(self.hub.clone(), self.dispatcher.clone()).await
        }
    }

    type TestSink<E> = Pin<Box<dyn Sink<Message, Error = E> + Send>>;

    /// Sink that forwards every written frame to a channel
    fn recording_sink() -> (
        SharedSink<TestSink<Infallible>>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: TestSink<Infallible> = Box::pin(sink::unfold(tx, |tx, message: Message| async move {
            let _ = tx.send(message);
            Ok::<_, Infallible>(tx)
        }));
        (Arc::new(Mutex::new(sink)), rx)
    }

    /// Sink whose writes never complete
    fn stalled_sink() -> SharedSink<TestSink<Infallible>> {
        let sink: TestSink<Infallible> = Box::pin(sink::unfold((), |(), _message: Message| async {
            std::future::pending::<Result<(), Infallible>>().await
        }));
        Arc::new(Mutex::new(sink))
    }

    /// Sink whose writes always fail
    fn broken_sink() -> SharedSink<TestSink<&'static str>> {
        let sink: TestSink<&'static str> =
            Box::pin(sink::unfold((), |(), _message: Message| async {
                Err::<(), &'static str>("connection reset")
            }));
        Arc::new(Mutex::new(sink))
    }

    fn short_config() -> ConnectionConfig {
        ConnectionConfig {
            ping_interval: Duration::from_millis(20),
            ping_timeout: Duration::from_millis(20),
            write_timeout: Duration::from_millis(20),
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<Envelope>) -> Envelope {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("queue closed")
    }

    #[tokio::test]
    async fn test_init_joins_own_group_and_replays_empty_history() {
        // テスト項目: INIT で送信者 ID のグループに参加し、空の履歴が返される
        // given (前提条件):
        let fixture = Fixture::new();
        let (alice, mut rx) = fixture.connect().await;
        let init = decode_envelope(r#"{"type":"INIT","senderId":"A"}"#).unwrap();

        // when (操作):
        alice.handle_envelope(init).await.unwrap();

        // then (期待する結果):
        let membership = alice.membership().await;
        assert!(membership.contains(&group("A")));
        assert_eq!(membership.len(), 1);
        let summaries = fixture.hub.group_summaries().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].members[0].connection_id, alice.id());
        assert_eq!(recv(&mut rx).await.payload, "[]");
    }

    #[tokio::test]
    async fn test_message_to_absent_receiver_is_self_delivered() {
        // テスト項目: 受信者が不在の場合、送信者のみのグループが作られ自分に配信・一度だけ保存される
        // given (前提条件):
        let fixture = Fixture::new();
        let (alice, mut rx) = fixture.connect().await;
        alice
            .handle_envelope(decode_envelope(r#"{"type":"INIT","senderId":"A"}"#).unwrap())
            .await
            .unwrap();
        recv(&mut rx).await;
        let frame =
            r#"{"type":"MESSAGE","senderId":"A","receiverId":"B","groupId":"room1","message":"hi"}"#;

        // when (操作):
        alice
            .handle_envelope(decode_envelope(frame).unwrap())
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(recv(&mut rx).await.payload, frame);
        assert!(alice.membership().await.contains(&group("room1")));
        assert!(fixture.hub.is_member(alice.id(), &group("room1")).await);
        assert!(!fixture.hub.is_member(alice.id(), &group("B")).await);
        assert_eq!(
            fixture.history.read_all(&group("room1")).await.unwrap(),
            vec![frame.to_string()]
        );
    }

    #[tokio::test]
    async fn test_message_pulls_receiver_into_group() {
        // テスト項目: 受信者が接続中なら送信者のグループに取り込まれ、メッセージを受け取る
        // given (前提条件):
        let fixture = Fixture::new();
        let (alice, mut rx_a) = fixture.connect().await;
        let (bob, mut rx_b) = fixture.connect().await;
        alice
            .handle_envelope(decode_envelope(r#"{"type":"INIT","senderId":"A"}"#).unwrap())
            .await
            .unwrap();
        bob.handle_envelope(decode_envelope(r#"{"type":"INIT","senderId":"B"}"#).unwrap())
            .await
            .unwrap();
        recv(&mut rx_a).await;
        recv(&mut rx_b).await;
        let frame =
            r#"{"type":"MESSAGE","senderId":"A","receiverId":"B","groupId":"room1","message":"hi"}"#;

        // when (操作):
        alice
            .handle_envelope(decode_envelope(frame).unwrap())
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(recv(&mut rx_a).await.payload, frame);
        assert_eq!(recv(&mut rx_b).await.payload, frame);
        assert!(bob.membership().await.contains(&group("room1")));
    }

    #[tokio::test]
    async fn test_detached_connection_stops_routing() {
        // テスト項目: ハブから削除された接続はエンベロープを処理できない
        // given (前提条件):
        let fixture = Fixture::new();
        let (alice, _rx) = fixture.connect().await;
        fixture.hub.remove_everywhere(alice.id()).await;

        // when (操作):
        let result = alice
            .handle_envelope(decode_envelope(r#"{"type":"INIT","senderId":"A"}"#).unwrap())
            .await;

        // then (期待する結果):
        assert!(matches!(
            result,
            Err(ConnectionError::Hub(HubError::Detached(id))) if id == alice.id()
        ));
    }

    #[tokio::test]
    async fn test_second_init_replays_stored_history() {
        // テスト項目: 同じ送信者 ID で再接続すると保存済みの履歴がリプレイされる
        // given (前提条件):
        let fixture = Fixture::new();
        let (first, mut rx_first) = fixture.connect().await;
        first
            .handle_envelope(decode_envelope(r#"{"type":"INIT","senderId":"A"}"#).unwrap())
            .await
            .unwrap();
        recv(&mut rx_first).await;
        let frame = r#"{"type":"MESSAGE","senderId":"A","groupId":"A","message":"note"}"#;
        first
            .handle_envelope(decode_envelope(frame).unwrap())
            .await
            .unwrap();
        recv(&mut rx_first).await;

        // when (操作):
        let (second, mut rx_second) = fixture.connect().await;
        second
            .handle_envelope(decode_envelope(r#"{"type":"INIT","senderId":"A"}"#).unwrap())
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(recv(&mut rx_second).await.payload, format!("[{}]", frame));
    }

    #[tokio::test]
    async fn test_membership_follows_pull_and_eviction() {
        // テスト項目: 他の接続による取り込みと配信失敗による追い出しが接続側の所属に反映される
        // given (前提条件):
        let fixture = Fixture::with_config(HubConfig {
            queue_capacity: 1,
            enqueue_timeout: Duration::from_millis(20),
        });
        let (alice, mut rx_a) = fixture.connect().await;
        let (bob, mut rx_b) = fixture.connect().await;
        alice
            .handle_envelope(decode_envelope(r#"{"type":"INIT","senderId":"A"}"#).unwrap())
            .await
            .unwrap();
        bob.handle_envelope(decode_envelope(r#"{"type":"INIT","senderId":"B"}"#).unwrap())
            .await
            .unwrap();
        recv(&mut rx_a).await;
        recv(&mut rx_b).await;

        // when (操作):
        alice
            .handle_envelope(
                decode_envelope(
                    r#"{"type":"MESSAGE","senderId":"A","receiverId":"B","groupId":"room1","message":"one"}"#,
                )
                .unwrap(),
            )
            .await
            .unwrap();
        let after_pull = bob.membership().await;
        recv(&mut rx_a).await;
        // Bob never drains his queue, so the next message evicts him
        for text in ["two", "three"] {
            let frame = format!(
                r#"{{"type":"MESSAGE","senderId":"A","groupId":"room1","message":"{}"}}"#,
                text
            );
            alice
                .handle_envelope(decode_envelope(&frame).unwrap())
                .await
                .unwrap();
            assert_eq!(recv(&mut rx_a).await.payload, frame);
        }
        let after_eviction = bob.membership().await;

        // then (期待する結果):
        assert!(after_pull.contains(&group("room1")));
        assert!(after_pull.contains(&group("B")));
        assert!(!after_eviction.contains(&group("room1")));
        assert!(!fixture.hub.is_member(bob.id(), &group("room1")).await);
        assert_eq!(after_eviction, fixture.hub.membership(bob.id()).await);
    }

    #[tokio::test]
    async fn test_liveness_probe_timeout_removes_connection() {
        // テスト項目: 生存確認の送信がタイムアウトすると接続は全グループから削除される
        // given (前提条件):
        let fixture = Fixture::new();
        let (alice, mut rx) = fixture.connect().await;
        fixture.hub.join(alice.id(), group("A")).await.unwrap();
        fixture.hub.join(alice.id(), group("room1")).await.unwrap();

        // when (操作):
        tokio::time::timeout(
            Duration::from_secs(1),
            liveness_loop(alice.id(), fixture.hub.clone(), stalled_sink(), short_config()),
        )
        .await
        .expect("liveness loop did not give up on a stalled socket");

        // then (期待する結果):
        assert!(!fixture.hub.is_attached(alice.id()).await);
        assert!(alice.membership().await.is_empty());
        assert!(fixture.hub.group_summaries().await.is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_liveness_probe_failure_removes_connection() {
        // テスト項目: 生存確認の送信に失敗すると接続は全グループから削除される
        // given (前提条件):
        let fixture = Fixture::new();
        let (alice, _rx) = fixture.connect().await;
        fixture.hub.join(alice.id(), group("A")).await.unwrap();

        // when (操作):
        tokio::time::timeout(
            Duration::from_secs(1),
            liveness_loop(alice.id(), fixture.hub.clone(), broken_sink(), short_config()),
        )
        .await
        .expect("liveness loop did not stop after a failed probe");

        // then (期待する結果):
        assert!(!fixture.hub.is_attached(alice.id()).await);
        assert!(fixture.hub.group_summaries().await.is_empty());
    }

    #[tokio::test]
    async fn test_liveness_loop_pings_until_detached() {
        // テスト項目: 接続中は定期的に Ping を送り、ハブから外れると停止する
        // given (前提条件):
        let fixture = Fixture::new();
        let (alice, _rx) = fixture.connect().await;
        fixture.hub.join(alice.id(), group("A")).await.unwrap();
        let (sink, mut written) = recording_sink();
        let liveness = tokio::spawn(liveness_loop(
            alice.id(),
            fixture.hub.clone(),
            sink,
            short_config(),
        ));
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), written.recv())
                .await
                .unwrap(),
            Some(Message::Ping(Bytes::new()))
        );

        // when (操作):
        fixture.hub.remove_everywhere(alice.id()).await;

        // then (期待する結果):
        tokio::time::timeout(Duration::from_secs(1), liveness)
            .await
            .expect("liveness loop kept running after detach")
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_loop_sends_close_when_queue_is_closed() {
        // テスト項目: ハブがキューを閉じると、残りのメッセージを書き出した後に Close を送る
        // given (前提条件):
        let fixture = Fixture::new();
        let (alice, rx) = fixture.connect().await;
        fixture.hub.join(alice.id(), group("room1")).await.unwrap();
        let (sink, mut written) = recording_sink();
        let writer = tokio::spawn(write_loop(alice.id(), rx, sink, DEFAULT_WRITE_TIMEOUT));
        let frame = r#"{"type":"MESSAGE","senderId":"A","groupId":"room1","message":"bye"}"#;
        fixture
            .hub
            .broadcast(&decode_envelope(frame).unwrap())
            .await;

        // when (操作):
        fixture.hub.remove_everywhere(alice.id()).await;

        // then (期待する結果):
        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("write loop kept running after the queue closed")
            .unwrap();
        assert_eq!(
            written.recv().await,
            Some(Message::Text(frame.to_string().into()))
        );
        assert_eq!(written.recv().await, Some(Message::Close(None)));
    }

    #[tokio::test]
    async fn test_write_loop_stops_on_write_timeout() {
        // テスト項目: 書き込みが期限内に終わらない場合、書き込みループは終了する
        // given (前提条件):
        let fixture = Fixture::new();
        let (alice, rx) = fixture.connect().await;
        fixture.hub.join(alice.id(), group("room1")).await.unwrap();
        let writer = tokio::spawn(write_loop(
            alice.id(),
            rx,
            stalled_sink(),
            Duration::from_millis(20),
        ));

        // when (操作):
        fixture
            .hub
            .broadcast(
                &decode_envelope(r#"{"type":"MESSAGE","senderId":"A","groupId":"room1","message":"hi"}"#)
                    .unwrap(),
            )
            .await;

        // then (期待する結果):
        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("write loop kept waiting on a stalled socket")
            .unwrap();
    }
}
