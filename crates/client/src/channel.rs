//! One websocket connection shared by many concurrent callers.
//!
//! Outbound frames go through a single writer task fed by an mpsc queue.
//! Inbound frames are read by a single reader task that hands each JSON
//! object to the [`PendingTable`]. When the transport goes away every call
//! still in flight fails with [`Error::ConnectionClosed`].

use std::sync::{Arc, Once};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mc_domain::trace::TraceEvent;
use mc_domain::{Error, Result};
use mc_protocol::{action_of, correlation_id_of, Envelope, Reply};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::pending::PendingTable;
use crate::types::{ChannelSettings, ChannelState};

/// How long `close()` waits for each background task to wind down.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

struct Session {
    generation: u64,
    outbound: mpsc::Sender<String>,
    pending: Arc<PendingTable>,
    shutdown: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct Inner {
    state: ChannelState,
    generation: u64,
    session: Option<Session>,
}

/// A correlated request/response channel over one websocket.
pub struct CorrelatedChannel {
    settings: ChannelSettings,
    inner: Arc<Mutex<Inner>>,
}

impl CorrelatedChannel {
    pub fn new(settings: ChannelSettings) -> Self {
        Self {
            settings,
            inner: Arc::new(Mutex::new(Inner {
                state: ChannelState::Disconnected,
                generation: 0,
                session: None,
            })),
        }
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lock().state
    }

    /// Number of calls currently awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.inner
            .lock()
            .session
            .as_ref()
            .map_or(0, |s| s.pending.len())
    }

    /// Open the websocket at `url`, sending `headers` with the upgrade
    /// request.
    ///
    /// Fails with [`Error::AlreadyConnected`] when open and
    /// [`Error::AlreadyConnecting`] while another connect or a close is in
    /// progress. Any handshake failure yields [`Error::Connection`] and
    /// leaves the channel `Disconnected`.
    pub async fn connect(&self, url: &str, headers: &[(String, String)]) -> Result<()> {
        let request = build_request(url, headers)?;
        let guard = ConnectingGuard::begin(&self.inner)?;
        install_tls_provider();

        tracing::debug!(url = %redact_query(url), "opening websocket");
        let config = self.settings.websocket_config();
        let (ws, response) =
            tokio_tungstenite::connect_async_with_config(request, Some(config), false)
                .await
                .map_err(|e| Error::Connection(e.to_string()))?;
        tracing::debug!(status = %response.status(), "websocket upgrade accepted");

        guard.disarm();
        self.install(ws);
        Ok(())
    }

    /// Adopt an already-established websocket. The channel must be
    /// `Disconnected`.
    ///
    /// Build the stream with [`ChannelSettings::websocket_config`] so that
    /// large frames reach the `max_inbound_bytes` check instead of failing
    /// the transport.
    pub fn attach<S>(&self, ws: WebSocketStream<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        ConnectingGuard::begin(&self.inner)?.disarm();
        self.install(ws);
        Ok(())
    }

    /// Send `envelope` and wait for the matching reply.
    ///
    /// A `responseid` is attached if the envelope has none. The call's
    /// pending entry is removed if this future is dropped before it
    /// completes. The deadline covers queueing the frame as well as the
    /// wait for the reply.
    pub async fn call(&self, mut envelope: Envelope) -> Result<Reply> {
        let (outbound, pending) = {
            let inner = self.inner.lock();
            match (&inner.state, &inner.session) {
                (ChannelState::Open, Some(session)) => {
                    (session.outbound.clone(), session.pending.clone())
                }
                _ => return Err(Error::NotConnected),
            }
        };

        let correlation_id = envelope
            .correlation_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        let slot = pending.register(&correlation_id, &envelope.action)?;
        let _guard = AbandonGuard {
            pending: &pending,
            correlation_id: &correlation_id,
        };

        let frame = serde_json::to_string(&envelope)?;
        TraceEvent::CallIssued {
            action: envelope.action.clone(),
            correlation_id: correlation_id.clone(),
            in_flight: pending.len(),
        }
        .emit();

        let exchange = async {
            if outbound.send(frame).await.is_err() {
                return Err(Error::ConnectionClosed);
            }
            slot.await.unwrap_or(Err(Error::ConnectionClosed))
        };
        match self.settings.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, exchange).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    pending.remove(&correlation_id, "timed out");
                    Err(Error::Timeout(limit))
                }
            },
            None => exchange.await,
        }
    }

    /// Withdraw a pending call. A reply arriving later for this id is
    /// dropped. Returns `false` if no such call is pending.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        let pending = {
            let inner = self.inner.lock();
            match &inner.session {
                Some(session) => session.pending.clone(),
                None => return false,
            }
        };
        pending.remove(correlation_id, "cancelled by caller")
    }

    /// Close the connection and fail every outstanding call.
    ///
    /// A no-op when already `Disconnected`.
    pub async fn close(&self) -> Result<()> {
        let session = {
            let mut inner = self.inner.lock();
            match inner.state {
                ChannelState::Disconnected => return Ok(()),
                ChannelState::Connecting | ChannelState::Closing => {
                    return Err(Error::AlreadyConnecting)
                }
                ChannelState::Open => {
                    inner.state = ChannelState::Closing;
                    inner.session.take()
                }
            }
        };

        if let Some(session) = session {
            tracing::debug!(generation = session.generation, "closing channel");
            session.shutdown.cancel();
            join_with_grace(session.writer).await;
            join_with_grace(session.reader).await;
            let failed = session.pending.fail_all();
            if failed > 0 {
                tracing::debug!(failed, "failed calls still pending at close");
            }
        }

        self.inner.lock().state = ChannelState::Disconnected;
        Ok(())
    }

    fn install<S>(&self, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.settings.outbound_queue.max(1));
        let pending = Arc::new(PendingTable::new());
        let shutdown = CancellationToken::new();

        // The lock is held while spawning so a reader that exits at once
        // still finds its own session installed.
        let mut inner = self.inner.lock();
        inner.generation += 1;
        let generation = inner.generation;

        let writer = tokio::spawn(write_loop(sink, outbound_rx, shutdown.clone()));
        let reader = tokio::spawn(read_loop(ReaderContext {
            stream,
            pending: pending.clone(),
            shutdown: shutdown.clone(),
            max_inbound_bytes: self.settings.max_inbound_bytes,
            inner: self.inner.clone(),
            generation,
        }));

        inner.session = Some(Session {
            generation,
            outbound: outbound_tx,
            pending,
            shutdown,
            reader,
            writer,
        });
        inner.state = ChannelState::Open;
        tracing::debug!(generation, "channel open");
    }
}

impl Drop for CorrelatedChannel {
    fn drop(&mut self) {
        if let Some(session) = self.inner.lock().session.take() {
            session.shutdown.cancel();
            session.pending.fail_all();
        }
    }
}

// ── Guards ───────────────────────────────────────────────────────────

/// Holds the channel in `Connecting` until disarmed; resets it to
/// `Disconnected` if the connect attempt fails or its future is dropped.
struct ConnectingGuard<'a> {
    inner: &'a Mutex<Inner>,
    armed: bool,
}

impl<'a> ConnectingGuard<'a> {
    fn begin(inner: &'a Mutex<Inner>) -> Result<Self> {
        let mut locked = inner.lock();
        match locked.state {
            ChannelState::Disconnected => {
                locked.state = ChannelState::Connecting;
                Ok(Self { inner, armed: true })
            }
            ChannelState::Open => Err(Error::AlreadyConnected),
            ChannelState::Connecting | ChannelState::Closing => Err(Error::AlreadyConnecting),
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.inner.lock();
            if inner.state == ChannelState::Connecting {
                inner.state = ChannelState::Disconnected;
            }
        }
    }
}

/// Removes a call's pending entry when the awaiting future goes away.
/// Entries already resolved are gone, so this is a no-op on completion.
struct AbandonGuard<'a> {
    pending: &'a PendingTable,
    correlation_id: &'a str,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.correlation_id, "caller dropped");
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::warn!(error = %e, "websocket write failed");
                        shutdown.cancel();
                        break;
                    }
                }
                None => break,
            },
        }
    }
    // Sends a close frame when the transport is still usable.
    let _ = sink.close().await;
}

struct ReaderContext<S> {
    stream: SplitStream<WebSocketStream<S>>,
    pending: Arc<PendingTable>,
    shutdown: CancellationToken,
    max_inbound_bytes: usize,
    inner: Arc<Mutex<Inner>>,
    generation: u64,
}

async fn read_loop<S>(mut ctx: ReaderContext<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reason = loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break "closed locally".to_string(),
            frame = ctx.stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_text(&ctx.pending, &text, ctx.max_inbound_bytes);
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(f) => format!("closed by server ({}: {})", f.code, f.reason),
                        None => "closed by server".to_string(),
                    };
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(bytes = data.len(), "ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break format!("read error: {e}"),
                None => break "stream ended".to_string(),
            },
        }
    };

    ctx.shutdown.cancel();
    let failed_calls = ctx.pending.fail_all();
    {
        let mut inner = ctx.inner.lock();
        let current = inner
            .session
            .as_ref()
            .is_some_and(|s| s.generation == ctx.generation);
        if current {
            inner.session = None;
            inner.state = ChannelState::Disconnected;
        }
    }
    TraceEvent::ConnectionLost {
        reason,
        failed_calls,
    }
    .emit();
}

fn handle_text(pending: &PendingTable, text: &str, max_inbound_bytes: usize) {
    if text.len() > max_inbound_bytes {
        tracing::warn!(
            bytes = text.len(),
            max = max_inbound_bytes,
            "inbound frame exceeds max_inbound_bytes, dropping"
        );
        TraceEvent::MessageDropped {
            action: None,
            correlation_id: None,
            reason: "frame too large".into(),
        }
        .emit();
        return;
    }

    let message = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::debug!(kind = json_kind(&other), "ignoring non-object frame");
            TraceEvent::MessageDropped {
                action: None,
                correlation_id: None,
                reason: "not a JSON object".into(),
            }
            .emit();
            return;
        }
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unparseable frame");
            TraceEvent::MessageDropped {
                action: None,
                correlation_id: None,
                reason: "invalid JSON".into(),
            }
            .emit();
            return;
        }
    };

    tracing::trace!(
        action = action_of(&message).unwrap_or(""),
        correlation_id = correlation_id_of(&message).unwrap_or(""),
        "inbound message"
    );
    pending.dispatch(message);
}

// ── Helpers ──────────────────────────────────────────────────────────

fn build_request(
    url: &str,
    headers: &[(String, String)],
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Configuration(format!("invalid websocket url: {e}")))?;
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Configuration(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Configuration(format!("invalid value for header {name}: {e}")))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

/// `wss://` needs a process-wide rustls crypto provider.
fn install_tls_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means another provider is already installed, which is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

async fn join_with_grace(handle: JoinHandle<()>) {
    let abort = handle.abort_handle();
    if tokio::time::timeout(CLOSE_GRACE, handle).await.is_err() {
        abort.abort();
    }
}

/// Strip the query string so login tokens never reach the logs.
pub(crate) fn redact_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    type ServerSide = WebSocketStream<DuplexStream>;

    async fn pair(settings: ChannelSettings) -> (Arc<CorrelatedChannel>, ServerSide) {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let config = settings.websocket_config();
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, Some(config)).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let channel = Arc::new(CorrelatedChannel::new(settings));
        channel.attach(client).unwrap();
        (channel, server)
    }

    fn no_timeout() -> ChannelSettings {
        ChannelSettings {
            call_timeout: None,
            ..Default::default()
        }
    }

    async fn next_request(server: &mut ServerSide) -> Reply {
        loop {
            match server.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).unwrap();
                }
                Some(Ok(_)) => continue,
                other => panic!("server stream ended: {other:?}"),
            }
        }
    }

    async fn send(server: &mut ServerSide, value: serde_json::Value) {
        server.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn wait_for_in_flight(channel: &CorrelatedChannel, n: usize) {
        for _ in 0..200 {
            if channel.in_flight() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("in_flight never reached {n} (now {})", channel.in_flight());
    }

    #[tokio::test]
    async fn call_before_connect_is_rejected() {
        let channel = CorrelatedChannel::new(no_timeout());
        let err = channel.call(Envelope::new("meshes")).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn reply_with_matching_id_resolves_call() {
        let (channel, mut server) = pair(no_timeout()).await;
        assert_eq!(channel.state(), ChannelState::Open);

        let ch = channel.clone();
        let call = tokio::spawn(async move { ch.call(Envelope::new("serverinfo")).await });

        let req = next_request(&mut server).await;
        assert_eq!(req["action"], "serverinfo");
        let id = req["responseid"].as_str().unwrap().to_owned();
        assert_eq!(id.len(), 36);

        send(&mut server, json!({"action": "serverinfo", "responseid": id, "name": "srv"})).await;
        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply["name"], "srv");
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn scrambled_replies_reach_their_callers() {
        let (channel, mut server) = pair(no_timeout()).await;
        const N: usize = 16;

        let mut calls = Vec::new();
        for n in 0..N {
            let ch = channel.clone();
            calls.push(tokio::spawn(async move {
                let reply = ch
                    .call(Envelope::new("echo").with_field("n", n as u64))
                    .await
                    .unwrap();
                (n, reply)
            }));
        }

        let mut requests = Vec::new();
        for _ in 0..N {
            requests.push(next_request(&mut server).await);
        }
        requests.reverse();
        for req in requests {
            send(
                &mut server,
                json!({"action": "echo", "responseid": req["responseid"], "n": req["n"]}),
            )
            .await;
        }

        for call in calls {
            let (n, reply) = call.await.unwrap();
            assert_eq!(reply["n"], n as u64);
        }
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn id_less_replies_resolve_oldest_call_for_action() {
        let (channel, mut server) = pair(no_timeout()).await;

        let ch = channel.clone();
        let first = tokio::spawn(async move { ch.call(Envelope::new("meshes")).await });
        next_request(&mut server).await;

        let ch = channel.clone();
        let second = tokio::spawn(async move { ch.call(Envelope::new("meshes")).await });
        next_request(&mut server).await;

        // Unrelated event: dropped, nobody resolved.
        send(&mut server, json!({"action": "nodechange"})).await;
        send(&mut server, json!({"action": "meshes", "tag": "one"})).await;
        send(&mut server, json!({"action": "meshes", "tag": "two"})).await;

        assert_eq!(first.await.unwrap().unwrap()["tag"], "one");
        assert_eq!(second.await.unwrap().unwrap()["tag"], "two");
    }

    #[tokio::test]
    async fn server_close_fails_every_pending_call() {
        let (channel, mut server) = pair(no_timeout()).await;
        const K: usize = 5;

        let mut calls = Vec::new();
        for _ in 0..K {
            let ch = channel.clone();
            calls.push(tokio::spawn(async move { ch.call(Envelope::new("nodes")).await }));
        }
        for _ in 0..K {
            next_request(&mut server).await;
        }
        server.close(None).await.unwrap();
        drop(server);

        for call in calls {
            assert!(matches!(call.await.unwrap(), Err(Error::ConnectionClosed)));
        }
        for _ in 0..200 {
            if channel.state() == ChannelState::Disconnected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(matches!(
            channel.call(Envelope::new("nodes")).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn duplicate_correlation_id_is_rejected() {
        let (channel, mut server) = pair(no_timeout()).await;

        let ch = channel.clone();
        let first = tokio::spawn(async move {
            ch.call(Envelope::new("users").with_correlation_id("fixed")).await
        });
        next_request(&mut server).await;

        let err = channel
            .call(Envelope::new("users").with_correlation_id("fixed"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateCorrelationId(id) if id == "fixed"));

        send(&mut server, json!({"action": "users", "responseid": "fixed"})).await;
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn deadline_elapses_with_timeout_and_clears_entry() {
        let settings = ChannelSettings {
            call_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (channel, mut server) = pair(settings).await;

        let ch = channel.clone();
        let call = tokio::spawn(async move { ch.call(Envelope::new("serverinfo")).await });
        let req = next_request(&mut server).await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(50)));
        assert_eq!(channel.in_flight(), 0);

        // The late reply finds nobody and is dropped.
        send(&mut server, json!({"action": "serverinfo", "responseid": req["responseid"]})).await;
        assert_eq!(channel.state(), ChannelState::Open);
    }

    #[tokio::test]
    async fn cancelled_call_reply_is_dropped() {
        let (channel, mut server) = pair(no_timeout()).await;

        let ch = channel.clone();
        let cancelled = tokio::spawn(async move {
            ch.call(Envelope::new("meshes").with_correlation_id("c-1")).await
        });
        next_request(&mut server).await;
        assert!(channel.cancel("c-1"));
        assert!(!channel.cancel("c-1"));
        assert!(matches!(cancelled.await.unwrap(), Err(Error::Cancelled)));

        let ch = channel.clone();
        let later = tokio::spawn(async move { ch.call(Envelope::new("meshes")).await });
        let req = next_request(&mut server).await;

        // Stale reply carries the cancelled id: it must not claim `later`.
        send(&mut server, json!({"action": "meshes", "responseid": "c-1", "stale": true})).await;
        send(&mut server, json!({"action": "meshes", "responseid": req["responseid"]})).await;

        let reply = later.await.unwrap().unwrap();
        assert!(reply.get("stale").is_none());
    }

    #[tokio::test]
    async fn dropping_the_call_future_removes_its_entry() {
        let (channel, mut server) = pair(no_timeout()).await;

        let outcome =
            tokio::time::timeout(Duration::from_millis(30), channel.call(Envelope::new("nodes")))
                .await;
        assert!(outcome.is_err());
        next_request(&mut server).await;
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn close_fails_pending_and_sends_close_frame() {
        let (channel, mut server) = pair(no_timeout()).await;

        let ch = channel.clone();
        let call = tokio::spawn(async move { ch.call(Envelope::new("nodes")).await });
        next_request(&mut server).await;
        wait_for_in_flight(&channel, 1).await;

        channel.close().await.unwrap();
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(matches!(call.await.unwrap(), Err(Error::ConnectionClosed)));

        let saw_close = loop {
            match server.next().await {
                Some(Ok(Message::Close(_))) => break true,
                Some(Ok(_)) => continue,
                _ => break false,
            }
        };
        assert!(saw_close);

        // Idempotent once disconnected.
        channel.close().await.unwrap();
    }

    #[tokio::test]
    async fn attach_while_open_is_rejected() {
        let (channel, _server) = pair(no_timeout()).await;
        let (io, _other) = tokio::io::duplex(1024);
        let ws = WebSocketStream::from_raw_socket(io, Role::Client, None).await;
        assert!(matches!(channel.attach(ws), Err(Error::AlreadyConnected)));
        assert!(matches!(
            channel.connect("ws://127.0.0.1:1", &[]).await,
            Err(Error::AlreadyConnected)
        ));
    }

    #[tokio::test]
    async fn oversize_and_garbage_frames_are_dropped() {
        let settings = ChannelSettings {
            call_timeout: None,
            max_inbound_bytes: 128,
            ..Default::default()
        };
        let (channel, mut server) = pair(settings).await;

        let ch = channel.clone();
        let call = tokio::spawn(async move { ch.call(Envelope::new("users")).await });
        let req = next_request(&mut server).await;
        let id = req["responseid"].as_str().unwrap().to_owned();

        let padding = "x".repeat(256);
        send(&mut server, json!({"action": "users", "responseid": id, "pad": padding})).await;
        server.send(Message::Text("not json".into())).await.unwrap();
        server.send(Message::Text("[1,2,3]".into())).await.unwrap();
        send(&mut server, json!({"action": "users", "responseid": id, "ok": true})).await;

        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply["ok"], true);
    }

    #[tokio::test]
    async fn reply_larger_than_transport_default_resolves_call() {
        let (channel, mut server) = pair(no_timeout()).await;

        let ch = channel.clone();
        let call = tokio::spawn(async move { ch.call(Envelope::new("big")).await });
        let req = next_request(&mut server).await;

        // Over tungstenite's 16 MiB default frame cap, under max_inbound_bytes.
        let blob = "x".repeat(20 * 1024 * 1024);
        send(&mut server, json!({"action": "big", "responseid": req["responseid"], "blob": blob}))
            .await;

        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply["blob"].as_str().map(str::len), Some(20 * 1024 * 1024));
        assert_eq!(channel.state(), ChannelState::Open);
    }

    #[tokio::test]
    async fn deadline_covers_a_full_outbound_queue() {
        let settings = ChannelSettings {
            call_timeout: Some(Duration::from_millis(100)),
            outbound_queue: 1,
            ..Default::default()
        };
        // The peer never reads, so the writer stalls and the queue fills.
        let (client_io, _server_io) = tokio::io::duplex(64);
        let ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let channel = Arc::new(CorrelatedChannel::new(settings));
        channel.attach(ws).unwrap();

        let mut calls = Vec::new();
        for n in 0..4u64 {
            let ch = channel.clone();
            calls.push(tokio::spawn(async move {
                ch.call(Envelope::new("nodes").with_field("n", n)).await
            }));
        }
        for call in calls {
            let outcome = tokio::time::timeout(Duration::from_secs(2), call)
                .await
                .expect("call finished within its deadline")
                .unwrap();
            assert!(matches!(outcome, Err(Error::Timeout(d)) if d == Duration::from_millis(100)));
        }
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test]
    async fn second_connect_while_connecting_is_rejected() {
        // Accepts TCP but never answers the upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stalled = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let channel = Arc::new(CorrelatedChannel::new(no_timeout()));
        let ch = channel.clone();
        let url = format!("ws://{addr}/control.ashx");
        let first = tokio::spawn(async move { ch.connect(&url, &[]).await });

        for _ in 0..200 {
            if channel.state() == ChannelState::Connecting {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(channel.state(), ChannelState::Connecting);

        assert!(matches!(
            channel.connect(&format!("ws://{addr}/control.ashx"), &[]).await,
            Err(Error::AlreadyConnecting)
        ));
        let (io, _other) = tokio::io::duplex(1024);
        let ws = WebSocketStream::from_raw_socket(io, Role::Client, None).await;
        assert!(matches!(channel.attach(ws), Err(Error::AlreadyConnecting)));
        assert!(matches!(channel.close().await, Err(Error::AlreadyConnecting)));

        // Dropping the pending connect resets the state.
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(channel.state(), ChannelState::Disconnected);
        stalled.abort();
    }

    #[test]
    fn invalid_header_is_a_configuration_error() {
        let headers = vec![("bad header".to_string(), "v".to_string())];
        let err = build_request("ws://localhost/control.ashx", &headers).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn redaction_drops_query() {
        assert_eq!(
            redact_query("wss://h/control.ashx?auth=secret"),
            "wss://h/control.ashx"
        );
        assert_eq!(redact_query("ws://h/control.ashx"), "ws://h/control.ashx");
    }
}
