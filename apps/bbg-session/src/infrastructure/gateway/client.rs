//! Gateway Provider
//!
//! [`ProviderPort`] over a WebSocket API gateway. `connect` performs the
//! handshake inline, then hands the socket to a background I/O task that
//! writes outbound frames, keeps the heartbeat, and translates inbound
//! frames into [`ProviderEvent`]s queued for `next_event`.
//!
//! Service-open acknowledgements never reach the event queue; they resolve
//! the waiting `open_service` call directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::auth::{AuthError, AuthHandler, AuthStep};
use super::codec::FrameCodec;
use super::heartbeat::{Heartbeat, HeartbeatAction};
use super::messages::{Inbound, Outbound};
use crate::application::ports::{ProviderError, ProviderPort};
use crate::domain::correlation::CorrelationId;
use crate::domain::event::{Payload, ProviderEvent, SessionStatus};
use crate::domain::query::Query;
use crate::domain::session::ProviderHandle;
use crate::infrastructure::config::{Credentials, HeartbeatSettings, SessionConfig, WireFormat};
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type ServiceWaiters = Arc<Mutex<HashMap<String, Vec<oneshot::Sender<Result<(), String>>>>>>;

/// How long `close` waits for the I/O task to say goodbye.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Handle reported when the gateway does not assign one.
const FALLBACK_HANDLE: &str = "gateway";

// =============================================================================
// Configuration
// =============================================================================

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// WebSocket URL.
    pub url: String,
    /// Application credentials, if the gateway requires them.
    pub credentials: Option<Credentials>,
    /// Outbound frame encoding.
    pub format: WireFormat,
    /// Bound on the handshake.
    pub auth_timeout: Duration,
    /// Bound on each `open_service`.
    pub service_timeout: Duration,
    /// Ping cadence and liveness timeout.
    pub heartbeat: HeartbeatSettings,
}

impl GatewayConfig {
    /// Derive gateway settings from a session configuration.
    #[must_use]
    pub fn from_session_config(config: &SessionConfig) -> Self {
        Self {
            url: config.endpoint.url(),
            credentials: config.credentials.clone(),
            format: config.format,
            auth_timeout: config.session.auth_timeout,
            service_timeout: config.session.connect_timeout,
            heartbeat: config.heartbeat.clone(),
        }
    }
}

// =============================================================================
// Provider
// =============================================================================

#[derive(Debug)]
struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<ProviderEvent>,
    waiters: ServiceWaiters,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Link {
    fn send(&self, frame: Outbound) -> Result<(), ProviderError> {
        self.outbound
            .send(frame)
            .map_err(|_| ProviderError::Transport("gateway link closed".into()))
    }
}

/// WebSocket gateway provider.
#[derive(Debug)]
pub struct GatewayProvider {
    config: GatewayConfig,
    codec: FrameCodec,
    link: Option<Link>,
}

impl GatewayProvider {
    /// Provider for the endpoint in `config`. Nothing is dialled until
    /// `connect`.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_config(GatewayConfig::from_session_config(config))
    }

    /// Provider with explicit gateway settings.
    #[must_use]
    pub fn with_config(config: GatewayConfig) -> Self {
        let codec = FrameCodec::for_format(config.format);
        Self {
            config,
            codec,
            link: None,
        }
    }

    fn link(&self) -> Result<&Link, ProviderError> {
        self.link.as_ref().ok_or(ProviderError::NotConnected)
    }
}

impl Drop for GatewayProvider {
    fn drop(&mut self) {
        if let Some(link) = &self.link {
            link.cancel.cancel();
        }
    }
}

#[async_trait]
impl ProviderPort for GatewayProvider {
    async fn connect(&mut self) -> Result<ProviderHandle, ProviderError> {
        if self.link.is_some() {
            return Err(ProviderError::Protocol("gateway already connected".into()));
        }

        // Another component may have installed a provider already.
        let _ = rustls::crypto::ring::default_provider().install_default();

        tracing::debug!(url = %self.config.url, "Connecting to gateway");
        let (stream, _response) = tokio_tungstenite::connect_async(self.config.url.as_str())
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let handle = tokio::time::timeout(
            self.config.auth_timeout,
            handshake(
                &mut write,
                &mut read,
                self.codec,
                self.config.credentials.clone(),
            ),
        )
        .await
        .map_err(|_| ProviderError::from(AuthError::Timeout))??;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let waiters = ServiceWaiters::default();
        let cancel = CancellationToken::new();

        let io = IoTask {
            codec: self.codec,
            outbound: outbound_rx,
            events: events_tx,
            waiters: Arc::clone(&waiters),
            cancel: cancel.clone(),
            heartbeat: Heartbeat::new(&self.config.heartbeat),
        };
        let task = tokio::spawn(io.run(write, read));

        self.link = Some(Link {
            outbound: outbound_tx,
            events: events_rx,
            waiters,
            cancel,
            task,
        });

        tracing::info!(url = %self.config.url, handle = %handle, "Gateway session established");
        Ok(ProviderHandle::new(handle))
    }

    async fn open_service(&mut self, service: &str) -> Result<(), ProviderError> {
        let rx = {
            let link = self.link()?;
            let (tx, rx) = oneshot::channel();
            link.waiters
                .lock()
                .entry(service.to_string())
                .or_default()
                .push(tx);
            link.send(Outbound::OpenService {
                service: service.to_string(),
            })?;
            rx
        };

        match tokio::time::timeout(self.config.service_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(ProviderError::ServiceUnavailable(format!(
                "{service}: {reason}"
            ))),
            Ok(Err(_)) => Err(ProviderError::Transport(
                "gateway link closed while opening service".into(),
            )),
            Err(_) => Err(ProviderError::ServiceUnavailable(format!(
                "{service}: timed out"
            ))),
        }
    }

    async fn send_request(
        &mut self,
        correlation_id: CorrelationId,
        query: &Query,
    ) -> Result<(), ProviderError> {
        self.link()?.send(Outbound::request(correlation_id, query))
    }

    async fn subscribe(
        &mut self,
        correlation_id: CorrelationId,
        topic: &str,
        fields: &[String],
    ) -> Result<(), ProviderError> {
        self.link()?
            .send(Outbound::subscribe(correlation_id, topic, fields))
    }

    async fn unsubscribe(&mut self, correlation_id: CorrelationId) -> Result<(), ProviderError> {
        self.link()?.send(Outbound::Unsubscribe {
            cid: correlation_id.value(),
        })
    }

    async fn next_event(
        &mut self,
        max_wait: Duration,
    ) -> Result<Option<ProviderEvent>, ProviderError> {
        let link = self.link.as_mut().ok_or(ProviderError::NotConnected)?;
        match tokio::time::timeout(max_wait, link.events.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Err(ProviderError::Transport("gateway link closed".into())),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        let Some(Link {
            cancel, mut task, ..
        }) = self.link.take()
        else {
            return Ok(());
        };
        cancel.cancel();

        match tokio::time::timeout(CLOSE_GRACE, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProviderError::Transport(e.to_string())),
            Err(_) => {
                task.abort();
                Err(ProviderError::Transport(
                    "gateway I/O task did not stop in time".into(),
                ))
            }
        }
    }
}

// =============================================================================
// Handshake
// =============================================================================

async fn handshake(
    write: &mut WsSink,
    read: &mut WsSource,
    codec: FrameCodec,
    credentials: Option<Credentials>,
) -> Result<String, ProviderError> {
    let mut auth = AuthHandler::new(credentials);

    while let Some(message) = read.next().await {
        let message = message.map_err(|e| ProviderError::Unreachable(e.to_string()))?;
        match message {
            Message::Close(_) => break,
            Message::Ping(data) => {
                write
                    .send(Message::Pong(data))
                    .await
                    .map_err(|e| ProviderError::Unreachable(e.to_string()))?;
                continue;
            }
            _ => {}
        }

        let frames = codec
            .decode(&message)
            .map_err(|e| ProviderError::Protocol(e.to_string()))?;
        for frame in frames {
            match frame {
                Inbound::Success { msg, handle } => match auth.on_success(msg, handle)? {
                    AuthStep::Send(reply) => send_frame(write, codec, &reply).await?,
                    AuthStep::Done => {
                        return Ok(auth
                            .handle()
                            .map_or_else(|| FALLBACK_HANDLE.to_string(), ToString::to_string));
                    }
                },
                Inbound::Error(frame) => return Err(auth.on_error(&frame).into()),
                other => tracing::debug!(?other, "Ignoring frame during handshake"),
            }
        }
    }

    Err(ProviderError::Unreachable(
        "gateway closed the connection during handshake".into(),
    ))
}

async fn send_frame(
    write: &mut WsSink,
    codec: FrameCodec,
    frame: &Outbound,
) -> Result<(), ProviderError> {
    let message = codec
        .encode(frame)
        .map_err(|e| ProviderError::Protocol(e.to_string()))?;
    write
        .send(message)
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))
}

// =============================================================================
// I/O Task
// =============================================================================

struct IoTask {
    codec: FrameCodec,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<ProviderEvent>,
    waiters: ServiceWaiters,
    cancel: CancellationToken,
    heartbeat: Heartbeat,
}

impl IoTask {
    async fn run(mut self, mut write: WsSink, mut read: WsSource) {
        let lost = self.pump(&mut write, &mut read).await;

        let pending: Vec<_> = self.waiters.lock().drain().collect();
        for (service, waiters) in pending {
            for waiter in waiters {
                let _ = waiter.send(Err(format!("{service}: gateway link closed")));
            }
        }

        match lost {
            None => {
                let _ = write.send(Message::Close(None)).await;
                tracing::debug!("Gateway link closed");
            }
            Some(reason) => {
                tracing::warn!(reason = %reason, "Gateway link lost");
                metrics::record_provider_error("link");
                let _ = self
                    .events
                    .send(ProviderEvent::session_status(SessionStatus::Lost));
            }
        }
    }

    /// Returns `None` on a requested shutdown, or the reason the link died.
    async fn pump(&mut self, write: &mut WsSink, read: &mut WsSource) -> Option<String> {
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return None,

                frame = self.outbound.recv() => {
                    let Some(frame) = frame else { return None };
                    tracing::trace!(action = frame.action(), "Sending gateway frame");
                    if let Err(e) = send_frame(write, self.codec, &frame).await {
                        return Some(e.to_string());
                    }
                }

                action = self.heartbeat.tick() => match action {
                    HeartbeatAction::SendPing => {
                        if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                            return Some(e.to_string());
                        }
                    }
                    HeartbeatAction::Expired => {
                        return Some(format!(
                            "no traffic for {}ms",
                            self.heartbeat.silence().as_millis()
                        ));
                    }
                },

                message = read.next() => match message {
                    Some(Ok(Message::Close(frame))) => {
                        return Some(format!("gateway sent close: {frame:?}"));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        self.heartbeat.record_activity();
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            return Some(e.to_string());
                        }
                    }
                    Some(Ok(message)) => {
                        self.heartbeat.record_activity();
                        self.handle_message(&message);
                    }
                    Some(Err(e)) => return Some(e.to_string()),
                    None => return Some("gateway stream ended".into()),
                },
            }
        }
    }

    fn handle_message(&self, message: &Message) {
        let frames = match self.codec.decode(message) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable gateway frame");
                metrics::record_provider_error("decode");
                return;
            }
        };

        for frame in frames {
            if let Some(event) = self.translate(frame) {
                // Receiver gone means the provider is closing.
                let _ = self.events.send(event);
            }
        }
    }

    fn translate(&self, frame: Inbound) -> Option<ProviderEvent> {
        match frame {
            Inbound::Partial { cid, data } => Some(ProviderEvent::response_data(
                CorrelationId::new(cid),
                Payload::from_messages(data),
            )),
            Inbound::Response { cid, data } => Some(ProviderEvent::response_complete(
                CorrelationId::new(cid),
                Payload::from_messages(data),
            )),
            Inbound::Data { cid, data } => Some(ProviderEvent::subscription_data(
                CorrelationId::new(cid),
                Payload::from_messages(data),
            )),
            Inbound::Status { status } => Some(ProviderEvent::session_status(status)),
            Inbound::Error(frame) => Some(ProviderEvent::error(
                frame.cid.map(CorrelationId::new),
                &frame.to_detail(),
            )),
            Inbound::Service {
                service,
                opened,
                msg,
            } => {
                let outcome = if opened {
                    Ok(())
                } else {
                    Err(msg.unwrap_or_else(|| "service not available".to_string()))
                };
                self.resolve_service(&service, &outcome);
                None
            }
            Inbound::Success { msg, .. } => {
                tracing::debug!(?msg, "Ignoring handshake frame after connect");
                None
            }
        }
    }

    fn resolve_service(&self, service: &str, outcome: &Result<(), String>) {
        let waiters = self.waiters.lock().remove(service).unwrap_or_default();
        if waiters.is_empty() {
            tracing::debug!(service, "Unsolicited service acknowledgement");
        }
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}
