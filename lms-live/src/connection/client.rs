//! WebSocket connection client
//!
//! One authenticated socket per client. A background session task owns the
//! socket: it forwards outbound commands, dispatches inbound frames to the
//! [`EventRegistry`], and on an unexpected drop reconnects with exponential
//! backoff. After every successful reconnect the tracked-job interest set is
//! re-sent so the server resumes progress pushes.
//!
//! Authentication failures (HTTP 401/403 on the handshake or an `auth_error`
//! frame) end the session without retrying.

use super::backoff::ReconnectPolicy;
use super::state::{ConnectionPhase, ConnectionState};
use crate::error::ConnectionError;
use crate::registry::EventRegistry;
use futures::{SinkExt, StreamExt};
use indexmap::IndexMap;
use lms_common::{Frame, LiveEvent, OutboundCommand};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on a single handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct Credentials {
    user_id: String,
    token: String,
}

/// State shared between the client handle and its session task
struct Shared {
    state: RwLock<ConnectionState>,
    phase_tx: watch::Sender<ConnectionPhase>,
    /// job_id -> content_id, kept in tracking order
    interest: Mutex<IndexMap<String, String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<OutboundCommand>>>,
}

impl Shared {
    fn set_phase(&self, phase: ConnectionPhase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            debug!("Connection phase {} -> {}", previous, phase);
        }
    }

    fn mark_connected(&self) {
        {
            let mut state = self.state.write();
            state.connected = true;
            state.reconnect_attempts = 0;
            state.last_error = None;
        }
        self.set_phase(ConnectionPhase::Connected);
    }

    fn note_retry(&self, attempt: u32, error: &ConnectionError) {
        {
            let mut state = self.state.write();
            state.connected = false;
            state.reconnect_attempts = attempt;
            state.last_error = Some(error.to_string());
        }
        self.set_phase(ConnectionPhase::Reconnecting);
    }

    fn fail(&self, phase: ConnectionPhase, error: &ConnectionError) {
        {
            let mut state = self.state.write();
            state.connected = false;
            state.last_error = Some(error.to_string());
        }
        *self.outbound.lock() = None;
        self.set_phase(phase);
    }

    fn send(&self, command: OutboundCommand) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }
}

struct Session {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Everything the session task needs besides the socket itself
#[derive(Clone)]
struct SessionContext {
    endpoint: String,
    credentials: Credentials,
    policy: ReconnectPolicy,
    registry: EventRegistry,
    shared: Arc<Shared>,
}

enum SessionEnd {
    Cancelled,
    AuthRejected(String),
    Dropped(String),
}

/// Client for the live analysis channel
pub struct ConnectionClient {
    endpoint: String,
    policy: ReconnectPolicy,
    registry: EventRegistry,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl ConnectionClient {
    /// `endpoint` is the full WebSocket URL including the namespace
    pub fn new(endpoint: impl Into<String>, policy: ReconnectPolicy, registry: EventRegistry) -> Self {
        let (phase_tx, _) = watch::channel(ConnectionPhase::Disconnected);
        Self {
            endpoint: endpoint.into(),
            policy,
            registry,
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::default()),
                phase_tx,
                interest: Mutex::new(IndexMap::new()),
                outbound: Mutex::new(None),
            }),
            session: Mutex::new(None),
        }
    }

    /// Open the connection for `user_id`
    ///
    /// Resolves once the socket is open, retrying transport failures up to
    /// the policy bound. Any existing session is closed first.
    pub async fn connect(&self, user_id: &str, token: &str) -> Result<(), ConnectionError> {
        if token.trim().is_empty() {
            let err = ConnectionError::MissingToken;
            self.shared.state.write().last_error = Some(err.to_string());
            warn!("Connect for user {} refused: no token", user_id);
            return Err(err);
        }

        self.disconnect();
        let cancel = CancellationToken::new();
        *self.session.lock() = Some(Session {
            cancel: cancel.clone(),
            handle: None,
        });

        let context = SessionContext {
            endpoint: self.endpoint.clone(),
            credentials: Credentials {
                user_id: user_id.to_string(),
                token: token.to_string(),
            },
            policy: self.policy.clone(),
            registry: self.registry.clone(),
            shared: self.shared.clone(),
        };

        info!("Connecting to {} as {}", self.endpoint, user_id);
        self.shared.set_phase(ConnectionPhase::Connecting);
        let ws = match establish(&context, &cancel).await {
            Ok(ws) => ws,
            Err(ConnectionError::Cancelled) => return Err(ConnectionError::Cancelled),
            Err(err) => {
                let phase = match err {
                    ConnectionError::Auth(_) => ConnectionPhase::AuthFailed,
                    ConnectionError::Exhausted { .. } => ConnectionPhase::Offline,
                    _ => ConnectionPhase::Disconnected,
                };
                error!("Connection to {} failed: {}", self.endpoint, err);
                self.shared.fail(phase, &err);
                return Err(err);
            }
        };
        if cancel.is_cancelled() {
            return Err(ConnectionError::Cancelled);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.outbound.lock() = Some(tx);
        self.shared.mark_connected();
        info!("Connected to {}", self.endpoint);

        let handle = tokio::spawn(run_session(ws, rx, context, cancel.clone()));
        match self.session.lock().as_mut() {
            Some(session) if !session.cancel.is_cancelled() => session.handle = Some(handle),
            _ => handle.abort(),
        }
        Ok(())
    }

    /// Close the connection and reset state; tracked interest is kept
    pub fn disconnect(&self) {
        if let Some(session) = self.session.lock().take() {
            session.cancel.cancel();
        }
        *self.shared.outbound.lock() = None;
        let previous = std::mem::take(&mut *self.shared.state.write());
        self.shared.set_phase(ConnectionPhase::Disconnected);
        if previous.connected {
            info!("Disconnected from {}", self.endpoint);
        }
    }

    /// Disconnect and forget all tracked interest
    pub fn shutdown(&self) {
        self.disconnect();
        self.shared.interest.lock().clear();
    }

    pub fn status(&self) -> ConnectionState {
        self.shared.state.read().clone()
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.shared.phase_tx.borrow()
    }

    /// Receiver that observes every phase change
    pub fn watch_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.shared.phase_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.read().connected
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Register interest in `job_id` and ask the server for its pushes
    ///
    /// Interest survives reconnects; when offline it is sent on the next
    /// successful connect.
    pub fn track_progress(&self, job_id: &str, content_id: &str) {
        self.shared
            .interest
            .lock()
            .insert(job_id.to_string(), content_id.to_string());
        let sent = self.shared.send(OutboundCommand::TrackProgress {
            job_id: job_id.to_string(),
            content_id: content_id.to_string(),
        });
        debug!("track_progress {} (sent now: {})", job_id, sent);
    }

    pub fn stop_tracking(&self, job_id: &str) {
        self.shared.interest.lock().shift_remove(job_id);
        self.shared.send(OutboundCommand::StopTracking {
            job_id: job_id.to_string(),
        });
    }

    /// Ask the server for an `analytics_update`; requires a live connection
    pub fn request_analytics(&self, filters: serde_json::Value) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        if self.shared.send(OutboundCommand::RequestAnalytics { filters }) {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected)
        }
    }

    /// Tracked jobs in registration order
    pub fn interest(&self) -> Vec<(String, String)> {
        self.shared
            .interest
            .lock()
            .iter()
            .map(|(job, content)| (job.clone(), content.clone()))
            .collect()
    }
}

impl Drop for ConnectionClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.lock().take() {
            session.cancel.cancel();
            if let Some(handle) = session.handle {
                handle.abort();
            }
        }
    }
}

/// Open the socket, retrying transport failures with backoff
async fn establish(
    context: &SessionContext,
    cancel: &CancellationToken,
) -> Result<WsStream, ConnectionError> {
    let mut attempts = 0;
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            result = open_socket(&context.endpoint, &context.credentials) => result,
        };

        let err = match result {
            Ok(ws) => return Ok(ws),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        if attempts >= context.policy.max_attempts {
            return Err(ConnectionError::Exhausted {
                attempts,
                last_error: err.to_string(),
            });
        }
        attempts += 1;
        context.shared.note_retry(attempts, &err);

        let delay = context.policy.delay_for(attempts);
        warn!(
            "Connection attempt failed ({}); retry {}/{} in {:?}",
            err, attempts, context.policy.max_attempts, delay
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn open_socket(endpoint: &str, credentials: &Credentials) -> Result<WsStream, ConnectionError> {
    let url = reqwest::Url::parse_with_params(endpoint, &[("userId", credentials.user_id.as_str())])
        .map_err(|e| ConnectionError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectionError::InvalidEndpoint(e.to_string()))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.token))
        .map_err(|_| ConnectionError::Auth("token contains characters not allowed in a header".to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (ws, response) = match tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(request)).await {
        Ok(result) => result.map_err(classify)?,
        Err(_) => {
            return Err(ConnectionError::Transport(format!(
                "handshake timed out after {:?}",
                HANDSHAKE_TIMEOUT
            )))
        }
    };
    debug!("Handshake with {} complete ({})", endpoint, response.status());
    Ok(ws)
}

fn classify(err: tokio_tungstenite::tungstenite::Error) -> ConnectionError {
    use tokio_tungstenite::tungstenite::Error as WsError;

    match err {
        WsError::Http(response) => {
            let status = response.status();
            match status.as_u16() {
                401 | 403 => ConnectionError::Auth(format!("server returned {}", status)),
                _ => ConnectionError::Transport(format!("HTTP error {}", status)),
            }
        }
        WsError::Url(e) => ConnectionError::InvalidEndpoint(e.to_string()),
        other => ConnectionError::Transport(other.to_string()),
    }
}

async fn run_session(
    mut ws: WsStream,
    mut commands: mpsc::UnboundedReceiver<OutboundCommand>,
    context: SessionContext,
    cancel: CancellationToken,
) {
    loop {
        let end = match resubscribe(&mut ws, &context.shared).await {
            Ok(()) => pump(&mut ws, &mut commands, &context.registry, &cancel).await,
            Err(reason) => SessionEnd::Dropped(reason),
        };

        match end {
            SessionEnd::Cancelled => {
                let _ = ws.close(None).await;
                break;
            }
            SessionEnd::AuthRejected(message) => {
                let err = ConnectionError::Auth(message);
                error!("Session ended: {}", err);
                context.shared.fail(ConnectionPhase::AuthFailed, &err);
                let _ = ws.close(None).await;
                break;
            }
            SessionEnd::Dropped(reason) => {
                if cancel.is_cancelled() {
                    break;
                }
                warn!("Connection lost: {}", reason);
                {
                    let mut state = context.shared.state.write();
                    state.connected = false;
                    state.last_error = Some(reason);
                }
                context.shared.set_phase(ConnectionPhase::Reconnecting);

                match establish(&context, &cancel).await {
                    Ok(next) => {
                        ws = next;
                        context.shared.mark_connected();
                        info!("Reconnected to {}", context.endpoint);
                    }
                    Err(ConnectionError::Cancelled) => break,
                    Err(err) => {
                        let phase = match err {
                            ConnectionError::Auth(_) => ConnectionPhase::AuthFailed,
                            _ => ConnectionPhase::Offline,
                        };
                        error!("Giving up on {}: {}", context.endpoint, err);
                        context.shared.fail(phase, &err);
                        break;
                    }
                }
            }
        }
    }
    debug!("Session task for {} finished", context.credentials.user_id);
}

/// Re-send the full interest set on a fresh socket
async fn resubscribe(ws: &mut WsStream, shared: &Shared) -> Result<(), String> {
    let interest: Vec<(String, String)> = shared
        .interest
        .lock()
        .iter()
        .map(|(job, content)| (job.clone(), content.clone()))
        .collect();

    for (job_id, content_id) in &interest {
        let command = OutboundCommand::TrackProgress {
            job_id: job_id.clone(),
            content_id: content_id.clone(),
        };
        send_command(ws, &command).await?;
    }
    if !interest.is_empty() {
        info!("Re-sent interest for {} tracked jobs", interest.len());
    }
    Ok(())
}

async fn send_command(ws: &mut WsStream, command: &OutboundCommand) -> Result<(), String> {
    let text = command
        .to_text()
        .map_err(|e| format!("encode {} failed: {}", command.name(), e))?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| format!("send {} failed: {}", command.name(), e))
}

async fn pump(
    ws: &mut WsStream,
    commands: &mut mpsc::UnboundedReceiver<OutboundCommand>,
    registry: &EventRegistry,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            command = commands.recv() => match command {
                Some(command) => {
                    if let Err(reason) = send_command(ws, &command).await {
                        return SessionEnd::Dropped(reason);
                    }
                }
                None => return SessionEnd::Cancelled,
            },
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reason) = handle_text(text.as_str(), registry) {
                        return SessionEnd::AuthRejected(reason);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("server closed connection ({}): {}", f.code, f.reason))
                        .unwrap_or_else(|| "server closed connection".to_string());
                    return SessionEnd::Dropped(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                None => return SessionEnd::Dropped("stream ended".to_string()),
            },
        }
    }
}

/// Decode and dispatch one text frame; returns the reason on `auth_error`
fn handle_text(text: &str, registry: &EventRegistry) -> Option<String> {
    let frame = match Frame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Dropping malformed frame: {}", e);
            return None;
        }
    };

    let event = match LiveEvent::from_frame(frame) {
        Ok(event) => event,
        Err(e) => {
            warn!("Dropping undecodable event: {}", e);
            return None;
        }
    };

    let delivered = registry.dispatch(&event);
    debug!("'{}' delivered to {} subscribers", event.event_name(), delivered);

    match event {
        LiveEvent::AuthError { message } => Some(message),
        _ => None,
    }
}
