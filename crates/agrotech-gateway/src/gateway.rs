//! Main Gateway implementation
//!
//! HTTP endpoints plus the `/ws` channel that streams analysis progress.
//! Each WebSocket connection runs three tasks. A reader keeps draining the
//! socket and queues text frames, the connection task runs queued scenarios
//! strictly in arrival order, and a forwarder writes outbound events. A close
//! frame, a read error or a failed write cancels the session, so a running
//! pipeline stops before its next stage.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use agrotech_agents::{AgentPanel, LlmTransport, OllamaClient};
use agrotech_core::{InboundMessage, OutboundEvent, ParserConfig, ResponseParser};

use crate::config::GatewayConfig;
use crate::session::{SessionId, SessionManager};
use crate::{GatewayError, Result};

/// Gateway state shared across handlers
#[derive(Clone)]
pub struct GatewayState {
    pub config: GatewayConfig,
    pub transport: Arc<dyn LlmTransport>,
    pub panel: AgentPanel,
    pub session_manager: Arc<SessionManager>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl GatewayState {
    /// State backed by the Ollama server named in `config`
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = OllamaClient::new(config.ollama.to_transport_config())?;
        Ok(Self::with_transport(config, Arc::new(client)))
    }

    /// State backed by any transport
    pub fn with_transport(config: GatewayConfig, transport: Arc<dyn LlmTransport>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        let parser = ResponseParser::new(ParserConfig {
            partial_recovery: config.pipeline.partial_recovery,
            ..ParserConfig::default()
        });
        let panel = AgentPanel::new(transport.clone())
            .with_parser(parser)
            .with_stage_delay(config.stage_delay());

        Self {
            session_manager: Arc::new(SessionManager::new(
                config.max_connections,
                config.session.history_limit,
            )),
            config,
            transport,
            panel,
            shutdown_tx,
        }
    }
}

/// Main Gateway
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Create a new gateway with configuration
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Ok(Self::from_state(GatewayState::new(config)?))
    }

    pub fn from_state(state: GatewayState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Get gateway state
    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// Build the Axum router
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/", get(Self::handle_index))
            .route("/ws", get(Self::handle_ws_upgrade))
            .route("/health", get(Self::handle_health))
            .route("/status", get(Self::handle_status))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the gateway server
    pub async fn start(&self) -> Result<()> {
        let addr = self.state.config.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(&self, listener: tokio::net::TcpListener) -> Result<()> {
        let router = self.build_router();
        let mut shutdown_rx = self.state.shutdown_tx.subscribe();

        tracing::info!(
            "🌾 AgroTech gateway listening on {} (model {})",
            listener.local_addr()?,
            self.state.transport.model_name()
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        Ok(())
    }

    /// Shutdown the gateway
    pub fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(());
        tracing::info!("Gateway shutdown initiated");
    }

    // HTTP handlers

    async fn handle_index(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
        Json(serde_json::json!({
            "message": "AgroTech AI Agents - Powered by Ollama",
            "model": state.transport.model_name(),
            "version": crate::VERSION,
            "endpoints": {
                "websocket": "/ws",
                "health": "/health",
                "status": "/status"
            }
        }))
    }

    async fn handle_health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
        let reachable = state.transport.health_check().await;

        Json(serde_json::json!({
            "status": if reachable { "healthy" } else { "error" },
            "ollama": if reachable { "running" } else { "not_running" },
            "model": state.transport.model_name(),
        }))
    }

    async fn handle_status(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
        Json(serde_json::json!({
            "version": crate::VERSION,
            "sessions": state.session_manager.session_count(),
            "busy": state.session_manager.busy_count(),
            "active": state.session_manager.active_sessions(),
            "transport": state.transport.stats(),
        }))
    }

    async fn handle_ws_upgrade(
        ws: WebSocketUpgrade,
        State(state): State<Arc<GatewayState>>,
    ) -> Response {
        if !state.session_manager.has_capacity() {
            tracing::warn!("Rejecting WebSocket: connection limit reached");
            return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
        }
        ws.on_upgrade(move |socket| Self::handle_ws_connection(socket, state))
    }

    async fn handle_ws_connection(socket: WebSocket, state: Arc<GatewayState>) {
        let (mut tx, rx) = socket.split();
        let (outgoing_tx, mut outgoing_rx) =
            mpsc::channel::<OutboundEvent>(state.config.pipeline.event_buffer.max(1));

        let (session_id, cancel) = match state.session_manager.create_session() {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!("Refusing WebSocket: {}", e);
                let _ = tx
                    .send(Message::Text(OutboundEvent::error(e.to_string()).to_json()))
                    .await;
                let _ = tx.close().await;
                return;
            }
        };

        tracing::info!("WebSocket connected: {}", session_id);

        // Spawn outgoing message handler - forwards to WebSocket
        let forward_cancel = cancel.clone();
        let forward_id = session_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = outgoing_rx.recv().await {
                if tx.send(Message::Text(event.to_json())).await.is_err() {
                    tracing::debug!("Socket write failed for {}", forward_id);
                    forward_cancel.cancel();
                    break;
                }
            }
            let _ = tx.close().await;
            tracing::debug!("Outgoing handler stopped for {}", forward_id);
        });

        if state.transport.health_check().await {
            let _ = state
                .session_manager
                .update_session(&session_id, |s| s.activate());

            let (inbound_tx, inbound_rx) =
                mpsc::channel::<String>(state.config.pipeline.event_buffer.max(1));
            let reader = tokio::spawn(Self::receive_loop(
                rx,
                session_id.clone(),
                cancel.clone(),
                inbound_tx,
                outgoing_tx.clone(),
            ));

            Self::dispatch_loop(&state, &session_id, &cancel, &outgoing_tx, inbound_rx).await;

            reader.abort();
            let _ = reader.await;
        } else {
            tracing::warn!("Inference backend unreachable, closing {}", session_id);
            let _ = outgoing_tx
                .send(OutboundEvent::error(format!(
                    "No se puede conectar a Ollama. Asegúrate de que esté ejecutándose en {}",
                    state.config.ollama.url
                )))
                .await;
        }

        // Cleanup
        drop(outgoing_tx);
        let _ = forwarder.await;
        let _ = state.session_manager.end_session(&session_id);
        tracing::info!("WebSocket disconnected: {}", session_id);
    }

    /// Drain the socket into `inbound` until it closes or fails
    ///
    /// Always cancels the session on the way out.
    async fn receive_loop<S>(
        mut rx: S,
        session_id: SessionId,
        cancel: CancellationToken,
        inbound: mpsc::Sender<String>,
        outgoing: mpsc::Sender<OutboundEvent>,
    ) where
        S: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
    {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.next() => msg,
            };

            match msg {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(text).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!("Binary message ignored: {} bytes", data.len());
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("WebSocket closing: {}", session_id);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("WebSocket read error on {}: {}", session_id, e);
                    let _ = outgoing
                        .send(OutboundEvent::error(format!("Error en WebSocket: {}", e)))
                        .await;
                    break;
                }
            }
        }

        cancel.cancel();
    }

    /// Handle queued text frames one at a time, in arrival order
    async fn dispatch_loop(
        state: &Arc<GatewayState>,
        session_id: &SessionId,
        cancel: &CancellationToken,
        outgoing: &mpsc::Sender<OutboundEvent>,
        mut inbound: mpsc::Receiver<String>,
    ) {
        loop {
            let text = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                text = inbound.recv() => match text {
                    Some(text) => text,
                    None => break,
                },
            };

            if let Err(e) =
                Self::handle_text_message(state, session_id, cancel, outgoing, &text).await
            {
                tracing::error!("Error handling message on {}: {}", session_id, e);
            }
        }
    }

    async fn handle_text_message(
        state: &Arc<GatewayState>,
        session_id: &SessionId,
        cancel: &CancellationToken,
        outgoing: &mpsc::Sender<OutboundEvent>,
        text: &str,
    ) -> Result<()> {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Rejected message on {}: {}", session_id, e);
                outgoing
                    .send(OutboundEvent::from(e))
                    .await
                    .map_err(|_| GatewayError::WebSocket("outgoing channel closed".to_string()))?;
                return Ok(());
            }
        };

        let (pipeline, session) = state.panel.prepare(&message);
        let mut session = session.with_cancellation(cancel.child_token());
        let run_id = session.id();

        state
            .session_manager
            .update_session(session_id, |s| s.start_run(run_id, session.scenario()))?;

        let outcome = pipeline.run(&mut session, outgoing).await;

        state.session_manager.update_session(session_id, |s| match &outcome {
            Ok(()) => s.complete_run(run_id),
            Err(e) => s.fail_run(run_id, e.to_string()),
        })??;

        outcome.map_err(GatewayError::from)
    }
}

/// Client for connecting to an AgroTech Gateway
pub struct GatewayClient {
    url: String,
}

impl GatewayClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Connect to the gateway
    pub async fn connect(&self) -> Result<WebSocketConnection> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| GatewayError::WebSocket(e.to_string()))?;

        Ok(WebSocketConnection::new(ws_stream))
    }
}

/// WebSocket connection wrapper
pub struct WebSocketConnection {
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

impl WebSocketConnection {
    fn new(
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Self {
        Self { ws }
    }

    /// Send a message
    pub async fn send(&mut self, msg: &str) -> Result<()> {
        self.ws
            .send(tokio_tungstenite::tungstenite::Message::Text(msg.to_string()))
            .await
            .map_err(|e| GatewayError::WebSocket(e.to_string()))
    }

    /// Submit a text-described scenario
    pub async fn send_scenario(
        &mut self,
        image_description: &str,
        environment_description: &str,
    ) -> Result<()> {
        let message = serde_json::json!({
            "type": agrotech_core::protocol::CUSTOM_SCENARIO,
            "image_description": image_description,
            "environment_description": environment_description,
        });
        self.send(&message.to_string()).await
    }

    /// Receive a text message; `None` once the server closes
    pub async fn recv(&mut self) -> Result<Option<String>> {
        while let Some(msg) = self.ws.next().await {
            match msg {
                Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => return Ok(Some(text)),
                Ok(tokio_tungstenite::tungstenite::Message::Close(_)) => return Ok(None),
                Ok(_) => continue,
                Err(e) => return Err(GatewayError::WebSocket(e.to_string())),
            }
        }
        Ok(None)
    }

    /// Receive and decode the next event
    pub async fn recv_event(&mut self) -> Result<Option<OutboundEvent>> {
        match self.recv().await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Close the connection
    pub async fn close(&mut self) -> Result<()> {
        self.ws
            .close(None)
            .await
            .map_err(|e| GatewayError::WebSocket(e.to_string()))
    }
}
