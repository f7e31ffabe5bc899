//! Session relay: attaches a runtime stream to a client transport and pumps
//! data both ways until the first termination trigger wins.

use std::sync::Arc;

use container_relay_core::{
    AttachFailure, ClientMessage, CloseReason, ControlAction, OpenRequest, RelayError,
    RuntimeClient, RuntimeError, RuntimeEvent, RuntimeStream, ServerMessage, SessionId,
    SessionInfo, SessionKind, Transport, TransportEvent, TransportEvents, Utf8Decoder,
};
use futures::{StreamExt, stream::BoxStream};
use tokio::sync::{Mutex, watch};
use tracing::Instrument;
use uuid::Uuid;

use crate::{lifecycle::SessionLifecycle, registry::SessionRegistry};

/// What drove a session into teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationTrigger {
    /// The remote process exited or the log source closed.
    RemoteEnd,
    /// The runtime stream failed.
    StreamFault(String),
    /// The client went away.
    ClientDisconnect,
    /// The client asked to kill the remote process.
    Kill,
}

impl TerminationTrigger {
    /// The error this trigger represents, if the session did not end cleanly.
    #[must_use]
    pub fn error(&self) -> Option<RelayError> {
        match self {
            Self::RemoteEnd | Self::Kill => None,
            Self::StreamFault(message) => Some(RelayError::StreamFault(message.clone())),
            Self::ClientDisconnect => Some(RelayError::TransportLoss),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The runtime stream could not be attached; the session never became active.
    AttachFailed(AttachFailure),
    /// The session was active and has been torn down.
    Closed {
        id: SessionId,
        trigger: TerminationTrigger,
    },
}

/// Drives sessions over client transports.
///
/// Holds the runtime client handle and the shared registry; every call to
/// `serve` or `run` owns exactly one transport and at most one runtime stream.
#[derive(Clone)]
pub struct SessionRelay {
    runtime: Arc<dyn RuntimeClient>,
    registry: Arc<SessionRegistry>,
}

impl SessionRelay {
    /// Create a relay over a runtime client and a shared registry.
    #[must_use]
    pub fn new(runtime: Arc<dyn RuntimeClient>, registry: Arc<SessionRegistry>) -> Self {
        Self { runtime, registry }
    }

    /// The registry sessions are recorded in.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Wait for a session-open request on `transport`, then run the session.
    ///
    /// Malformed requests are reported and the client may retry. Returns
    /// `None` if the client leaves before a session was opened.
    pub async fn serve(
        &self,
        transport: Arc<dyn Transport>,
        mut events: TransportEvents,
    ) -> Option<SessionOutcome> {
        loop {
            let frame = match events.next().await {
                Some(TransportEvent::Frame(frame)) => frame,
                Some(TransportEvent::Disconnected) | None => {
                    tracing::debug!("Client left before opening a session");
                    transport.close(CloseReason::Normal).await;
                    return None;
                }
            };

            let misuse = match ClientMessage::parse(frame) {
                Ok(ClientMessage::Open(open)) => match open.validate() {
                    Ok(request) => return Some(self.run(request, transport, events).await),
                    Err(e) => e.to_string(),
                },
                Ok(_) => "no session is open".to_string(),
                Err(e) => e.to_string(),
            };
            report_misuse(transport.as_ref(), misuse).await;
        }
    }

    /// Run one validated session to completion.
    pub async fn run(
        &self,
        request: OpenRequest,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
    ) -> SessionOutcome {
        let id = Uuid::new_v4();
        let span = tracing::info_span!(
            "session",
            session_id = %id,
            kind = %request.kind,
            target = %request.target,
        );
        self.run_session(id, request, transport, events)
            .instrument(span)
            .await
    }

    async fn run_session(
        &self,
        id: SessionId,
        request: OpenRequest,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
    ) -> SessionOutcome {
        let lifecycle = SessionLifecycle::new();

        let attached = match (request.kind, request.command.as_deref()) {
            (SessionKind::InteractiveCommand, Some(command)) => {
                self.runtime.open_exec_stream(&request.target, command).await
            }
            (SessionKind::InteractiveCommand, None) => Err(AttachFailure::NotFound(
                "no command given for interactive session".to_string(),
            )),
            (SessionKind::LogTail, _) => self.runtime.open_log_stream(&request.target).await,
        };

        let attachment = match attached {
            Ok(attachment) => attachment,
            Err(failure) => {
                lifecycle.abort_opening();
                tracing::warn!("Attach failed: {failure}");
                if transport.is_connected() {
                    let msg = ServerMessage::error(RelayError::Attach(failure.clone()));
                    if let Err(e) = transport.send(msg).await {
                        tracing::debug!("Dropped attach error: {e}");
                    }
                }
                transport.close(CloseReason::Error).await;
                return SessionOutcome::AttachFailed(failure);
            }
        };

        self.registry.register(SessionInfo::new(
            id,
            request.kind,
            request.target,
            request.command,
        ));
        lifecycle.activate();
        tracing::info!("Session active");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = Arc::new(ActiveSession {
            id,
            kind: request.kind,
            lifecycle,
            registry: Arc::clone(&self.registry),
            transport: Mutex::new(Some(transport)),
            stream: Mutex::new(Some(attachment.stream)),
            trigger: std::sync::OnceLock::new(),
            shutdown: shutdown_tx,
        });

        session.send(ServerMessage::Session(id)).await;

        let runtime_pump = tokio::spawn(
            Arc::clone(&session)
                .pump_runtime(attachment.events, shutdown_rx.clone())
                .in_current_span(),
        );
        session.pump_client(events, shutdown_rx).await;
        if let Err(e) = runtime_pump.await {
            tracing::error!("Runtime pump task failed: {e}");
            // The pump may have died before claiming teardown.
            session
                .terminate(TerminationTrigger::StreamFault(e.to_string()))
                .await;
        }

        let trigger = session
            .trigger
            .get()
            .cloned()
            .unwrap_or(TerminationTrigger::ClientDisconnect);
        tracing::info!(?trigger, "Session closed");
        SessionOutcome::Closed { id, trigger }
    }
}

async fn report_misuse(transport: &dyn Transport, message: String) {
    tracing::warn!("Protocol misuse: {message}");
    let msg = ServerMessage::error(RelayError::ProtocolMisuse(message));
    if let Err(e) = transport.send(msg).await {
        tracing::debug!("Dropped protocol error: {e}");
    }
}

/// Resources and state of a session past `Opening`.
struct ActiveSession {
    id: SessionId,
    kind: SessionKind,
    lifecycle: SessionLifecycle,
    registry: Arc<SessionRegistry>,
    /// Taken exactly once, during teardown.
    transport: Mutex<Option<Arc<dyn Transport>>>,
    /// Taken exactly once, during teardown.
    stream: Mutex<Option<Box<dyn RuntimeStream>>>,
    trigger: std::sync::OnceLock<TerminationTrigger>,
    shutdown: watch::Sender<bool>,
}

impl ActiveSession {
    /// Send to the client while the transport is still owned.
    async fn send(&self, msg: ServerMessage) {
        let transport = self.transport.lock().await;
        if let Some(transport) = transport.as_ref() {
            if let Err(e) = transport.send(msg).await {
                tracing::debug!("Dropped outbound message: {e}");
            }
        }
    }

    async fn send_data(&self, text: String) {
        if text.is_empty() || !self.lifecycle.is_active() {
            return;
        }
        self.send(ServerMessage::Data(text)).await;
    }

    async fn write(&self, data: &[u8]) -> Result<(), RuntimeError> {
        match self.stream.lock().await.as_ref() {
            Some(stream) => stream.write(data).await,
            None => Err(RuntimeError::Closed),
        }
    }

    async fn control(&self, action: ControlAction) -> Result<(), RuntimeError> {
        let stream = self.stream.lock().await;
        let Some(stream) = stream.as_ref() else {
            return Err(RuntimeError::Closed);
        };
        match action {
            ControlAction::Detach => stream.write_detach().await,
            ControlAction::Resize { cols, rows } => stream.resize(cols, rows).await,
            // Kill is a termination trigger, handled by `terminate`.
            ControlAction::Kill => Ok(()),
        }
    }

    /// Relay runtime output to the client until the stream ends or teardown starts.
    async fn pump_runtime(
        self: Arc<Self>,
        mut events: BoxStream<'static, RuntimeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut decoder = Utf8Decoder::new();
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => return,
                event = events.next() => event,
            };

            match event {
                Some(RuntimeEvent::Data(chunk)) => {
                    self.send_data(decoder.feed(&chunk)).await;
                }
                Some(RuntimeEvent::End) | None => {
                    self.send_data(decoder.finish()).await;
                    self.terminate(TerminationTrigger::RemoteEnd).await;
                    return;
                }
                Some(RuntimeEvent::Error(e)) => {
                    self.send_data(decoder.finish()).await;
                    self.terminate(TerminationTrigger::StreamFault(e)).await;
                    return;
                }
            }
        }
    }

    /// Relay client frames to the runtime until the client leaves or teardown starts.
    async fn pump_client(&self, mut events: TransportEvents, mut shutdown: watch::Receiver<bool>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => return,
                event = events.next() => event,
            };

            let frame = match event {
                Some(TransportEvent::Frame(frame)) => frame,
                Some(TransportEvent::Disconnected) | None => {
                    self.terminate(TerminationTrigger::ClientDisconnect).await;
                    return;
                }
            };

            if !self.kind.accepts_input() {
                tracing::trace!("Ignoring client frame on log session");
                continue;
            }

            let result = match ClientMessage::parse(frame) {
                Ok(ClientMessage::Input(data)) => self.write(&data).await,
                Ok(ClientMessage::Control(ControlAction::Kill)) => {
                    self.terminate(TerminationTrigger::Kill).await;
                    return;
                }
                Ok(ClientMessage::Control(action)) => {
                    tracing::debug!(?action, "Control action");
                    self.control(action).await
                }
                Ok(ClientMessage::Open(_)) => {
                    self.report_misuse("a session is already open".to_string())
                        .await;
                    Ok(())
                }
                Err(e) => {
                    self.report_misuse(e.to_string()).await;
                    Ok(())
                }
            };

            if let Err(e) = result {
                tracing::warn!("Runtime write failed: {e}");
                self.terminate(TerminationTrigger::StreamFault(e.to_string()))
                    .await;
                return;
            }
        }
    }

    async fn report_misuse(&self, message: String) {
        let transport = self.transport.lock().await;
        if let Some(transport) = transport.as_ref() {
            report_misuse(transport.as_ref(), message).await;
        }
    }

    /// Tear the session down if no other trigger got here first.
    ///
    /// Returns `false` without touching any resource when teardown was
    /// already claimed.
    async fn terminate(&self, trigger: TerminationTrigger) -> bool {
        if !self.lifecycle.begin_termination() {
            tracing::debug!(?trigger, "Termination already initiated");
            return false;
        }
        tracing::info!(?trigger, "Session terminating");
        let _ = self.trigger.set(trigger.clone());
        // Stop the other pump; nobody else touches the resources from here.
        self.shutdown.send_replace(true);

        if let Some(stream) = self.stream.lock().await.take() {
            if trigger == TerminationTrigger::Kill {
                if let Err(e) = stream.write_interrupt().await {
                    tracing::debug!("Failed to write interrupt: {e}");
                }
            }
            if let Err(e) = stream.close().await {
                tracing::debug!("Failed to close runtime stream: {e}");
            }
        }

        if !self.registry.unregister(self.id) {
            tracing::error!("Session was not registered at teardown");
            debug_assert!(false, "session {} unregistered twice", self.id);
        }

        if let Some(transport) = self.transport.lock().await.take() {
            match trigger.error() {
                Some(error) if error.is_reportable() => {
                    if transport.is_connected() {
                        if let Err(e) = transport.send(ServerMessage::error(error)).await {
                            tracing::debug!("Dropped final error: {e}");
                        }
                    }
                    transport.close(CloseReason::Error).await;
                }
                // Client disconnects are never reported.
                Some(_) | None => transport.close(CloseReason::Normal).await,
            }
        }

        self.lifecycle.finish();
        true
    }
}

