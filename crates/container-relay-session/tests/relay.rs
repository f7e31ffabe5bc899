//! End-to-end relay behavior against in-memory transport and runtime fakes.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use container_relay_core::{
    AttachFailure, ClientFrame, CloseReason, RuntimeAttachment, RuntimeClient, RuntimeError,
    RuntimeEvent, RuntimeStream, ServerMessage, SessionId, Target, Transport, TransportError,
    TransportEvent,
};
use container_relay_session::{
    RegistryStats, SessionOutcome, SessionRegistry, SessionRelay, TerminationTrigger,
};
use futures::StreamExt;
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamCall {
    Write(Vec<u8>),
    Interrupt,
    Detach,
    Resize(u16, u16),
    Close,
}

struct FakeTransport {
    sent: Mutex<Vec<ServerMessage>>,
    closes: Mutex<Vec<CloseReason>>,
    connected: AtomicBool,
}

impl FakeTransport {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    fn sent(&self) -> Vec<ServerMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Error(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn data(&self) -> String {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Data(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    fn session_id(&self) -> Option<SessionId> {
        self.sent().into_iter().find_map(|m| match m {
            ServerMessage::Session(id) => Some(id),
            _ => None,
        })
    }

    fn closes(&self) -> Vec<CloseReason> {
        self.closes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, msg: ServerMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }

    async fn close(&self, reason: CloseReason) {
        self.closes.lock().unwrap().push(reason);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct FakeStream {
    calls: Arc<Mutex<Vec<StreamCall>>>,
    fail_writes: bool,
}

impl FakeStream {
    fn record(&self, call: StreamCall) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(call);
        if self.fail_writes {
            return Err(RuntimeError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeStream for FakeStream {
    async fn write(&self, data: &[u8]) -> Result<(), RuntimeError> {
        self.record(StreamCall::Write(data.to_vec()))
    }

    async fn write_interrupt(&self) -> Result<(), RuntimeError> {
        self.record(StreamCall::Interrupt)
    }

    async fn write_detach(&self) -> Result<(), RuntimeError> {
        self.record(StreamCall::Detach)
    }

    async fn resize(&self, cols: u16, rows: u16) -> Result<(), RuntimeError> {
        self.record(StreamCall::Resize(cols, rows))
    }

    async fn close(&self) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(StreamCall::Close);
        Ok(())
    }
}

#[derive(Default)]
struct FakeRuntime {
    fail: Option<AttachFailure>,
    fail_writes: bool,
    calls: Arc<Mutex<Vec<StreamCall>>>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<RuntimeEvent>>>,
    opened: Mutex<Vec<(Target, Option<String>)>>,
}

impl FakeRuntime {
    fn failing(failure: AttachFailure) -> Self {
        Self {
            fail: Some(failure),
            ..Self::default()
        }
    }

    fn attach(&self, target: &Target, command: Option<&str>) -> Result<RuntimeAttachment, AttachFailure> {
        self.opened
            .lock()
            .unwrap()
            .push((target.clone(), command.map(str::to_string)));
        if let Some(failure) = &self.fail {
            return Err(failure.clone());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events_tx.lock().unwrap() = Some(tx);
        Ok(RuntimeAttachment {
            stream: Box::new(FakeStream {
                calls: Arc::clone(&self.calls),
                fail_writes: self.fail_writes,
            }),
            events: UnboundedReceiverStream::new(rx).boxed(),
        })
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = self.events_tx.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn calls(&self) -> Vec<StreamCall> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, call: &StreamCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn open_log_stream(&self, target: &Target) -> Result<RuntimeAttachment, AttachFailure> {
        self.attach(target, None)
    }

    async fn open_exec_stream(
        &self,
        target: &Target,
        command: &str,
    ) -> Result<RuntimeAttachment, AttachFailure> {
        self.attach(target, Some(command))
    }
}

struct Harness {
    transport: Arc<FakeTransport>,
    runtime: Arc<FakeRuntime>,
    registry: Arc<SessionRegistry>,
    client: mpsc::UnboundedSender<TransportEvent>,
    handle: JoinHandle<Option<SessionOutcome>>,
}

impl Harness {
    fn start(runtime: FakeRuntime) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let runtime = Arc::new(runtime);
        let relay = SessionRelay::new(
            Arc::clone(&runtime) as Arc<dyn RuntimeClient>,
            Arc::clone(&registry),
        );
        let transport = Arc::new(FakeTransport::new());
        let (client, rx) = mpsc::unbounded_channel();
        let events = UnboundedReceiverStream::new(rx).boxed();
        let owned: Arc<dyn Transport> = Arc::clone(&transport) as Arc<dyn Transport>;
        let handle = tokio::spawn(async move { relay.serve(owned, events).await });
        Self {
            transport,
            runtime,
            registry,
            client,
            handle,
        }
    }

    fn text(&self, text: &str) {
        let _ = self
            .client
            .send(TransportEvent::Frame(ClientFrame::Text(text.to_string())));
    }

    fn disconnect(&self) {
        self.transport.connected.store(false, Ordering::SeqCst);
        let _ = self.client.send(TransportEvent::Disconnected);
    }

    fn open_logtail(&self, target: &str) {
        self.text(&format!(r#"{{"kind":"logtail","target":"{target}"}}"#));
    }

    fn open_command(&self, target: &str, command: &str) {
        self.text(&format!(
            r#"{{"kind":"command","target":"{target}","command":"{command}"}}"#
        ));
    }

    async fn wait_active(&self) -> SessionId {
        let transport = Arc::clone(&self.transport);
        eventually(move || transport.session_id().is_some()).await;
        self.transport.session_id().unwrap()
    }

    async fn finish(self) -> Option<SessionOutcome> {
        // Keep the client side open until the relay ends on its own.
        let Self { handle, client, .. } = self;
        let joined = tokio_test::assert_ok!(
            timeout(Duration::from_secs(5), handle).await,
            "relay did not finish"
        );
        drop(client);
        joined.unwrap()
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn test_logtail_relays_then_closes_cleanly() {
    let harness = Harness::start(FakeRuntime::default());
    harness.open_logtail("T");
    let id = harness.wait_active().await;
    assert_eq!(harness.registry.get(id).unwrap().target.container, "T");

    harness.runtime.emit(RuntimeEvent::Data("line1\n".into()));
    harness.runtime.emit(RuntimeEvent::End);

    let transport = Arc::clone(&harness.transport);
    let registry = Arc::clone(&harness.registry);
    let runtime = Arc::clone(&harness.runtime);
    let outcome = harness.finish().await.unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Closed {
            id,
            trigger: TerminationTrigger::RemoteEnd
        }
    );
    assert_eq!(
        transport.sent(),
        vec![
            ServerMessage::Session(id),
            ServerMessage::Data("line1\n".to_string())
        ]
    );
    assert_eq!(transport.closes(), vec![CloseReason::Normal]);
    assert!(transport.errors().is_empty());
    assert!(registry.is_empty());
    assert_eq!(runtime.calls(), vec![StreamCall::Close]);
}

#[tokio::test]
async fn test_attach_failure_reports_once_and_never_registers() {
    let harness = Harness::start(FakeRuntime::failing(AttachFailure::NotFound(
        "T".to_string(),
    )));
    harness.open_command("T", "ls");

    let transport = Arc::clone(&harness.transport);
    let registry = Arc::clone(&harness.registry);
    let runtime = Arc::clone(&harness.runtime);
    let outcome = harness.finish().await.unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::AttachFailed(AttachFailure::NotFound("T".to_string()))
    );
    assert_eq!(transport.errors().len(), 1);
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(transport.closes(), vec![CloseReason::Error]);
    assert!(registry.is_empty());
    assert!(runtime.calls().is_empty());
    assert_eq!(
        runtime.opened.lock().unwrap().clone(),
        vec![(Target::parse("T").unwrap(), Some("ls".to_string()))]
    );
}

#[tokio::test]
async fn test_logtail_ignores_client_frames() {
    let harness = Harness::start(FakeRuntime::default());
    harness.open_logtail("T");
    harness.wait_active().await;

    harness.text("echo hi\r");
    harness.text(r#"{"action":"kill"}"#);
    harness.text(r#"{"action":"detach"}"#);
    harness.text("");

    // Still active: kill is not a trigger for log sessions.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.registry.len(), 1);

    harness.runtime.emit(RuntimeEvent::End);
    let runtime = Arc::clone(&harness.runtime);
    let transport = Arc::clone(&harness.transport);
    let outcome = harness.finish().await.unwrap();

    assert!(matches!(
        outcome,
        SessionOutcome::Closed {
            trigger: TerminationTrigger::RemoteEnd,
            ..
        }
    ));
    assert_eq!(runtime.calls(), vec![StreamCall::Close]);
    assert!(transport.errors().is_empty());
}

#[tokio::test]
async fn test_kill_interrupts_then_closes() {
    let harness = Harness::start(FakeRuntime::default());
    harness.open_command("T", "sh");
    harness.wait_active().await;

    harness.text("abc");
    harness.text(r#"{"action":"kill"}"#);
    harness.text("after");

    let runtime = Arc::clone(&harness.runtime);
    let transport = Arc::clone(&harness.transport);
    let registry = Arc::clone(&harness.registry);
    let outcome = harness.finish().await.unwrap();

    assert!(matches!(
        outcome,
        SessionOutcome::Closed {
            trigger: TerminationTrigger::Kill,
            ..
        }
    ));
    assert_eq!(
        runtime.calls(),
        vec![
            StreamCall::Write(b"abc".to_vec()),
            StreamCall::Interrupt,
            StreamCall::Close
        ]
    );
    assert_eq!(transport.closes(), vec![CloseReason::Normal]);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_detach_keeps_session_active_until_remote_end() {
    let harness = Harness::start(FakeRuntime::default());
    harness.open_command("T", "top");
    let id = harness.wait_active().await;

    harness.text(r#"{"action":"detach"}"#);
    let runtime = Arc::clone(&harness.runtime);
    eventually(move || runtime.count(&StreamCall::Detach) == 1).await;

    assert!(harness.registry.get(id).is_some());
    assert!(harness.transport.closes().is_empty());
    assert_eq!(harness.runtime.count(&StreamCall::Close), 0);

    harness.runtime.emit(RuntimeEvent::End);
    let runtime = Arc::clone(&harness.runtime);
    let transport = Arc::clone(&harness.transport);
    let outcome = harness.finish().await.unwrap();

    assert!(matches!(
        outcome,
        SessionOutcome::Closed {
            trigger: TerminationTrigger::RemoteEnd,
            ..
        }
    ));
    assert_eq!(runtime.calls(), vec![StreamCall::Detach, StreamCall::Close]);
    assert_eq!(transport.closes(), vec![CloseReason::Normal]);
}

#[tokio::test]
async fn test_resize_is_forwarded() {
    let harness = Harness::start(FakeRuntime::default());
    harness.open_command("T", "bash");
    harness.wait_active().await;

    harness.text(r#"{"action":"resize","cols":132,"rows":43}"#);
    let runtime = Arc::clone(&harness.runtime);
    eventually(move || runtime.count(&StreamCall::Resize(132, 43)) == 1).await;

    harness.disconnect();
    harness.finish().await.unwrap();
}

#[tokio::test]
async fn test_stream_fault_reports_single_error() {
    let harness = Harness::start(FakeRuntime::default());
    harness.open_logtail("T");
    harness.wait_active().await;

    harness.runtime.emit(RuntimeEvent::Data("partial".into()));
    harness.runtime.emit(RuntimeEvent::Error("connection reset".to_string()));

    let transport = Arc::clone(&harness.transport);
    let registry = Arc::clone(&harness.registry);
    let outcome = harness.finish().await.unwrap();

    assert!(matches!(
        outcome,
        SessionOutcome::Closed {
            trigger: TerminationTrigger::StreamFault(_),
            ..
        }
    ));
    assert_eq!(transport.data(), "partial");
    let errors = transport.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("connection reset"));
    assert_eq!(transport.closes(), vec![CloseReason::Error]);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_write_failure_is_a_stream_fault() {
    let harness = Harness::start(FakeRuntime {
        fail_writes: true,
        ..FakeRuntime::default()
    });
    harness.open_command("T", "cat");
    harness.wait_active().await;

    harness.text("hello");

    let transport = Arc::clone(&harness.transport);
    let outcome = harness.finish().await.unwrap();

    assert!(matches!(
        outcome,
        SessionOutcome::Closed {
            trigger: TerminationTrigger::StreamFault(_),
            ..
        }
    ));
    assert_eq!(transport.errors().len(), 1);
    assert_eq!(transport.closes(), vec![CloseReason::Error]);
}

#[tokio::test]
async fn test_client_disconnect_is_silent() {
    let harness = Harness::start(FakeRuntime::default());
    harness.open_command("T", "sh");
    let id = harness.wait_active().await;

    harness.disconnect();

    let transport = Arc::clone(&harness.transport);
    let registry = Arc::clone(&harness.registry);
    let runtime = Arc::clone(&harness.runtime);
    let outcome = harness.finish().await.unwrap();

    assert_eq!(
        outcome,
        SessionOutcome::Closed {
            id,
            trigger: TerminationTrigger::ClientDisconnect
        }
    );
    assert_eq!(transport.sent(), vec![ServerMessage::Session(id)]);
    assert_eq!(transport.closes(), vec![CloseReason::Normal]);
    assert_eq!(runtime.calls(), vec![StreamCall::Close]);
    assert!(registry.is_empty());
    assert_eq!(registry.stats().unregistered, 1);
    assert_eq!(registry.stats().missed_unregisters, 0);
}

#[tokio::test]
async fn test_protocol_misuse_does_not_tear_down() {
    let harness = Harness::start(FakeRuntime::default());

    // Before any session: input, a broken open, then a valid one.
    harness.text("ls");
    harness.text(r#"{"kind":"command","target":"T"}"#);
    harness.open_command("T", "sh");
    let id = harness.wait_active().await;
    assert_eq!(harness.transport.errors().len(), 2);

    harness.text(r#"{"action":"reboot"}"#);
    harness.text("");
    harness.text(r#"{"kind":"logtail","target":"other"}"#);
    let transport = Arc::clone(&harness.transport);
    eventually(move || transport.errors().len() == 5).await;

    assert!(harness.registry.get(id).is_some());
    assert!(harness.transport.closes().is_empty());

    harness.text("still alive");
    let runtime = Arc::clone(&harness.runtime);
    eventually(move || runtime.count(&StreamCall::Write(b"still alive".to_vec())) == 1).await;

    harness.runtime.emit(RuntimeEvent::End);
    harness.finish().await.unwrap();
}

#[tokio::test]
async fn test_split_multibyte_output_is_never_torn() {
    let harness = Harness::start(FakeRuntime::default());
    harness.open_logtail("T");
    harness.wait_active().await;

    let bytes = "世界\n".as_bytes();
    harness
        .runtime
        .emit(RuntimeEvent::Data(bytes::Bytes::copy_from_slice(&bytes[..2])));
    harness
        .runtime
        .emit(RuntimeEvent::Data(bytes::Bytes::copy_from_slice(&bytes[2..4])));
    harness
        .runtime
        .emit(RuntimeEvent::Data(bytes::Bytes::copy_from_slice(&bytes[4..])));
    harness.runtime.emit(RuntimeEvent::End);

    let transport = Arc::clone(&harness.transport);
    harness.finish().await.unwrap();

    assert_eq!(transport.data(), "世界\n");
    for msg in transport.sent() {
        if let ServerMessage::Data(fragment) = msg {
            assert!(!fragment.contains('\u{FFFD}'));
        }
    }
}

#[tokio::test]
async fn test_disconnect_before_open() {
    let harness = Harness::start(FakeRuntime::default());
    harness.disconnect();

    let runtime = Arc::clone(&harness.runtime);
    assert_eq!(harness.finish().await, None);
    assert!(runtime.opened.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_triggers_tear_down_once() {
    for round in 0..40 {
        let harness = Harness::start(FakeRuntime::default());
        harness.open_command("T", "sh");
        harness.wait_active().await;

        let runtime = Arc::clone(&harness.runtime);
        let end = tokio::spawn(async move {
            if round % 2 == 0 {
                runtime.emit(RuntimeEvent::End);
            } else {
                runtime.emit(RuntimeEvent::Error("gone".to_string()));
            }
        });
        let client = harness.client.clone();
        let kill = tokio::spawn(async move {
            let _ = client.send(TransportEvent::Frame(ClientFrame::Text(
                r#"{"action":"kill"}"#.to_string(),
            )));
        });
        harness.disconnect();
        end.await.unwrap();
        kill.await.unwrap();

        let runtime = Arc::clone(&harness.runtime);
        let transport = Arc::clone(&harness.transport);
        let registry = Arc::clone(&harness.registry);
        let outcome = harness.finish().await.unwrap();

        assert!(matches!(outcome, SessionOutcome::Closed { .. }));
        assert_eq!(runtime.count(&StreamCall::Close), 1, "round {round}");
        assert!(runtime.count(&StreamCall::Interrupt) <= 1, "round {round}");
        assert_eq!(transport.closes().len(), 1, "round {round}");
        assert!(transport.errors().len() <= 1, "round {round}");
        assert!(registry.is_empty(), "round {round}");
        assert_eq!(
            registry.stats(),
            RegistryStats {
                registered: 1,
                unregistered: 1,
                missed_unregisters: 0,
            },
            "round {round}"
        );
    }
}
