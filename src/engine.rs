//! Owns one HFP session: accepts control requests, issues AT
//! commands through the transport, receives transport callbacks, emits
//! events, and runs timeouts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::errors::HfpError;
use crate::events::{Event, EventBus};
use crate::parser;
use crate::state::{CallStatus, HFPState, StateMachine};
use crate::transport::{BluetoothTransport, TransportCallback};

/// Library-facing configuration (no filesystem access — see `config.rs` for
/// the CLI shell's persisted settings that feed these).
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub connect_timeout: Duration,
    pub event_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            event_queue_capacity: 32,
        }
    }
}

/// One HFP session: a transport handle plus the `(StateMachine, EventBus)`
/// pair it exclusively owns.
pub struct HfpEngine {
    transport: Arc<dyn BluetoothTransport>,
    state: Arc<StateMachine>,
    bus: Arc<EventBus>,
    config: EngineConfig,
    /// Guards the drain task so it isn't spawned twice and can be cancelled
    /// on shutdown (shutdown must cancel the bus-draining
    /// task").
    drain_task: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
    callback_translation_started: std::sync::atomic::AtomicBool,
    /// Guards against two overlapping `connect()` calls racing the same
    /// transport handle.
    connect_in_progress: std::sync::atomic::AtomicBool,
}

impl HfpEngine {
    /// Construct a new engine and start draining the transport's callback
    /// channel onto the event bus / state machine. No transport I/O happens
    /// until [`HfpEngine::connect`] is called.
    pub fn new(transport: Arc<dyn BluetoothTransport>, config: EngineConfig) -> Self {
        let state = Arc::new(StateMachine::new());
        let bus = Arc::new(EventBus::new(config.event_queue_capacity));

        let drain_state = state.clone();
        let mut drain_bus_sub = bus.subscribe();
        // The state machine is the one dedicated task draining a bus
        // subscription.
        let drain_handle = tokio::spawn(async move {
            while let Some(event) = drain_bus_sub.recv().await {
                drain_state.apply(&event);
            }
        });

        Self {
            transport,
            state,
            bus,
            config,
            drain_task: AsyncMutex::new(Some(drain_handle)),
            callback_translation_started: std::sync::atomic::AtomicBool::new(false),
            connect_in_progress: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// An immutable snapshot of the authoritative state.
    pub fn state(&self) -> HFPState {
        self.state.snapshot()
    }

    /// A fresh subscription onto the event bus, for external subscribers
    /// (CLI shell, agent bridge, tests).
    pub fn subscribe(&self) -> crate::events::Subscription {
        self.bus.subscribe()
    }

    fn emit(&self, event: Event) {
        self.bus.emit(event);
    }

    fn is_connected(&self) -> bool {
        self.state.snapshot().connection == crate::state::ConnectionState::Connected
    }

    // ── SLC lifecycle ────────────────────────────────────────────────────────

    /// Initiate the Service-Level Connection and wait for the first of
    /// `{connected, disconnected, connectFailed, timeout}`. Subscribes to
    /// the bus *before* calling `transport.connect()` so no event emitted
    /// during connection setup can be missed.
    pub async fn connect(&self) -> Result<(), HfpError> {
        if self.is_connected() {
            return Ok(());
        }
        if self
            .connect_in_progress
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(HfpError::CommandFailed(
                "a connect attempt is already in progress".into(),
            ));
        }

        let result = self.connect_inner().await;
        self.connect_in_progress
            .store(false, std::sync::atomic::Ordering::SeqCst);
        result
    }

    async fn connect_inner(&self) -> Result<(), HfpError> {
        let mut sub = self.bus.subscribe();

        // Start the translation task that turns transport callbacks into
        // events. This is idempotent to call more than once in principle,
        // but the engine only calls it here and from `new` is reserved for
        // the state-drain task, so start it now if not already running.
        self.ensure_callback_translation();

        self.emit(Event::Connecting);
        if let Err(e) = self.transport.connect().await {
            self.emit(Event::Disconnected(None));
            return Err(e);
        }

        let wait = async {
            loop {
                match sub.recv().await {
                    Some(Event::Connected) => return Ok(()),
                    Some(Event::Disconnected(err)) | Some(Event::ConnectFailed(err)) => {
                        return Err(HfpError::ConnectionFailed(
                            err.unwrap_or_else(|| "connection rejected".into()),
                        ));
                    }
                    Some(_) => continue,
                    None => {
                        return Err(HfpError::ConnectionFailed("event bus closed".into()))
                    }
                }
            }
        };

        match tokio::time::timeout(self.config.connect_timeout, wait).await {
            Ok(Ok(())) => {
                info!("SLC established");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "connect failed");
                self.emit(Event::Disconnected(None));
                Err(e)
            }
            Err(_) => {
                warn!("connect timed out");
                self.emit(Event::Disconnected(None));
                Err(HfpError::ConnectionFailed("timed out".into()))
            }
        }
    }

    /// Best-effort, non-blocking: asks the transport to close. Arrival of a
    /// `disconnected` callback later resets state.
    pub async fn disconnect(&self) {
        if let Err(e) = self.transport.disconnect().await {
            debug!(error = %e, "disconnect request failed (best-effort)");
        }
    }

    // ── Call control ─────────────────────────────────────────────────────────

    /// Requires `connection = connected`. Emits `callDialing` *before*
    /// issuing the transport's dial primitive, so bus
    /// subscribers observe the transition even if the transport is slow.
    pub async fn dial(&self, number: &str) -> Result<(), HfpError> {
        if !self.is_connected() {
            return Err(HfpError::NotConnected);
        }
        self.emit(Event::CallDialing(number.to_string()));
        self.transport.dial_number(number).await
    }

    pub async fn accept_call(&self) -> Result<(), HfpError> {
        if !self.is_connected() {
            return Err(HfpError::NotConnected);
        }
        self.transport.accept_call().await
    }

    pub async fn end_call(&self) -> Result<(), HfpError> {
        if !self.is_connected() {
            return Err(HfpError::NotConnected);
        }
        self.transport.end_call().await
    }

    /// `digit` must be a single character from `0..9 ∪ {*, #}`. No event is
    /// emitted locally.
    pub async fn send_dtmf(&self, digit: char) -> Result<(), HfpError> {
        if !self.is_connected() {
            return Err(HfpError::NotConnected);
        }
        if !matches!(digit, '0'..='9' | '*' | '#') {
            return Err(HfpError::CommandFailed(
                "DTMF must be a single character".into(),
            ));
        }
        self.transport.send_dtmf(digit).await
    }

    // ── Audio control ─────────────────────────────────────────────────────────

    pub async fn connect_audio(&self) -> Result<(), HfpError> {
        if !self.is_connected() {
            return Err(HfpError::NotConnected);
        }
        self.transport.connect_sco().await
    }

    pub async fn disconnect_audio(&self) -> Result<(), HfpError> {
        if !self.is_connected() {
            return Err(HfpError::NotConnected);
        }
        self.transport.disconnect_sco().await
    }

    pub async fn transfer_audio_to_computer(&self) -> Result<(), HfpError> {
        if !self.is_connected() {
            return Err(HfpError::NotConnected);
        }
        self.transport.transfer_audio_to_computer().await
    }

    // ── Escape hatch ──────────────────────────────────────────────────────────

    pub async fn send_at_command(&self, text: &str) -> Result<(), HfpError> {
        if !self.is_connected() {
            return Err(HfpError::NotConnected);
        }
        self.transport.send(text).await
    }

    pub async fn request_call_list(&self) -> Result<(), HfpError> {
        self.send_at_command("+CLCC").await
    }

    pub async fn request_operator(&self) -> Result<(), HfpError> {
        self.send_at_command("+COPS?").await
    }

    // ── Transport callback translation ───────────────────────────────────

    /// Spawn the task that drains `transport.callbacks()` and synthesises
    /// events. Only meaningful to call once per transport lifetime;
    /// subsequent calls are no-ops because the transport's `callbacks()`
    /// can only be taken once.
    fn ensure_callback_translation(&self) {
        if self
            .callback_translation_started
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return;
        }
        let transport_callbacks = self.transport.callbacks();
        let bus = self.bus.clone();
        tokio::spawn(translate_callbacks(transport_callbacks, bus));
    }

    /// Cancel the bus-draining task and ask the transport to disconnect.
    /// Unreceived events are dropped.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.drain_task.lock().await.take() {
            handle.abort();
        }
        let _ = self.transport.disconnect().await;
    }
}

async fn translate_callbacks(
    mut callbacks: tokio::sync::mpsc::Receiver<TransportCallback>,
    bus: Arc<EventBus>,
) {
    while let Some(cb) = callbacks.recv().await {
        match cb {
            TransportCallback::Connected { success, error } => {
                if success {
                    bus.emit(Event::Connected);
                } else {
                    bus.emit(Event::ConnectFailed(error));
                }
            }
            TransportCallback::Disconnected => bus.emit(Event::Disconnected(None)),
            TransportCallback::CallSetupMode(k) => {
                bus.emit(Event::CallSetup(k));
                match k {
                    1 => bus.emit(Event::IncomingCall(None)),
                    2 => bus.emit(Event::CallDialing(String::new())),
                    3 => bus.emit(Event::CallAlerting),
                    _ => {}
                }
            }
            TransportCallback::CallActive(active) => {
                bus.emit(Event::CallIndicator(active));
                if active {
                    bus.emit(Event::CallActive);
                } else {
                    bus.emit(Event::CallEnded);
                }
            }
            TransportCallback::CallHoldState(k) => {
                bus.emit(Event::CallHeldIndicator(k));
                if k > 0 {
                    bus.emit(Event::CallHeld);
                }
            }
            TransportCallback::SignalStrength(v) => bus.emit(Event::SignalStrength(v)),
            TransportCallback::BatteryCharge(v) => bus.emit(Event::BatteryLevel(v)),
            TransportCallback::ServiceAvailable(b) => bus.emit(Event::ServiceAvailable(b)),
            TransportCallback::Roaming(b) => bus.emit(Event::Roaming(b)),
            TransportCallback::IncomingCallFrom(n) => {
                bus.emit(Event::CallerId(n.clone().unwrap_or_default(), None));
                bus.emit(Event::IncomingCall(n));
            }
            TransportCallback::ScoConnectionOpened => bus.emit(Event::ScoConnected),
            TransportCallback::ScoConnectionClosed => bus.emit(Event::ScoDisconnected),
            TransportCallback::Line(line) => {
                if let Some(call) = parser::parse_clcc(&line) {
                    let status = match call.status {
                        CallStatus::Active => Event::CallActive,
                        CallStatus::Held => Event::CallHeld,
                        CallStatus::Dialing => {
                            Event::CallDialing(call.number.clone().unwrap_or_default())
                        }
                        CallStatus::Alerting => Event::CallAlerting,
                        CallStatus::Incoming => Event::IncomingCall(call.number.clone()),
                        CallStatus::Waiting => Event::CallWaiting(call.number.clone()),
                        CallStatus::Idle | CallStatus::Ended => continue,
                    };
                    bus.emit(status);
                } else if let Some(name) = parser::parse_cops(&line) {
                    bus.emit(Event::OperatorName(name));
                } else if let Some((number, name)) = parser::parse_clip(&line) {
                    bus.emit(Event::CallerId(number, name));
                }
                // otherwise the line is dropped silently — no event, matching
                // the parser's ParseError-never-escapes contract.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn engine() -> (HfpEngine, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let engine = HfpEngine::new(transport.clone(), EngineConfig::default());
        (engine, transport)
    }

    #[tokio::test]
    async fn connect_success_reaches_connected() {
        let (engine, _t) = engine();
        engine.connect().await.unwrap();
        assert_eq!(
            engine.state().connection,
            crate::state::ConnectionState::Connected
        );
    }

    #[tokio::test]
    async fn connect_failure_leaves_disconnected() {
        let (engine, transport) = engine();
        transport
            .fail_connect
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let result = engine.connect().await;
        assert!(result.is_err());
        assert_eq!(
            engine.state().connection,
            crate::state::ConnectionState::Disconnected
        );
    }

    /// A transport whose `connect()` never delivers a callback, so the
    /// engine's wait is forced to hit its timeout branch.
    struct SilentTransport;

    #[async_trait::async_trait]
    impl BluetoothTransport for SilentTransport {
        async fn connect(&self) -> Result<(), HfpError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), HfpError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            false
        }
        async fn dial_number(&self, _number: &str) -> Result<(), HfpError> {
            Ok(())
        }
        async fn accept_call(&self) -> Result<(), HfpError> {
            Ok(())
        }
        async fn end_call(&self) -> Result<(), HfpError> {
            Ok(())
        }
        async fn send_dtmf(&self, _digit: char) -> Result<(), HfpError> {
            Ok(())
        }
        async fn connect_sco(&self) -> Result<(), HfpError> {
            Ok(())
        }
        async fn disconnect_sco(&self) -> Result<(), HfpError> {
            Ok(())
        }
        async fn transfer_audio_to_computer(&self) -> Result<(), HfpError> {
            Ok(())
        }
        async fn send(&self, _at_command: &str) -> Result<(), HfpError> {
            Ok(())
        }
        fn callbacks(&self) -> tokio::sync::mpsc::Receiver<TransportCallback> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            rx
        }
    }

    #[tokio::test]
    async fn connect_timeout_fails_and_resets_state() {
        let transport = Arc::new(SilentTransport);
        let engine = HfpEngine::new(
            transport,
            EngineConfig {
                connect_timeout: Duration::from_millis(20),
                event_queue_capacity: 32,
            },
        );
        let result = tokio::time::timeout(Duration::from_millis(500), engine.connect())
            .await
            .expect("connect() itself must return within the outer timeout");
        assert!(result.is_err());
        assert_eq!(
            engine.state().connection,
            crate::state::ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn dial_requires_connection() {
        let (engine, _t) = engine();
        let err = engine.dial("+15551234567").await.unwrap_err();
        assert_eq!(err, HfpError::NotConnected);
    }

    #[tokio::test]
    async fn dial_emits_event_before_transport_call() {
        let (engine, transport) = engine();
        engine.connect().await.unwrap();
        let mut sub = engine.subscribe();
        engine.dial("+15551234567").await.unwrap();
        assert_eq!(
            sub.recv().await,
            Some(Event::CallDialing("+15551234567".into()))
        );
        assert!(transport
            .sent_commands
            .lock()
            .unwrap()
            .contains(&"DIAL +15551234567".to_string()));
    }

    #[tokio::test]
    async fn dtmf_rejects_multi_character_and_out_of_set() {
        let (engine, _t) = engine();
        engine.connect().await.unwrap();
        assert!(engine.send_dtmf('5').await.is_ok());
        assert!(matches!(
            engine.send_dtmf('x').await,
            Err(HfpError::CommandFailed(_))
        ));
    }

    #[tokio::test]
    async fn full_outgoing_call_lifecycle_via_callbacks() {
        let (engine, transport) = engine();
        engine.connect().await.unwrap();
        engine.dial("+15551234567").await.unwrap();

        transport
            .push_callback(TransportCallback::CallSetupMode(3))
            .await;
        transport.push_callback(TransportCallback::CallActive(true)).await;
        transport
            .push_callback(TransportCallback::CallActive(false))
            .await;

        // give the drain task a chance to run
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(engine.state().call, CallStatus::Idle);
        assert!(engine.state().active_call.is_none());
    }

    #[tokio::test]
    async fn mid_call_transport_loss_tears_down_state() {
        let (engine, transport) = engine();
        engine.connect().await.unwrap();
        transport.push_callback(TransportCallback::CallActive(true)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.push_callback(TransportCallback::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snap = engine.state();
        assert_eq!(snap.connection, crate::state::ConnectionState::Disconnected);
        assert_eq!(snap.call, CallStatus::Idle);
        assert!(snap.active_call.is_none());
    }
}
