//! The `BluetoothTransport` collaborator: the capability set the
//! engine requires from a platform HFP link driver, and the translation of
//! its callbacks into [`Event`]s.
//!
//! The engine's own tests exercise [`MockTransport`] exclusively — actual
//! Bluetooth radio I/O is explicitly out of scope for this engine.
//! [`BluerTransport`] is included as a best-effort Linux reference
//! implementation, split into a `#[cfg(target_os = "linux")]` module and a
//! non-Linux stub, but it is not part of the engine's tested surface.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::HfpError;

/// Callbacks the transport delivers back to the engine, matching the
/// translation table one row at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCallback {
    Connected { success: bool, error: Option<String> },
    Disconnected,
    CallSetupMode(u8),
    CallActive(bool),
    CallHoldState(u8),
    SignalStrength(i32),
    BatteryCharge(i32),
    ServiceAvailable(bool),
    Roaming(bool),
    IncomingCallFrom(Option<String>),
    ScoConnectionOpened,
    ScoConnectionClosed,
    /// A raw line surfaced by the transport for the escape-hatch AT
    /// commands (`+CLCC`, `+COPS?`) to be fed through the parser.
    Line(String),
}

/// The capability set required from the platform HFP link driver.
#[async_trait]
pub trait BluetoothTransport: Send + Sync {
    async fn connect(&self) -> Result<(), HfpError>;
    async fn disconnect(&self) -> Result<(), HfpError>;
    fn is_connected(&self) -> bool;

    async fn dial_number(&self, number: &str) -> Result<(), HfpError>;
    async fn accept_call(&self) -> Result<(), HfpError>;
    async fn end_call(&self) -> Result<(), HfpError>;
    async fn send_dtmf(&self, digit: char) -> Result<(), HfpError>;

    async fn connect_sco(&self) -> Result<(), HfpError>;
    async fn disconnect_sco(&self) -> Result<(), HfpError>;
    async fn transfer_audio_to_computer(&self) -> Result<(), HfpError>;

    async fn send(&self, at_command: &str) -> Result<(), HfpError>;

    /// A channel of callbacks the engine drains on its own task; registering
    /// twice replaces the previous receiver (mirrors a delegate being
    /// reassigned).
    fn callbacks(&self) -> mpsc::Receiver<TransportCallback>;
}

// ── MockTransport — the engine's actual test double ─────────────────────────

/// An in-memory transport for tests: `dial_number`/`accept_call`/etc. just
/// record what was asked of them, and a test drives callbacks directly
/// through [`MockTransport::push_callback`].
pub struct MockTransport {
    connected: std::sync::atomic::AtomicBool,
    callback_tx: mpsc::Sender<TransportCallback>,
    callback_rx: std::sync::Mutex<Option<mpsc::Receiver<TransportCallback>>>,
    pub sent_commands: std::sync::Mutex<Vec<String>>,
    pub fail_connect: std::sync::atomic::AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            connected: std::sync::atomic::AtomicBool::new(false),
            callback_tx: tx,
            callback_rx: std::sync::Mutex::new(Some(rx)),
            sent_commands: std::sync::Mutex::new(Vec::new()),
            fail_connect: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Inject a callback as if it arrived from the transport's own thread.
    pub async fn push_callback(&self, cb: TransportCallback) {
        let _ = self.callback_tx.send(cb).await;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BluetoothTransport for MockTransport {
    async fn connect(&self) -> Result<(), HfpError> {
        if self.fail_connect.load(std::sync::atomic::Ordering::SeqCst) {
            self.push_callback(TransportCallback::Connected {
                success: false,
                error: Some("simulated failure".into()),
            })
            .await;
            return Ok(());
        }
        self.connected.store(true, std::sync::atomic::Ordering::SeqCst);
        self.push_callback(TransportCallback::Connected { success: true, error: None })
            .await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), HfpError> {
        self.connected.store(false, std::sync::atomic::Ordering::SeqCst);
        self.push_callback(TransportCallback::Disconnected).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn dial_number(&self, number: &str) -> Result<(), HfpError> {
        self.sent_commands.lock().unwrap().push(format!("DIAL {number}"));
        Ok(())
    }

    async fn accept_call(&self) -> Result<(), HfpError> {
        self.sent_commands.lock().unwrap().push("ACCEPT".into());
        Ok(())
    }

    async fn end_call(&self) -> Result<(), HfpError> {
        self.sent_commands.lock().unwrap().push("END".into());
        Ok(())
    }

    async fn send_dtmf(&self, digit: char) -> Result<(), HfpError> {
        self.sent_commands.lock().unwrap().push(format!("DTMF {digit}"));
        Ok(())
    }

    async fn connect_sco(&self) -> Result<(), HfpError> {
        self.sent_commands.lock().unwrap().push("SCO_CONNECT".into());
        Ok(())
    }

    async fn disconnect_sco(&self) -> Result<(), HfpError> {
        self.sent_commands.lock().unwrap().push("SCO_DISCONNECT".into());
        Ok(())
    }

    async fn transfer_audio_to_computer(&self) -> Result<(), HfpError> {
        self.sent_commands.lock().unwrap().push("TRANSFER_AUDIO".into());
        Ok(())
    }

    async fn send(&self, at_command: &str) -> Result<(), HfpError> {
        self.sent_commands.lock().unwrap().push(at_command.to_string());
        Ok(())
    }

    fn callbacks(&self) -> mpsc::Receiver<TransportCallback> {
        self.callback_rx
            .lock()
            .unwrap()
            .take()
            .expect("callbacks() called more than once on MockTransport")
    }
}

// ── BluerTransport — Linux reference implementation ──────────────────────────

#[cfg(target_os = "linux")]
pub use linux::BluerTransport;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use bluer::rfcomm::{Profile, Role, Stream};
    use bluer::Uuid;
    use futures::StreamExt;
    use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
    use tokio::sync::Mutex as AsyncMutex;

    /// Handsfree Audio Gateway service class, the role the phone exposes and
    /// the HF (this engine) connects to as an RFCOMM client.
    const HFP_AG_UUID: Uuid = Uuid::from_u128(0x0000111f_0000_1000_8000_00805f9b34fb);

    /// Best-effort Linux transport over `bluer`'s RFCOMM profile client.
    /// Connects to a single remembered device address; AT command framing
    /// (CRLF termination) happens here, at the wire boundary, exactly like
    /// the rest of the engine's "quote-strip and whitespace-trim lives at
    /// the boundary" rule.
    pub struct BluerTransport {
        address: bluer::Address,
        stream: AsyncMutex<Option<WriteHalf<Stream>>>,
        read_task: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
        callback_tx: mpsc::Sender<TransportCallback>,
        callback_rx: std::sync::Mutex<Option<mpsc::Receiver<TransportCallback>>>,
    }

    impl BluerTransport {
        pub fn new(address: bluer::Address) -> Self {
            let (tx, rx) = mpsc::channel(64);
            Self {
                address,
                stream: AsyncMutex::new(None),
                read_task: AsyncMutex::new(None),
                callback_tx: tx,
                callback_rx: std::sync::Mutex::new(Some(rx)),
            }
        }

        async fn write_line(&self, line: &str) -> Result<(), HfpError> {
            let mut guard = self.stream.lock().await;
            let stream = guard
                .as_mut()
                .ok_or_else(|| HfpError::NotConnected)?;
            stream
                .write_all(format!("{line}\r\n").as_bytes())
                .await
                .map_err(|e| HfpError::TransportError(e.to_string()))
        }
    }

    #[async_trait]
    impl BluetoothTransport for BluerTransport {
        async fn connect(&self) -> Result<(), HfpError> {
            let session = bluer::Session::new()
                .await
                .map_err(|e| HfpError::TransportError(e.to_string()))?;
            let profile = Profile {
                uuid: HFP_AG_UUID,
                role: Some(Role::Client),
                ..Default::default()
            };
            let mut handle = session
                .register_profile(profile)
                .await
                .map_err(|e| HfpError::TransportError(e.to_string()))?;

            let req = match handle.next().await {
                Some(r) => r,
                None => {
                    let _ = self
                        .callback_tx
                        .send(TransportCallback::Connected {
                            success: false,
                            error: Some("profile handle closed".into()),
                        })
                        .await;
                    return Ok(());
                }
            };
            match req.accept() {
                Ok(stream) => {
                    let (read_half, write_half) = split(stream);
                    *self.stream.lock().await = Some(write_half);
                    *self.read_task.lock().await =
                        Some(tokio::spawn(read_loop(read_half, self.callback_tx.clone())));
                    let _ = self
                        .callback_tx
                        .send(TransportCallback::Connected { success: true, error: None })
                        .await;
                    Ok(())
                }
                Err(e) => {
                    let _ = self
                        .callback_tx
                        .send(TransportCallback::Connected {
                            success: false,
                            error: Some(e.to_string()),
                        })
                        .await;
                    Ok(())
                }
            }
        }

        async fn disconnect(&self) -> Result<(), HfpError> {
            if let Some(mut stream) = self.stream.lock().await.take() {
                let _ = stream.shutdown().await;
            }
            if let Some(task) = self.read_task.lock().await.take() {
                task.abort();
            }
            let _ = self.callback_tx.send(TransportCallback::Disconnected).await;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.stream.try_lock().map(|g| g.is_some()).unwrap_or(false)
        }

        async fn dial_number(&self, number: &str) -> Result<(), HfpError> {
            self.write_line(&format!("ATD{number};")).await
        }

        async fn accept_call(&self) -> Result<(), HfpError> {
            self.write_line("ATA").await
        }

        async fn end_call(&self) -> Result<(), HfpError> {
            self.write_line("AT+CHUP").await
        }

        async fn send_dtmf(&self, digit: char) -> Result<(), HfpError> {
            self.write_line(&format!("AT+VTS={digit}")).await
        }

        async fn connect_sco(&self) -> Result<(), HfpError> {
            Err(HfpError::TransportError(
                "SCO socket setup is not implemented by this reference transport".into(),
            ))
        }

        async fn disconnect_sco(&self) -> Result<(), HfpError> {
            Err(HfpError::TransportError(
                "SCO socket teardown is not implemented by this reference transport".into(),
            ))
        }

        async fn transfer_audio_to_computer(&self) -> Result<(), HfpError> {
            self.connect_sco().await
        }

        async fn send(&self, at_command: &str) -> Result<(), HfpError> {
            self.write_line(at_command).await
        }

        fn callbacks(&self) -> mpsc::Receiver<TransportCallback> {
            self.callback_rx
                .lock()
                .unwrap()
                .take()
                .expect("callbacks() called more than once on BluerTransport")
        }
    }

    async fn read_loop(mut stream: ReadHalf<Stream>, tx: mpsc::Sender<TransportCallback>) {
        let mut buf = vec![0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => {
                    let _ = tx.send(TransportCallback::Disconnected).await;
                    return;
                }
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]);
                    for line in text.lines() {
                        if !line.trim().is_empty() {
                            let _ = tx.send(TransportCallback::Line(line.to_string())).await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub struct BluerTransport;

#[cfg(not(target_os = "linux"))]
impl BluerTransport {
    pub fn new(_address: &str) -> Self {
        Self
    }
}

#[cfg(not(target_os = "linux"))]
#[async_trait]
impl BluetoothTransport for BluerTransport {
    async fn connect(&self) -> Result<(), HfpError> {
        Err(HfpError::TransportError(
            "the bluer-backed transport is Linux-only".into(),
        ))
    }
    async fn disconnect(&self) -> Result<(), HfpError> {
        Ok(())
    }
    fn is_connected(&self) -> bool {
        false
    }
    async fn dial_number(&self, _number: &str) -> Result<(), HfpError> {
        Err(HfpError::TransportError("Linux-only".into()))
    }
    async fn accept_call(&self) -> Result<(), HfpError> {
        Err(HfpError::TransportError("Linux-only".into()))
    }
    async fn end_call(&self) -> Result<(), HfpError> {
        Err(HfpError::TransportError("Linux-only".into()))
    }
    async fn send_dtmf(&self, _digit: char) -> Result<(), HfpError> {
        Err(HfpError::TransportError("Linux-only".into()))
    }
    async fn connect_sco(&self) -> Result<(), HfpError> {
        Err(HfpError::TransportError("Linux-only".into()))
    }
    async fn disconnect_sco(&self) -> Result<(), HfpError> {
        Err(HfpError::TransportError("Linux-only".into()))
    }
    async fn transfer_audio_to_computer(&self) -> Result<(), HfpError> {
        Err(HfpError::TransportError("Linux-only".into()))
    }
    async fn send(&self, _at_command: &str) -> Result<(), HfpError> {
        Err(HfpError::TransportError("Linux-only".into()))
    }
    fn callbacks(&self) -> mpsc::Receiver<TransportCallback> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_records_commands() {
        let t = MockTransport::new();
        t.dial_number("+15551234567").await.unwrap();
        t.send_dtmf('5').await.unwrap();
        let commands = t.sent_commands.lock().unwrap().clone();
        assert_eq!(commands, vec!["DIAL +15551234567".to_string(), "DTMF 5".to_string()]);
    }

    #[tokio::test]
    async fn mock_transport_connect_emits_callback() {
        let t = MockTransport::new();
        let mut rx = t.callbacks();
        t.connect().await.unwrap();
        let cb = rx.recv().await.unwrap();
        assert_eq!(cb, TransportCallback::Connected { success: true, error: None });
        assert!(t.is_connected());
    }

    #[tokio::test]
    async fn mock_transport_simulated_failure() {
        let t = MockTransport::new();
        t.fail_connect.store(true, std::sync::atomic::Ordering::SeqCst);
        let mut rx = t.callbacks();
        t.connect().await.unwrap();
        let cb = rx.recv().await.unwrap();
        assert!(matches!(cb, TransportCallback::Connected { success: false, .. }));
        assert!(!t.is_connected());
    }
}
