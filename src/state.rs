//! Authoritative projection of connection, call, audio, and phone
//! indicators, driven exclusively by [`Event`]s.

use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

use crate::events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioState {
    Disconnected,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Idle,
    Dialing,
    Alerting,
    Incoming,
    Active,
    Held,
    Waiting,
    Ended,
}

/// A single call, identified by the AG's 1-based CLCC index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallInfo {
    pub index: u32,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub number: Option<String>,
    /// Set exactly once, on first entry into `Active`; never cleared before
    /// the call object is destroyed.
    #[serde(skip)]
    pub start_time: Option<Instant>,
}

/// Five indicators replicated from the AG's `+CIEV`-style indications.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhoneStatus {
    pub signal_strength: Option<u8>,
    pub battery_level: Option<u8>,
    pub service_available: bool,
    pub operator_name: Option<String>,
    pub roaming: bool,
}

impl PhoneStatus {
    pub fn clamp_signal(v: i32) -> Option<u8> {
        if (0..=5).contains(&v) {
            Some(v as u8)
        } else {
            None
        }
    }

    pub fn clamp_battery(v: i32) -> Option<u8> {
        if (0..=5).contains(&v) {
            Some(v as u8)
        } else {
            None
        }
    }
}

/// The single aggregate state, protected by [`StateMachine`]'s
/// lock.
#[derive(Debug, Clone, Serialize)]
pub struct HFPState {
    pub connection: ConnectionState,
    pub call: CallStatus,
    pub audio: AudioState,
    pub phone_status: PhoneStatus,
    pub active_call: Option<CallInfo>,
}

impl Default for HFPState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            call: CallStatus::Idle,
            audio: AudioState::Disconnected,
            phone_status: PhoneStatus::default(),
            active_call: None,
        }
    }
}

impl HFPState {
    /// Every invariant, checked in one place so tests (and
    /// debug builds) can assert it after any transition.
    #[cfg(test)]
    fn check_invariants(&self) {
        if self.connection == ConnectionState::Disconnected {
            assert_eq!(self.call, CallStatus::Idle);
            assert_eq!(self.audio, AudioState::Disconnected);
            assert!(self.active_call.is_none());
        }
        assert_eq!(self.active_call.is_none(), self.call == CallStatus::Idle);
        if let Some(ref call) = self.active_call {
            assert_eq!(call.status, self.call);
        }
    }
}

/// Single mutator; accepts one event at a time under an exclusive lock.
/// The lock is never held across a suspension point.
pub struct StateMachine {
    state: Mutex<HFPState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HFPState::default()),
        }
    }

    /// Immutable by-value snapshot of the current state.
    pub fn snapshot(&self) -> HFPState {
        self.state.lock().expect("state lock poisoned").clone()
    }

    /// Apply a single event to the state. Unspecified events leave state
    /// unchanged.
    pub fn apply(&self, event: &Event) {
        let mut s = self.state.lock().expect("state lock poisoned");
        match event {
            Event::Connecting => {
                s.connection = ConnectionState::Connecting;
            }
            Event::Connected => {
                s.connection = ConnectionState::Connected;
            }
            Event::Disconnected(_) | Event::ConnectFailed(_) => {
                *s = HFPState::default();
            }
            Event::IncomingCall(number) => {
                s.call = CallStatus::Incoming;
                if let Some(ref mut call) = s.active_call {
                    if call.number.is_none() {
                        call.number = number.clone();
                    }
                } else {
                    s.active_call = Some(CallInfo {
                        index: 1,
                        direction: CallDirection::Incoming,
                        status: CallStatus::Incoming,
                        number: number.clone(),
                        start_time: None,
                    });
                }
            }
            Event::CallDialing(number) => {
                s.call = CallStatus::Dialing;
                s.active_call = Some(CallInfo {
                    index: 1,
                    direction: CallDirection::Outgoing,
                    status: CallStatus::Dialing,
                    number: if number.is_empty() {
                        None
                    } else {
                        Some(number.clone())
                    },
                    start_time: None,
                });
            }
            Event::CallAlerting => {
                s.call = CallStatus::Alerting;
                if let Some(ref mut call) = s.active_call {
                    call.status = CallStatus::Alerting;
                }
            }
            Event::CallActive | Event::CallAnswered => {
                set_active(&mut s);
            }
            Event::CallHeld => {
                s.call = CallStatus::Held;
                if let Some(ref mut call) = s.active_call {
                    call.status = CallStatus::Held;
                }
            }
            Event::CallWaiting(number) => {
                s.call = CallStatus::Waiting;
                if let Some(ref mut call) = s.active_call {
                    call.status = CallStatus::Waiting;
                    if call.number.is_none() {
                        call.number = number.clone();
                    }
                } else {
                    s.active_call = Some(CallInfo {
                        index: 1,
                        direction: CallDirection::Incoming,
                        status: CallStatus::Waiting,
                        number: number.clone(),
                        start_time: None,
                    });
                }
            }
            Event::CallEnded => {
                s.call = CallStatus::Idle;
                s.active_call = None;
            }
            Event::CallSetup(k) => match k {
                1 => {
                    s.call = CallStatus::Incoming;
                    if s.active_call.is_none() {
                        s.active_call = Some(CallInfo {
                            index: 1,
                            direction: CallDirection::Incoming,
                            status: CallStatus::Incoming,
                            number: None,
                            start_time: None,
                        });
                    }
                }
                2 => {
                    s.call = CallStatus::Dialing;
                    if let Some(ref mut call) = s.active_call {
                        call.status = CallStatus::Dialing;
                    } else {
                        s.active_call = Some(CallInfo {
                            index: 1,
                            direction: CallDirection::Outgoing,
                            status: CallStatus::Dialing,
                            number: None,
                            start_time: None,
                        });
                    }
                }
                3 => {
                    s.call = CallStatus::Alerting;
                    if let Some(ref mut call) = s.active_call {
                        call.status = CallStatus::Alerting;
                    }
                }
                _ => {}
            },
            Event::CallIndicator(active) => {
                if *active {
                    if s.call != CallStatus::Active {
                        set_active(&mut s);
                    }
                } else {
                    s.call = CallStatus::Idle;
                    s.active_call = None;
                }
            }
            Event::CallHeldIndicator(k) => match k {
                0 => {
                    if s.call == CallStatus::Held {
                        set_active(&mut s);
                    }
                    // else: no-op when not currently held.
                }
                1 | 2 => {
                    s.call = CallStatus::Held;
                    if let Some(ref mut call) = s.active_call {
                        call.status = CallStatus::Held;
                    }
                }
                _ => {}
            },
            Event::ScoConnected => s.audio = AudioState::Connected,
            Event::ScoDisconnected => s.audio = AudioState::Disconnected,
            Event::SignalStrength(v) => {
                s.phone_status.signal_strength = PhoneStatus::clamp_signal(*v);
            }
            Event::BatteryLevel(v) => {
                s.phone_status.battery_level = PhoneStatus::clamp_battery(*v);
            }
            Event::ServiceAvailable(b) => s.phone_status.service_available = *b,
            Event::Roaming(b) => s.phone_status.roaming = *b,
            Event::OperatorName(name) => s.phone_status.operator_name = Some(name.clone()),
            Event::CallerId(number, _name) => {
                if let Some(ref mut call) = s.active_call {
                    call.number = Some(number.clone());
                }
            }
            Event::Error(_) | Event::CallerSpeech(_) => {}
        }
        #[cfg(test)]
        s.check_invariants();
    }
}

fn set_active(s: &mut HFPState) {
    s.call = CallStatus::Active;
    if let Some(ref mut call) = s.active_call {
        call.status = CallStatus::Active;
        if call.start_time.is_none() {
            call.start_time = Some(Instant::now());
        }
    } else {
        s.active_call = Some(CallInfo {
            index: 1,
            direction: CallDirection::Outgoing,
            status: CallStatus::Active,
            number: None,
            start_time: Some(Instant::now()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_call_happy_path() {
        let sm = StateMachine::new();
        sm.apply(&Event::Connected);
        assert_eq!(sm.snapshot().connection, ConnectionState::Connected);
        assert_eq!(sm.snapshot().call, CallStatus::Idle);

        sm.apply(&Event::CallDialing("+15551234567".into()));
        let snap = sm.snapshot();
        assert_eq!(snap.call, CallStatus::Dialing);
        assert!(snap.active_call.unwrap().start_time.is_none());

        sm.apply(&Event::CallAlerting);
        assert_eq!(sm.snapshot().call, CallStatus::Alerting);

        sm.apply(&Event::CallActive);
        let snap = sm.snapshot();
        assert_eq!(snap.call, CallStatus::Active);
        assert!(snap.active_call.unwrap().start_time.is_some());

        sm.apply(&Event::CallEnded);
        let snap = sm.snapshot();
        assert_eq!(snap.call, CallStatus::Idle);
        assert!(snap.active_call.is_none());
    }

    #[test]
    fn incoming_accepted() {
        let sm = StateMachine::new();
        sm.apply(&Event::Connected);
        sm.apply(&Event::IncomingCall(Some("+15559876543".into())));
        let snap = sm.snapshot();
        assert_eq!(snap.call, CallStatus::Incoming);
        let call = snap.active_call.unwrap();
        assert_eq!(call.direction, CallDirection::Incoming);
        assert_eq!(call.number.as_deref(), Some("+15559876543"));

        sm.apply(&Event::CallAnswered);
        let snap = sm.snapshot();
        assert_eq!(snap.call, CallStatus::Active);
        assert!(snap.active_call.unwrap().start_time.is_some());

        sm.apply(&Event::CallEnded);
        let snap = sm.snapshot();
        assert_eq!(snap.call, CallStatus::Idle);
        assert!(snap.active_call.is_none());
    }

    #[test]
    fn transport_loss_mid_call_tears_down_everything() {
        let sm = StateMachine::new();
        sm.apply(&Event::Connected);
        sm.apply(&Event::CallActive);
        sm.apply(&Event::ScoConnected);
        sm.apply(&Event::Disconnected(None));

        let snap = sm.snapshot();
        assert_eq!(snap.connection, ConnectionState::Disconnected);
        assert_eq!(snap.call, CallStatus::Idle);
        assert_eq!(snap.audio, AudioState::Disconnected);
        assert!(snap.active_call.is_none());
    }

    #[test]
    fn hold_then_resume_preserves_start_time() {
        let sm = StateMachine::new();
        sm.apply(&Event::Connected);
        sm.apply(&Event::CallActive);
        let first_start = sm.snapshot().active_call.unwrap().start_time;

        sm.apply(&Event::CallHeldIndicator(1));
        assert_eq!(sm.snapshot().call, CallStatus::Held);

        sm.apply(&Event::CallHeldIndicator(0));
        let snap = sm.snapshot();
        assert_eq!(snap.call, CallStatus::Active);
        assert_eq!(snap.active_call.unwrap().start_time, first_start);
    }

    #[test]
    fn held_indicator_zero_while_not_held_is_noop() {
        let sm = StateMachine::new();
        sm.apply(&Event::Connected);
        sm.apply(&Event::CallHeldIndicator(0));
        assert_eq!(sm.snapshot().call, CallStatus::Idle);
    }

    #[test]
    fn indicator_values_are_clamped() {
        let sm = StateMachine::new();
        sm.apply(&Event::SignalStrength(9));
        assert_eq!(sm.snapshot().phone_status.signal_strength, None);
        sm.apply(&Event::SignalStrength(3));
        assert_eq!(sm.snapshot().phone_status.signal_strength, Some(3));
    }

    #[test]
    fn unspecified_event_leaves_state_unchanged() {
        let sm = StateMachine::new();
        sm.apply(&Event::Connected);
        let before = sm.snapshot();
        sm.apply(&Event::CallerSpeech("hello".into()));
        sm.apply(&Event::Error("oops".into()));
        let after = sm.snapshot();
        assert_eq!(before.connection, after.connection);
        assert_eq!(before.call, after.call);
    }
}
