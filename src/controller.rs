//! Controller Adapter: a thin request layer that validates
//! inputs, applies policy (proactive audio transfer on dial/accept),
//! invokes engine operations, and returns structured, canonically-ordered
//! JSON results to an external controller (CLI operator or AI tool
//! dispatcher).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::audio::AudioRouter;
use crate::engine::HfpEngine;
use crate::errors::HfpError;
use crate::events::Event;
use crate::voice::VoicePipeline;

/// A canonically-serialisable tool result: UTF-8, object, keys
/// lexicographically sorted, no insignificant whitespace.
///
/// `serde_json::Map` is backed by a `BTreeMap` in this crate's configuration
/// (the `preserve_order` feature is not enabled), so building the result as
/// a plain `Value::Object` and serialising with `to_string` already yields
/// sorted keys — no extra sorting step needed at the call site.
pub struct ToolResult(Value);

impl ToolResult {
    fn success(fields: BTreeMap<&'static str, Value>) -> Self {
        let mut map = serde_json::Map::new();
        map.insert("success".to_string(), Value::Bool(true));
        for (k, v) in fields {
            map.insert(k.to_string(), v);
        }
        Self(Value::Object(map))
    }

    fn error(message: impl Into<String>) -> Self {
        let mut map = serde_json::Map::new();
        map.insert("success".to_string(), Value::Bool(false));
        map.insert("error".to_string(), Value::String(message.into()));
        Self(Value::Object(map))
    }

    /// Canonical JSON byte output.
    pub fn to_canonical_json(&self) -> String {
        serde_json::to_string(&self.0).expect("ToolResult must always serialise")
    }
}

/// Named inputs passed to a tool, as a flat string-keyed map (the engine has
/// no stake in richer typed parameters — the dispatcher's tool schema owns
/// that).
pub type ToolInputs = BTreeMap<String, String>;

pub struct ControllerAdapter {
    engine: Arc<HfpEngine>,
    audio: Arc<dyn AudioRouter>,
    voice: Option<Arc<dyn VoicePipeline>>,
}

impl ControllerAdapter {
    pub fn new(engine: Arc<HfpEngine>, audio: Arc<dyn AudioRouter>) -> Self {
        Self { engine, audio, voice: None }
    }

    pub fn with_voice_pipeline(mut self, voice: Arc<dyn VoicePipeline>) -> Self {
        self.voice = Some(voice);
        self
    }

    /// Dispatch `tool_name` with `inputs`, returning a canonical result.
    /// Missing required parameters and unknown tool names produce
    /// `{success:false, error:...}` rather than failing the call.
    pub async fn execute(&self, tool_name: &str, inputs: ToolInputs) -> ToolResult {
        match tool_name {
            "dial_number" => self.dial_number(&inputs).await,
            "accept_call" => self.accept_call().await,
            "end_call" => self.end_call().await,
            "send_dtmf" => self.send_dtmf(&inputs).await,
            "get_call_status" => self.get_call_status(),
            "get_phone_status" => self.get_phone_status(),
            "say_to_caller" => self.say_to_caller(&inputs).await,
            other => ToolResult::error(format!("Unknown tool: {other}")),
        }
    }

    /// Entry used by upstream controllers to turn an HFP event into a short
    /// text prompt.
    pub fn inject_event(&self, event: &Event) -> Option<String> {
        render_event(event)
    }

    // ── Tools ────────────────────────────────────────────────────────────────

    async fn dial_number(&self, inputs: &ToolInputs) -> ToolResult {
        let Some(number) = inputs.get("number") else {
            return ToolResult::error("Missing required parameter: number");
        };
        let sanitised = sanitise_number(number);

        if let Err(e) = self.engine.dial(&sanitised).await {
            return ToolResult::error(render_error(&e));
        }
        // best-effort, failures ignored
        let _ = self.engine.transfer_audio_to_computer().await;

        let mut fields = BTreeMap::new();
        fields.insert("status", Value::String("dialing".into()));
        fields.insert("number", Value::String(sanitised));
        ToolResult::success(fields)
    }

    async fn accept_call(&self) -> ToolResult {
        if let Err(e) = self.engine.accept_call().await {
            return ToolResult::error(render_error(&e));
        }
        let _ = self.engine.transfer_audio_to_computer().await;
        let _ = self.audio.route_to_bluetooth_device().await;

        let mut fields = BTreeMap::new();
        fields.insert("status", Value::String("answered".into()));
        ToolResult::success(fields)
    }

    async fn end_call(&self) -> ToolResult {
        if let Err(e) = self.engine.end_call().await {
            return ToolResult::error(render_error(&e));
        }
        self.audio.restore_previous_routing().await;

        let mut fields = BTreeMap::new();
        fields.insert("status", Value::String("ended".into()));
        ToolResult::success(fields)
    }

    async fn send_dtmf(&self, inputs: &ToolInputs) -> ToolResult {
        let Some(digit_str) = inputs.get("digit") else {
            return ToolResult::error("Missing required parameter: digit");
        };
        let mut chars = digit_str.chars();
        let (Some(digit), None) = (chars.next(), chars.next()) else {
            return ToolResult::error("command failed: DTMF must be a single character");
        };

        if let Err(e) = self.engine.send_dtmf(digit).await {
            return ToolResult::error(render_error(&e));
        }

        let mut fields = BTreeMap::new();
        fields.insert("status", Value::String("sent".into()));
        fields.insert("digit", Value::String(digit.to_string()));
        ToolResult::success(fields)
    }

    fn get_call_status(&self) -> ToolResult {
        let state = self.engine.state();
        let mut fields = BTreeMap::new();
        fields.insert(
            "call_state",
            Value::String(format!("{:?}", state.call).to_lowercase()),
        );
        fields.insert(
            "audio_connected",
            Value::Bool(state.audio == crate::state::AudioState::Connected),
        );
        if let Some(call) = state.active_call {
            fields.insert(
                "direction",
                Value::String(format!("{:?}", call.direction).to_lowercase()),
            );
            if let Some(number) = call.number {
                fields.insert("number", Value::String(number));
            }
            if let Some(start) = call.start_time {
                fields.insert(
                    "duration",
                    Value::Number(serde_json::Number::from(start.elapsed().as_secs())),
                );
            }
        }
        ToolResult::success(fields)
    }

    fn get_phone_status(&self) -> ToolResult {
        let status = self.engine.state().phone_status;
        let mut fields = BTreeMap::new();
        if let Some(s) = status.signal_strength {
            fields.insert("signal_strength", Value::Number(s.into()));
        }
        if let Some(b) = status.battery_level {
            fields.insert("battery_level", Value::Number(b.into()));
        }
        fields.insert("service_available", Value::Bool(status.service_available));
        fields.insert("roaming", Value::Bool(status.roaming));
        if let Some(name) = status.operator_name {
            fields.insert("operator_name", Value::String(name));
        }
        ToolResult::success(fields)
    }

    async fn say_to_caller(&self, inputs: &ToolInputs) -> ToolResult {
        let Some(text) = inputs.get("text") else {
            return ToolResult::error("Missing required parameter: text");
        };
        let Some(voice) = self.voice.clone() else {
            return ToolResult::error("no voice pipeline configured");
        };

        let text = text.clone();
        // Enqueue asynchronously and return immediately —
        // the Controller Adapter does not await playback.
        tokio::spawn(async move {
            let _ = voice.speak(&text).await;
        });

        let mut fields = BTreeMap::new();
        fields.insert("status", Value::String("speaking".into()));
        fields.insert("text", Value::String(text));
        ToolResult::success(fields)
    }
}

fn render_error(e: &HfpError) -> String {
    e.to_string()
}

/// Retain only `[0-9+*#]`, drop all other characters (number
/// sanitisation).
fn sanitise_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '+' | '*' | '#'))
        .collect()
}

/// Render an [`Event`] as a short human/agent-facing text prompt. Shared by
/// `inject_event` and the CLI's `agent` mode.
pub fn render_event(event: &Event) -> Option<String> {
    match event {
        Event::Connecting => Some("Connecting to phone.".into()),
        Event::Connected => Some("Connected to phone.".into()),
        Event::Disconnected(_) => Some("Disconnected from phone.".into()),
        Event::ConnectFailed(reason) => Some(format!(
            "Failed to connect to phone{}.",
            reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default()
        )),
        Event::IncomingCall(number) => Some(format!(
            "Incoming call{}.",
            number.as_ref().map(|n| format!(" from {n}")).unwrap_or_default()
        )),
        Event::CallAnswered => Some("Call answered.".into()),
        Event::CallEnded => Some("Call ended.".into()),
        Event::CallDialing(number) => Some(format!("Dialing {number}.")),
        Event::CallAlerting => Some("Ringing remote party.".into()),
        Event::CallActive => Some("Call is active.".into()),
        Event::CallHeld => Some("Call is on hold.".into()),
        Event::CallWaiting(number) => Some(format!(
            "Call waiting{}.",
            number.as_ref().map(|n| format!(" from {n}")).unwrap_or_default()
        )),
        Event::ScoConnected => Some("Audio connected.".into()),
        Event::ScoDisconnected => Some("Audio disconnected.".into()),
        Event::CallerSpeech(text) => Some(format!("Caller said: {text}")),
        Event::Error(message) => Some(format!("Error: {message}")),
        Event::SignalStrength(_)
        | Event::BatteryLevel(_)
        | Event::ServiceAvailable(_)
        | Event::Roaming(_)
        | Event::CallSetup(_)
        | Event::CallIndicator(_)
        | Event::CallHeldIndicator(_)
        | Event::CallerId(_, _)
        | Event::OperatorName(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullAudioRouter;
    use crate::engine::EngineConfig;
    use crate::transport::MockTransport;

    fn inputs(pairs: &[(&str, &str)]) -> ToolInputs {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    async fn adapter() -> ControllerAdapter {
        let transport = Arc::new(MockTransport::new());
        let engine = Arc::new(HfpEngine::new(transport, EngineConfig::default()));
        engine.connect().await.unwrap();
        ControllerAdapter::new(engine, Arc::new(NullAudioRouter))
    }

    #[tokio::test]
    async fn missing_required_parameter() {
        let adapter = adapter().await;
        let result = adapter.execute("dial_number", inputs(&[])).await;
        assert_eq!(
            result.to_canonical_json(),
            r#"{"error":"Missing required parameter: number","success":false}"#
        );
    }

    #[tokio::test]
    async fn unknown_tool() {
        let adapter = adapter().await;
        let result = adapter.execute("frob", inputs(&[])).await;
        assert_eq!(
            result.to_canonical_json(),
            r#"{"error":"Unknown tool: frob","success":false}"#
        );
    }

    #[tokio::test]
    async fn send_dtmf_success_is_canonical() {
        let adapter = adapter().await;
        let result = adapter.execute("send_dtmf", inputs(&[("digit", "5")])).await;
        assert_eq!(
            result.to_canonical_json(),
            r#"{"digit":"5","status":"sent","success":true}"#
        );
    }

    #[tokio::test]
    async fn send_dtmf_rejects_multi_character() {
        let adapter = adapter().await;
        let result = adapter.execute("send_dtmf", inputs(&[("digit", "55")])).await;
        let json = result.to_canonical_json();
        assert!(json.contains("\"success\":false"));
    }

    #[tokio::test]
    async fn dial_number_sanitises_input() {
        let adapter = adapter().await;
        let result = adapter
            .execute("dial_number", inputs(&[("number", "+1 (555) 123-4567")]))
            .await;
        assert_eq!(
            result.to_canonical_json(),
            r#"{"number":"+15551234567","status":"dialing","success":true}"#
        );
    }

    #[tokio::test]
    async fn say_to_caller_without_voice_pipeline_errors() {
        let adapter = adapter().await;
        let result = adapter
            .execute("say_to_caller", inputs(&[("text", "hello")]))
            .await;
        assert!(result.to_canonical_json().contains("\"success\":false"));
    }

    #[test]
    fn serialising_same_result_twice_is_byte_identical() {
        let mut fields = BTreeMap::new();
        fields.insert("b", Value::String("2".into()));
        fields.insert("a", Value::String("1".into()));
        let r1 = ToolResult::success(fields.clone());
        let r2 = ToolResult::success(fields);
        assert_eq!(r1.to_canonical_json(), r2.to_canonical_json());
        assert_eq!(r1.to_canonical_json(), r#"{"a":"1","b":"2","success":true}"#);
    }
}
