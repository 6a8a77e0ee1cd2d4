#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use gpgme_bridge::frame::{chunk, Reassembler, WireFrame};
use gpgme_bridge::host::{Port, PortEvent};
use gpgme_bridge::{Bridge, BridgeConfig};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc;

/// A key the fake engine can encrypt to.
pub const GOOD_FPR: &str = "D4A3E7F9C1B2A0E8F6D5C4B3A2918070E6F5D4C3";
/// Well-formed, but the engine has never heard of it.
pub const UNKNOWN_FPR: &str = "F00DF00DF00DF00DF00DF00DF00DF00DF00DF00D";
/// The engine answers requests for this key with a corrupted frame sequence.
pub const GARBLE_FPR: &str = "BADBADBADBADBADBADBADBADBADBADBADBADBADB";
/// The engine never answers requests for this key.
pub const SLOW_FPR: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Test-side view of a running fake engine.
#[derive(Clone)]
pub struct EngineHandle {
    events: mpsc::UnboundedSender<PortEvent>,
    received: Arc<Mutex<Vec<Value>>>,
    posted: Arc<Mutex<usize>>,
    dropped: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Complete request envelopes the engine has reassembled so far.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Raw frames posted to the engine so far.
    pub fn frames_posted(&self) -> usize {
        *self.posted.lock().unwrap()
    }

    /// Whether the bridge has let go of the engine.
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn disconnect(&self) {
        let _ = self.events.send(PortEvent::Disconnected);
    }

    /// Inject an arbitrary inbound message.
    pub fn inject(&self, message: Value) {
        let _ = self.events.send(PortEvent::Message(message));
    }
}

/// A [`Port`] that plays gpgme-json: it reassembles request frames, "encrypts" for the
/// keys it knows, and answers in frames of `answer_frame_size` bytes.
pub struct FakeEngine {
    handle: EngineHandle,
    requests: HashMap<String, Reassembler>,
    answer_frame_size: usize,
}

impl FakeEngine {
    pub fn new(answer_frame_size: usize) -> (FakeEngine, mpsc::UnboundedReceiver<PortEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = FakeEngine {
            handle: EngineHandle {
                events: tx,
                received: Arc::default(),
                posted: Arc::default(),
                dropped: Arc::default(),
            },
            requests: HashMap::new(),
            answer_frame_size,
        };
        (engine, rx)
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    fn answer(envelope: &Value) -> (Value, bool, bool) {
        let keys: Vec<&str> = envelope["keys"]
            .as_array()
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let garble = keys.contains(&GARBLE_FPR);
        let silent = keys.contains(&SLOW_FPR);
        if let Some(unknown) = keys
            .iter()
            .find(|k| ![GOOD_FPR, GARBLE_FPR, SLOW_FPR].contains(*k))
        {
            let msg = format!("{unknown}: No public key");
            return (json!({"type": "error", "code": 117440521, "msg": msg}), garble, silent);
        }
        let data = envelope["data"].as_str().unwrap_or_default();
        let armored = format!(
            "-----BEGIN PGP MESSAGE-----\n\n{}\n-----END PGP MESSAGE-----\n",
            STANDARD.encode(data)
        );
        (
            json!({"type": "ciphertext", "data": armored, "base64": false}),
            garble,
            silent,
        )
    }

    fn reply(&self, id: &str, answer: &Value, garble: bool) -> io::Result<()> {
        let bytes = serde_json::to_vec(answer)?;
        let frames = chunk(&bytes, self.answer_frame_size)
            .map_err(io::Error::other)?;
        for (n, frame) in frames.into_iter().enumerate() {
            let mut wire = frame.into_wire(id);
            if garble && n == 1 {
                wire.total += 1;
            }
            self.handle.inject(serde_json::to_value(&wire)?);
        }
        Ok(())
    }
}

impl Port for FakeEngine {
    fn post_message(&mut self, message: &Value) -> io::Result<()> {
        *self.handle.posted.lock().unwrap() += 1;
        let wire: WireFrame = serde_json::from_value(message.clone())?;
        let (id, frame) = wire
            .into_frame()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let r = self.requests.entry(id.clone()).or_default();
        r.push(frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if !r.is_complete() {
            return Ok(());
        }
        let Some(r) = self.requests.remove(&id) else {
            return Ok(());
        };
        let bytes = r
            .finish()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let envelope: Value = serde_json::from_slice(&bytes)?;
        self.handle.received.lock().unwrap().push(envelope.clone());

        let (answer, garble, silent) = Self::answer(&envelope);
        if silent {
            return Ok(());
        }
        self.reply(&id, &answer, garble)
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.handle.dropped.store(true, Ordering::SeqCst);
    }
}

/// A port whose writes always fail with `kind`.
pub struct FailingPort(pub io::ErrorKind);

impl Port for FailingPort {
    fn post_message(&mut self, _message: &Value) -> io::Result<()> {
        Err(io::Error::new(self.0, "port refused the message"))
    }
}

/// A port that accepts every frame and never answers. Tests play the engine by
/// injecting frames for the ids it has seen.
pub struct RecordingPort {
    ids: Arc<Mutex<Vec<String>>>,
}

impl Port for RecordingPort {
    fn post_message(&mut self, message: &Value) -> io::Result<()> {
        let wire: WireFrame = serde_json::from_value(message.clone())?;
        let mut ids = self.ids.lock().unwrap();
        if !ids.contains(&wire.id) {
            ids.push(wire.id);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct RecorderHandle {
    ids: Arc<Mutex<Vec<String>>>,
    events: mpsc::UnboundedSender<PortEvent>,
}

impl RecorderHandle {
    /// Correlation ids in the order their first frame was posted.
    pub fn ids(&self) -> Vec<String> {
        self.ids.lock().unwrap().clone()
    }

    /// Wait until `n` distinct requests have reached the port.
    pub async fn wait_for(&self, n: usize) -> Vec<String> {
        loop {
            let ids = self.ids();
            if ids.len() >= n {
                return ids;
            }
            tokio::task::yield_now().await;
        }
    }

    pub fn inject(&self, message: Value) {
        let _ = self.events.send(PortEvent::Message(message));
    }
}

/// Split an engine answer for request `id` into wire frames of `frame_size` bytes.
pub fn answer_frames(id: &str, answer: &Value, frame_size: usize) -> Vec<Value> {
    let bytes = serde_json::to_vec(answer).unwrap();
    chunk(&bytes, frame_size)
        .unwrap()
        .into_iter()
        .map(|f| serde_json::to_value(f.into_wire(id)).unwrap())
        .collect()
}

/// A bridge whose port records requests and leaves answering to the test.
pub fn bridge_with_recorder(config: BridgeConfig) -> (Bridge, RecorderHandle) {
    init_tracing();
    let (events, inbound) = mpsc::unbounded_channel();
    let ids: Arc<Mutex<Vec<String>>> = Arc::default();
    let port = RecordingPort { ids: ids.clone() };
    let bridge = Bridge::spawn(config, port, inbound).expect("spawn bridge");
    (bridge, RecorderHandle { ids, events })
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A bridge wired to a fresh fake engine.
pub fn bridge_with_engine(config: BridgeConfig) -> (Bridge, EngineHandle) {
    init_tracing();
    let (engine, inbound) = FakeEngine::new(64);
    let handle = engine.handle();
    let bridge = Bridge::spawn(config, engine, inbound).expect("spawn bridge");
    (bridge, handle)
}

/// Small frames so every request is split into several.
pub fn small_frames() -> BridgeConfig {
    BridgeConfig {
        max_frame_size: 32,
        ..BridgeConfig::default()
    }
}
