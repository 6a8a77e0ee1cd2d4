//! The asynchronous request/response bridge.
//!
//! A [`Bridge`] is a cheap handle to a background task. The task exclusively owns the
//! map of in-flight requests, posts outbound frames to the [`Port`], and routes inbound
//! frames to the request they belong to by correlation id. Callers only ever see a
//! settled `Result`.

use crate::config::BridgeConfig;
use crate::error::{classify, BridgeResult, FailureSource, InputFault};
use crate::frame::{Reassembler, WireFrame};
use crate::host::{Port, PortEvent};
use crate::keys::{normalize, KeyInput};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::HashMap, io};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A generic engine request: `{"op": <op>, ...params}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    op: String,
    params: Map<String, Value>,
}

impl Request {
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    fn into_envelope(self, chunksize: usize) -> Value {
        let mut obj = self.params;
        obj.insert("op".into(), Value::String(self.op));
        obj.insert("chunksize".into(), Value::from(chunksize));
        Value::Object(obj)
    }
}

/// Engine-side options for `encrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptOptions {
    /// Ask for ASCII-armored output.
    pub armor: bool,
    /// The input `data` is already base64 encoded.
    pub base64: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub always_trust: bool,
    /// Do not include recipient key IDs in the output.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub wildcard: bool,
    /// Requested output encoding, e.g. `"base64"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect: Option<String>,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            armor: true,
            base64: false,
            always_trust: false,
            wildcard: false,
            expect: None,
        }
    }
}

/// A successful encryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptResult {
    /// Ciphertext; armored text unless `base64` is set.
    pub data: String,
    #[serde(default)]
    pub base64: bool,
    /// The engine's answer type, normally `"ciphertext"`.
    #[serde(rename = "type")]
    pub format: String,
}

impl EncryptResult {
    pub fn is_armored(&self) -> bool {
        !self.base64
            && self.data.contains("-----BEGIN PGP MESSAGE-----")
            && self.data.contains("-----END PGP MESSAGE-----")
    }
}

enum Command {
    Dispatch {
        id: String,
        frames: Vec<WireFrame>,
        reply: oneshot::Sender<BridgeResult<Value>>,
    },
    Abandon {
        id: String,
    },
    Close,
}

struct PendingOperation {
    reassembler: Reassembler,
    reply: oneshot::Sender<BridgeResult<Value>>,
}

/// Handle to a running bridge. Clones share the same task.
#[derive(Clone)]
pub struct Bridge {
    commands: mpsc::Sender<Command>,
    config: BridgeConfig,
}

impl Bridge {
    /// Validate `config` and start the bridge task on the current tokio runtime.
    pub fn spawn<P: Port>(
        config: BridgeConfig,
        port: P,
        inbound: mpsc::UnboundedReceiver<PortEvent>,
    ) -> io::Result<Bridge> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(io::Error::other)?;

        let (tx, rx) = mpsc::channel(config.command_queue);
        let task = BridgeTask {
            port: Some(port),
            commands: rx,
            inbound,
            pending: HashMap::new(),
            ceiling: config.payload_ceiling,
        };
        runtime.spawn(task.run());
        Ok(Bridge {
            commands: tx,
            config,
        })
    }

    /// Launch the configured engine process and bridge to it.
    #[cfg(feature = "native-port")]
    pub fn connect_native(config: BridgeConfig) -> io::Result<Bridge> {
        config.validate()?;
        let (port, inbound) = crate::host::NativePort::spawn(&config.engine)?;
        Bridge::spawn(config, port, inbound)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Encrypt `data` for `keys` with default options (armored output).
    pub async fn encrypt(
        &self,
        data: Option<&str>,
        keys: impl Into<KeyInput>,
    ) -> BridgeResult<EncryptResult> {
        self.encrypt_with(data, keys, &EncryptOptions::default())
            .await
    }

    pub async fn encrypt_with(
        &self,
        data: Option<&str>,
        keys: impl Into<KeyInput>,
        options: &EncryptOptions,
    ) -> BridgeResult<EncryptResult> {
        let data = match data {
            Some(d) if !d.is_empty() => d,
            _ => {
                return Err(classify(
                    FailureSource::Input(InputFault::Missing),
                    "encrypt needs non-empty data",
                ))
            }
        };
        let keys = normalize(&keys.into()).map_err(|e| {
            classify(
                FailureSource::Input(InputFault::Missing),
                &format!("encrypt needs at least one valid key ({e})"),
            )
        })?;

        let mut request = Request::new("encrypt")
            .param("keys", keys.to_strings())
            .param("data", data);
        if let Value::Object(opts) = serde_json::to_value(options).map_err(|e| {
            classify(FailureSource::Input(InputFault::WrongShape), &e.to_string())
        })? {
            request.params.extend(opts);
        }

        let answer = self.request(request).await?;
        serde_json::from_value(answer).map_err(|e| {
            classify(
                FailureSource::Malformed,
                &format!("encrypt answer has the wrong shape: {e}"),
            )
        })
    }

    /// Send any engine request and wait for its answer.
    ///
    /// Fails before touching the transport if the serialized request exceeds the
    /// payload ceiling.
    pub async fn request(&self, request: Request) -> BridgeResult<Value> {
        if request.op.is_empty() {
            return Err(classify(
                FailureSource::Input(InputFault::Missing),
                "request has no operation",
            ));
        }
        let op = request.op.clone();
        let envelope = request.into_envelope(self.config.max_frame_size);
        let bytes = serde_json::to_vec(&envelope).map_err(|e| {
            classify(FailureSource::Input(InputFault::WrongShape), &e.to_string())
        })?;
        let frames = self.config.chunker().chunk(&bytes)?;

        let id = Uuid::new_v4().to_string();
        let frames: Vec<WireFrame> = frames.into_iter().map(|f| f.into_wire(id.as_str())).collect();
        debug!(%id, %op, bytes = bytes.len(), frames = frames.len(), "dispatching request");

        let (reply, settled) = oneshot::channel();
        self.commands
            .send(Command::Dispatch {
                id: id.clone(),
                frames,
                reply,
            })
            .await
            .map_err(|_| classify(FailureSource::Closed, "bridge task has stopped"))?;

        let outcome = match self.config.response_timeout() {
            Some(limit) => match tokio::time::timeout(limit, settled).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let _ = self.commands.send(Command::Abandon { id: id.clone() }).await;
                    warn!(%id, %op, "request timed out");
                    return Err(classify(
                        FailureSource::Timeout,
                        &format!("no answer within {} ms", limit.as_millis()),
                    ));
                }
            },
            None => settled.await,
        };
        outcome.map_err(|_| {
            classify(
                FailureSource::Closed,
                "bridge task stopped before the request settled",
            )
        })?
    }

    /// Tear down the channel: every in-flight request rejects with `CONTEXT_CLOSED`,
    /// and so does every later call.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }
}

struct BridgeTask<P: Port> {
    /// `None` once the channel is torn down.
    port: Option<P>,
    commands: mpsc::Receiver<Command>,
    inbound: mpsc::UnboundedReceiver<PortEvent>,
    pending: HashMap<String, PendingOperation>,
    ceiling: usize,
}

impl<P: Port> BridgeTask<P> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        self.teardown("bridge handle dropped");
                        return;
                    }
                },
                event = self.inbound.recv(), if self.port.is_some() => match event {
                    Some(PortEvent::Message(msg)) => self.handle_message(msg),
                    Some(PortEvent::Disconnected) | None => self.teardown("engine disconnected"),
                },
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Dispatch { id, frames, reply } => {
                if self.port.is_none() {
                    let _ = reply.send(Err(classify(
                        FailureSource::Closed,
                        "the channel is closed",
                    )));
                    return;
                }
                // Register first: the engine may answer before the last frame is posted.
                self.pending.insert(
                    id.clone(),
                    PendingOperation {
                        reassembler: Reassembler::with_ceiling(self.ceiling),
                        reply,
                    },
                );
                for frame in frames {
                    let Some(port) = self.port.as_mut() else {
                        break;
                    };
                    let posted = serde_json::to_value(&frame)
                        .map_err(io::Error::from)
                        .and_then(|msg| port.post_message(&msg));
                    if let Err(e) = posted {
                        warn!(%id, error = %e, "posting frame failed");
                        self.settle(&id, Err(classify(FailureSource::Transport(&e), "")));
                        return;
                    }
                }
            }
            Command::Abandon { id } => {
                self.pending.remove(&id);
            }
            Command::Close => self.teardown("closed by caller"),
        }
    }

    fn handle_message(&mut self, msg: Value) {
        let wire: WireFrame = match serde_json::from_value(msg) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(error = %e, "dropping message that is not a frame");
                return;
            }
        };
        let id = wire.id.clone();
        let Some(op) = self.pending.get_mut(&id) else {
            warn!(%id, "dropping frame for unknown request");
            return;
        };

        let pushed = wire
            .into_frame()
            .and_then(|(_, frame)| op.reassembler.push(frame));
        let complete = op.reassembler.is_complete();
        match pushed {
            Err(err) => self.settle(&id, Err(err)),
            Ok(()) if complete => {
                if let Some(op) = self.pending.remove(&id) {
                    let outcome = op.reassembler.finish().and_then(|b| parse_answer(&b));
                    debug!(%id, ok = outcome.is_ok(), "request settled");
                    let _ = op.reply.send(outcome);
                }
            }
            Ok(()) => {}
        }
    }

    fn settle(&mut self, id: &str, outcome: BridgeResult<Value>) {
        if let Some(op) = self.pending.remove(id) {
            if let Err(e) = &outcome {
                debug!(%id, code = %e.code(), "request rejected");
            }
            let _ = op.reply.send(outcome);
        }
    }

    fn teardown(&mut self, reason: &str) {
        if let Some(port) = self.port.take() {
            info!(reason, outstanding = self.pending.len(), "bridge channel closed");
            drop(port);
        }
        for (_, op) in self.pending.drain() {
            let _ = op.reply.send(Err(classify(FailureSource::Closed, reason)));
        }
    }
}

/// Interpret a reassembled engine answer.
pub fn parse_answer(bytes: &[u8]) -> BridgeResult<Value> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| {
        classify(
            FailureSource::Malformed,
            &format!("engine answer is not JSON: {e}"),
        )
    })?;
    let Some(obj) = value.as_object() else {
        return Err(classify(
            FailureSource::Malformed,
            "engine answer is not an object",
        ));
    };
    match obj.get("type").and_then(Value::as_str) {
        Some("error") => {
            let msg = obj.get("msg").and_then(Value::as_str).unwrap_or_default();
            let code = obj.get("code").and_then(Value::as_i64);
            Err(classify(FailureSource::Engine { code }, msg))
        }
        Some(_) => Ok(value),
        None => Err(classify(
            FailureSource::Malformed,
            "engine answer has no type",
        )),
    }
}
