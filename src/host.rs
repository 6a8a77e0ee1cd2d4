use serde::Serialize;
use serde_json::Value;
use std::io::{self, Read, Write};
use tokio::sync::mpsc;

pub const MAX_TO_ENGINE: usize = 64 * 1_048_576; // 64 MB (browser -> host)
pub const MAX_FROM_ENGINE: usize = 1_048_576; // 1 MB (host -> browser)

#[inline]
fn read_exact_u32_len<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    Ok(u32::from_ne_bytes(len_buf))
}

/// Encode any serde-serializable value into the native-messaging frame:
/// 4-byte native-endian length + JSON bytes.
pub fn encode_message<T: Serialize>(msg: &T) -> io::Result<Vec<u8>> {
    let json = serde_json::to_vec(msg)?;
    if json.len() > MAX_TO_ENGINE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "outgoing message exceeds 64MB",
        ));
    }
    let mut out = Vec::with_capacity(4 + json.len());
    out.extend_from_slice(&(json.len() as u32).to_ne_bytes());
    out.extend_from_slice(&json);
    Ok(out)
}

/// Decode a single framed message from a reader.
pub fn decode_message<R: Read>(reader: &mut R, max_size: usize) -> io::Result<String> {
    let len = read_exact_u32_len(&mut *reader)? as usize;
    let cap = max_size.min(MAX_FROM_ENGINE);
    if len > cap {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "incoming message too large",
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// What the engine side of the channel produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PortEvent {
    Message(Value),
    Disconnected,
}

/// Outbound half of a native-messaging channel.
///
/// `post_message` runs on the bridge task and must not block: not on the engine's
/// answer, and not on the engine reading its input. Replies arrive separately as
/// [`PortEvent`]s.
pub trait Port: Send + 'static {
    fn post_message(&mut self, message: &Value) -> io::Result<()>;
}

/// Read framed messages until EOF or a framing error, then report `Disconnected`.
pub fn pump_messages<R: Read>(mut reader: R, events: mpsc::UnboundedSender<PortEvent>) {
    loop {
        let raw = match decode_message(&mut reader, MAX_FROM_ENGINE) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    tracing::warn!(error = %e, "engine stream failed");
                }
                break;
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(v) => {
                if events.send(PortEvent::Message(v)).is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(error = %e, "dropping engine message that is not JSON"),
        }
    }
    let _ = events.send(PortEvent::Disconnected);
}

#[cfg(feature = "native-port")]
pub use native::NativePort;

#[cfg(feature = "native-port")]
mod native {
    use super::{encode_message, pump_messages, Port, PortEvent};
    use crate::config::EngineConfig;
    use serde_json::Value;
    use std::io::{self, Write};
    use std::process::{Child, ChildStdin, Command, Stdio};
    use tokio::sync::mpsc;

    /// A [`Port`] backed by an engine child process speaking native messaging on stdio.
    ///
    /// Frames are handed to a writer thread, so `post_message` never waits on the
    /// engine draining its stdin. A failed write reports `Disconnected`.
    ///
    /// Dropping the port closes the engine's stdin and kills the process.
    pub struct NativePort {
        child: Child,
        outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    }

    impl NativePort {
        pub fn spawn(
            engine: &EngineConfig,
        ) -> io::Result<(NativePort, mpsc::UnboundedReceiver<PortEvent>)> {
            let mut child = Command::new(&engine.program)
                .args(&engine.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdin missing"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "engine stdout missing"))?;

            let (events, rx) = mpsc::unbounded_channel();
            let (outbound, frames) = mpsc::unbounded_channel();
            let writer_events = events.clone();
            std::thread::Builder::new()
                .name("engine-writer".into())
                .spawn(move || write_frames(stdin, frames, writer_events))?;
            std::thread::Builder::new()
                .name("engine-reader".into())
                .spawn(move || pump_messages(stdout, events))?;

            tracing::debug!(program = %engine.program.display(), pid = child.id(), "engine started");
            Ok((
                NativePort {
                    child,
                    outbound: Some(outbound),
                },
                rx,
            ))
        }
    }

    fn write_frames(
        mut stdin: ChildStdin,
        mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
        events: mpsc::UnboundedSender<PortEvent>,
    ) {
        while let Some(frame) = frames.blocking_recv() {
            if let Err(e) = stdin.write_all(&frame).and_then(|()| stdin.flush()) {
                tracing::warn!(error = %e, "writing to engine failed");
                let _ = events.send(PortEvent::Disconnected);
                return;
            }
        }
    }

    impl Port for NativePort {
        fn post_message(&mut self, message: &Value) -> io::Result<()> {
            let frame = encode_message(message)?;
            self.outbound
                .as_ref()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "engine stdin closed"))?
                .send(frame)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "engine writer has stopped"))
        }
    }

    impl Drop for NativePort {
        fn drop(&mut self) {
            // The writer thread closes stdin once its queue is gone.
            drop(self.outbound.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// A [`Port`] that writes framed messages to any writer. Useful for tests and for
/// in-memory or otherwise non-blocking writers. A pipe to a live process needs its
/// own writer thread, as `NativePort` has.
pub struct WriterPort<W: Write + Send + 'static> {
    writer: W,
}

impl<W: Write + Send + 'static> WriterPort<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send + 'static> Port for WriterPort<W> {
    fn post_message(&mut self, message: &Value) -> io::Result<()> {
        let frame = encode_message(message)?;
        self.writer.write_all(&frame)?;
        self.writer.flush()
    }
}
