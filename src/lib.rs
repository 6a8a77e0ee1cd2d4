//! # gpgme_bridge
//!
//! The browser-side half of a **native messaging** bridge to a local OpenPGP engine
//! host speaking `gpgme-json` envelopes inside id-tagged frames:
//!
//! - Turn whatever the page passed as "keys" into **validated fingerprints** before
//!   anything leaves the process
//! - Split requests into **size-bounded frames** and put answers back together byte-exactly
//! - Track every in-flight request by **correlation id** and settle it with a typed
//!   [`BridgeError`] when anything goes wrong
//!
//! ---
//!
//! ## How a request travels
//!
//! ```text
//! keys  -> keys::normalize -> Bridge (envelope) -> frame::Chunker -> Port
//!                                                                     |
//! result <- Bridge (correlate) <- frame::Reassembler <- PortEvent <- engine
//! ```
//!
//! Every outbound message on the channel is one [`frame::WireFrame`]:
//!
//! ```json
//! {"id": "<uuid>", "index": 0, "total": 3, "chunk": "<base64>"}
//! ```
//!
//! The frames of one request concatenate to a JSON envelope such as
//! `{"op":"encrypt","keys":["<FPR>"],"data":"hello","armor":true,"base64":false,"chunksize":524288}`.
//! The engine answers with frames carrying the same `id`.
//!
//! A stock `gpgme-json` only sees whole envelopes, so the engine side has to be
//! frame-aware: a small host that reassembles each request by `id`, hands the
//! envelope to gpgme-json, and frames its answer back. `engine.program` names that
//! host.
//!
//! ### Most important gotchas (read this first)
//!
//! - **Size limits are real:** the browser refuses messages above **64 MiB** towards the
//!   engine ([`host::MAX_TO_ENGINE`]) and **1 MiB** back ([`host::MAX_FROM_ENGINE`]).
//!   [`BridgeConfig::validate`] refuses frame sizes that could not round-trip.
//! - **Validation happens first:** bad input rejects with `MSG_INCOMPLETE` (or another
//!   input code) before a single byte is posted.
//! - **Disconnect settles everything:** when the engine goes away every outstanding
//!   request rejects with `CONTEXT_CLOSED`. Nothing is left pending.
//! - **Never log to stdout** when you are the host side of a channel. This crate logs
//!   through `tracing`; install a subscriber that writes to stderr or a file.
//!
//! ---
//!
//! ## Crate layout
//!
//! - [`keys`] — fingerprint checks and key reference normalization.
//! - [`frame`] — chunking and reassembly.
//! - [`bridge`] — the async request lifecycle and [`Bridge::encrypt`].
//! - [`error`] — the closed error taxonomy and [`error::classify`].
//! - [`config`] — explicit size ceilings and timeouts.
//! - [`host`] — native-messaging wire framing and the engine process [`host::Port`].
//!
//! ---
//!
//! ## Quick start
//!
//! ```no_run
//! use gpgme_bridge::{Bridge, BridgeConfig};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let bridge = Bridge::connect_native(BridgeConfig::default())?;
//!
//!     match bridge
//!         .encrypt(Some("hello"), "CC0EF5A0E2C8B1B0A4C4D2B8A8D1F3C2B5E6A7D8")
//!         .await
//!     {
//!         Ok(answer) => eprintln!("{}", answer.data),
//!         Err(e) => eprintln!("encrypt failed with {}: {}", e.code(), e.message()),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Keys from untrusted JSON
//!
//! ```rust
//! use gpgme_bridge::keys::normalize_json;
//! use serde_json::json;
//!
//! let fpr = "D4A3E7F9C1B2A0E8F6D5C4B3A2918070E6F5D4C3";
//! let keys = normalize_json(&json!([fpr, "not-a-fpr", {"primaryKey": {"fingerprint": fpr}}])).unwrap();
//! assert_eq!(keys.to_strings(), vec![fpr.to_string()]);
//! assert_eq!(keys.discarded().len(), 1);
//! ```
//!
//! ## Pure framing
//!
//! ```rust
//! use gpgme_bridge::frame::{chunk, reassemble};
//!
//! let payload = b"some bytes that do not fit in one frame".to_vec();
//! let frames = chunk(&payload, 8).unwrap();
//! assert_eq!(frames.len(), 5);
//! assert_eq!(reassemble(frames).unwrap(), payload);
//! ```
//!
//! ---
//!
//! ## Configuration
//!
//! With the `toml-config` feature (default), a [`BridgeConfig`] can be read from a file.
//! Missing keys keep their defaults:
//!
//! ```toml
//! max_frame_size = 262144
//! response_timeout_ms = 20000
//!
//! [engine]
//! program = "/usr/lib/gpgme-bridge/frame-host"
//! args = ["--engine", "/usr/bin/gpgme-json"]
//! ```
//!
//! ---
//!
//! ## Troubleshooting
//!
//! ### `CONTEXT_CLOSED` right away
//! The engine process exited or could not be started. Check `engine.program`, and
//! look at the engine's stderr (it is inherited).
//!
//! ### `CONN_UNEXPECTED_ANSWER`
//! Something answered that is not a framed engine envelope. Usually the configured
//! program is a bare `gpgme-json` (or something else) instead of a frame-aware host.
//!
//! ### `PAYLOAD_TOO_LARGE`
//! The serialized request is above `payload_ceiling`. Split the data yourself; the
//! bridge never truncates.

pub mod bridge;
pub mod config;
pub mod error;
pub mod frame;
pub mod host;
pub mod keys;

// -------- Bridge re-exports --------

#[doc(inline)]
pub use bridge::{Bridge, EncryptOptions, EncryptResult, Request};
#[doc(inline)]
pub use config::BridgeConfig;

// -------- Error re-exports --------

#[doc(inline)]
pub use error::{classify, BridgeError, BridgeResult, ErrorCode, ErrorKind};

// -------- Keys / framing re-exports --------

#[doc(inline)]
pub use frame::{chunk, reassemble};
#[doc(inline)]
pub use keys::{is_fingerprint, normalize, CanonicalKeySet, Fingerprint, KeyInput, KeyReference};
