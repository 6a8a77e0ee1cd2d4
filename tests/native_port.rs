#![cfg(all(unix, feature = "native-port"))]

use gpgme_bridge::config::EngineConfig;
use gpgme_bridge::{Bridge, BridgeConfig, ErrorCode};
use std::io;
use std::time::{Duration, Instant};

const FPR: &str = "D4A3E7F9C1B2A0E8F6D5C4B3A2918070E6F5D4C3";

fn engine(program: &str) -> BridgeConfig {
    BridgeConfig {
        max_frame_size: 64,
        engine: EngineConfig {
            program: program.into(),
            args: Vec::new(),
        },
        ..BridgeConfig::default()
    }
}

#[tokio::test]
async fn echoed_request_is_an_unexpected_answer() {
    // `cat` sends our own frames back: they reassemble, but not into an engine answer.
    let bridge = Bridge::connect_native(engine("cat")).expect("spawn cat");
    let err = bridge
        .encrypt(Some("hello through a real pipe"), FPR)
        .await
        .expect_err("not an engine");
    assert_eq!(err.code(), ErrorCode::ConnUnexpectedAnswer);
}

#[tokio::test]
async fn exited_engine_closes_the_context() {
    let bridge = Bridge::connect_native(engine("true")).expect("spawn true");
    let err = bridge
        .encrypt(Some("hello"), FPR)
        .await
        .expect_err("engine gone");
    assert_eq!(err.code(), ErrorCode::ContextClosed);
}

#[tokio::test]
async fn missing_engine_fails_to_connect() {
    match Bridge::connect_native(engine("/nonexistent/gpgme-json")) {
        Ok(_) => panic!("spawned a program that does not exist"),
        Err(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
    }
}

#[tokio::test]
async fn engine_that_never_reads_still_times_out() {
    // `sleep` never drains its stdin, so a multi-megabyte request fills the pipe.
    let config = BridgeConfig {
        response_timeout_ms: Some(100),
        engine: EngineConfig {
            program: "sleep".into(),
            args: vec!["30".into()],
        },
        ..BridgeConfig::default()
    };
    let bridge = Bridge::connect_native(config).expect("spawn sleep");
    let data = "x".repeat(2 * 1_048_576);

    let started = Instant::now();
    let err = bridge
        .encrypt(Some(data.as_str()), FPR)
        .await
        .expect_err("no answer");
    assert_eq!(err.code(), ErrorCode::ConnTimeout);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "took {:?}",
        started.elapsed()
    );

    // The task is not stuck behind the pipe: a second request times out as well.
    let err = bridge
        .encrypt(Some("hello"), FPR)
        .await
        .expect_err("still no answer");
    assert_eq!(err.code(), ErrorCode::ConnTimeout);
}
