//! End-to-end tests for `EngineProcessManager` against scripted fake engines.
//!
//! Each fake is a `/bin/sh` script that answers JSON-RPC lines by matching
//! the method name. Every received line is appended to `requests.log` next
//! to the script so tests can inspect what was sent.

#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant},
};

use serde_json::json;
use tempfile::TempDir;

use attest_contracts::{
    assertion::{Assertion, AssertionStatus, TYPE_CONSTRAINT, TYPE_SCHEMA},
    error::AttestError,
    protocol::SubmitPluginResultParams,
    trace::{message_output, Step, StepType, Trace},
};
use attest_engine::{EngineConfig, EngineProcessManager, EngineState};

// Writing an executable while another test thread forks can make exec fail
// with ETXTBSY, so engine tests run one at a time.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Fake engines ─────────────────────────────────────────────────────────────

const INIT_OK: &str = r#"{"engine_version":"0.1.0","protocol_version":1,"capabilities":["layers_1_4"],"missing":[],"compatible":true,"encoding":"json","max_concurrent_requests":64,"max_trace_size_bytes":10485760,"max_steps_per_trace":10000}"#;

const INIT_INCOMPATIBLE: &str =
    r#"{"engine_version":"0.0.1","protocol_version":1,"capabilities":[],"missing":["layers_1_4"],"compatible":false}"#;

struct FakeEngine {
    dir: TempDir,
    path: PathBuf,
}

impl FakeEngine {
    /// `extra_cases` are `case` arms matched before the standard ones;
    /// `after_loop` runs once stdin closes.
    fn new(preamble: &str, init_result: &str, extra_cases: &str, after_loop: &str) -> Self {
        let script = format!(
            r##"#!/bin/sh
{preamble}
log="$(dirname "$0")/requests.log"
echo "fake engine starting with $1" >&2
respond() {{ printf '{{"jsonrpc":"2.0","id":%s,"result":%s}}\n' "$1" "$2"; }}
while IFS= read -r line; do
  printf '%s\n' "$line" >> "$log"
  id=$(printf '%s\n' "$line" | sed -n 's/^{{"jsonrpc":"2.0","id":\([0-9]*\),.*/\1/p')
  case "$line" in
{extra_cases}
    *'"method":"initialize"'*) respond "$id" '{init_result}' ;;
    *'"method":"shutdown"'*) respond "$id" '{{"sessions_completed":1,"assertions_evaluated":2}}'; exit 0 ;;
    *'"method":"evaluate_batch"'*) respond "$id" '{{"results":[{{"assertion_id":"a1","status":"pass","score":1.0,"explanation":"ok"}},{{"assertion_id":"a2","status":"fail","score":0.0,"explanation":"refund over limit"}}],"total_cost":0.0012,"total_duration_ms":7}}' ;;
    *'"method":"submit_plugin_result"'*) respond "$id" '{{"accepted":true}}' ;;
    *'"method":"whoami"'*) respond "$id" "{{\"id\":$id}}" ;;
    *) printf '{{"jsonrpc":"2.0","id":%s,"error":{{"code":-32601,"message":"method not found","data":{{"error_type":"METHOD_NOT_FOUND","retryable":false,"detail":"no handler"}}}}}}\n' "$id" ;;
  esac
done
{after_loop}
"##
        );

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attest-engine");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, path }
    }

    fn ready() -> Self {
        Self::new("", INIT_OK, "", "")
    }

    fn config(&self) -> EngineConfig {
        EngineConfig {
            engine_path: Some(self.path.clone()),
            shutdown_grace_ms: 2_000,
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<serde_json::Value> {
        fs::read_to_string(self.dir.path().join("requests.log"))
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}

fn process_gone(pid: u32) -> bool {
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(pid as libc::pid_t, 0) != 0 }
}

fn sample_trace() -> Trace {
    Trace::new(
        "trc_refund",
        Some("refund-agent".into()),
        message_output("Refund processed."),
        vec![Step::new(StepType::ToolCall, "process_refund")],
    )
}

// ── Handshake ────────────────────────────────────────────────────────────────

#[test]
fn start_performs_handshake() {
    let _serial = serial();
    let fake = FakeEngine::ready();
    let mut engine = EngineProcessManager::new(fake.config());

    let init = engine.start().unwrap();
    assert!(init.compatible);
    assert_eq!(init.engine_version, "0.1.0");
    assert_eq!(init.max_steps_per_trace, 10_000);
    assert_eq!(engine.state(), EngineState::RunningReady);
    assert!(engine.is_running());
    assert_eq!(engine.init_result(), Some(&init));

    engine.stop();

    let sent = fake.requests();
    assert_eq!(sent[0]["method"], "initialize");
    assert_eq!(sent[0]["id"], 1);
    assert_eq!(sent[0]["params"]["sdk_name"], "attest-rust");
    assert_eq!(sent[0]["params"]["protocol_version"], 1);
    assert_eq!(sent[0]["params"]["required_capabilities"], json!(["layers_1_4"]));
    assert_eq!(sent[0]["params"]["preferred_encoding"], "json");
    assert_eq!(sent.last().unwrap()["method"], "shutdown");
}

#[test]
fn start_twice_is_a_usage_error() {
    let _serial = serial();
    let fake = FakeEngine::ready();
    let mut engine = EngineProcessManager::new(fake.config());
    engine.start().unwrap();

    assert!(matches!(engine.start(), Err(AttestError::Usage { .. })));
    assert_eq!(engine.state(), EngineState::RunningReady);
}

#[test]
fn incompatible_engine_fails_but_stays_alive_until_stop() {
    let _serial = serial();
    let fake = FakeEngine::new("", INIT_INCOMPATIBLE, "", "");
    let mut engine = EngineProcessManager::new(fake.config());

    match engine.start() {
        Err(AttestError::CapabilityMismatch { missing }) => assert_eq!(missing, vec!["layers_1_4"]),
        other => panic!("expected CapabilityMismatch, got {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Failed);
    assert!(engine.is_running());
    assert!(matches!(
        engine.send_request("whoami", json!({})),
        Err(AttestError::Usage { .. })
    ));

    let pid = engine.pid().unwrap();
    engine.stop();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(process_gone(pid));
    // No shutdown request is sent to an engine that never became ready.
    assert!(fake.requests().iter().all(|r| r["method"] != "shutdown"));
}

// ── Requests ─────────────────────────────────────────────────────────────────

#[test]
fn ids_increase_and_protocol_errors_keep_engine_ready() {
    let _serial = serial();
    let fake = FakeEngine::ready();
    let mut engine = EngineProcessManager::new(fake.config());
    engine.start().unwrap();

    let err = engine.send_request("no_such_method", json!({})).unwrap_err();
    match &err {
        AttestError::Protocol { code, data, .. } => {
            assert_eq!(*code, -32601);
            assert_eq!(data.as_ref().unwrap().error_type, "METHOD_NOT_FOUND");
        }
        other => panic!("expected Protocol, got {other:?}"),
    }
    assert!(!err.is_retryable());
    assert_eq!(engine.state(), EngineState::RunningReady);

    // initialize = 1, no_such_method = 2
    let result = engine.send_request("whoami", json!({})).unwrap();
    assert_eq!(result["id"], 3);
}

#[test]
fn typed_helpers() {
    let _serial = serial();
    let fake = FakeEngine::ready();
    let mut engine = EngineProcessManager::new(fake.config());
    engine.start().unwrap();

    let assertions = vec![
        Assertion::new("a1", TYPE_SCHEMA, json!({ "target": "output.structured" })),
        Assertion::new("a2", TYPE_CONSTRAINT, json!({ "field": "metadata.cost_usd", "operator": "lte", "value": 0.01 })),
    ];
    let batch = engine.evaluate_batch(&sample_trace(), &assertions).unwrap();
    assert_eq!(batch.results.len(), 2);
    assert!(batch.results[0].passed());
    assert_eq!(batch.results[1].status, AssertionStatus::Fail);
    assert_eq!(batch.total_duration_ms, 7);

    let accepted = engine
        .submit_plugin_result(&SubmitPluginResultParams {
            trace_id: "trc_refund".into(),
            plugin_name: "tone-check".into(),
            assertion_id: "p1".into(),
            status: "pass".into(),
            score: 0.9,
            explanation: "polite".into(),
        })
        .unwrap();
    assert!(accepted);

    engine.stop();
    let sent = fake.requests();
    assert_eq!(sent[1]["params"]["trace"]["trace_id"], "trc_refund");
    assert_eq!(sent[1]["params"]["assertions"][1]["type"], "constraint");
    assert_eq!(sent[2]["params"]["plugin_name"], "tone-check");
}

#[test]
fn closed_stdout_is_a_connection_error() {
    let _serial = serial();
    let fake = FakeEngine::new("", INIT_OK, r#"    *'"method":"die"'*) exit 3 ;;"#, "");
    let mut engine = EngineProcessManager::new(fake.config());
    engine.start().unwrap();

    let err = engine.send_request("die", json!({})).unwrap_err();
    assert!(matches!(err, AttestError::Connection { .. }), "{err:?}");
    assert!(err.is_connection_fatal());
    assert_eq!(engine.state(), EngineState::Failed);

    assert!(matches!(
        engine.send_request("whoami", json!({})),
        Err(AttestError::Usage { .. })
    ));
    engine.stop();
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[test]
fn malformed_response_fails_the_channel() {
    let _serial = serial();
    let fake = FakeEngine::new("", INIT_OK, r#"    *'"method":"garbage"'*) echo 'this is not json' ;;"#, "");
    let mut engine = EngineProcessManager::new(fake.config());
    engine.start().unwrap();

    let err = engine.send_request("garbage", json!({})).unwrap_err();
    assert!(matches!(err, AttestError::Decode { .. }));
    assert_eq!(engine.state(), EngineState::Failed);
}

#[test]
fn non_utf8_response_is_a_decode_error() {
    let _serial = serial();
    let fake = FakeEngine::new("", INIT_OK, r#"    *'"method":"bytes"'*) printf '\377\376garbage\n' ;;"#, "");
    let mut engine = EngineProcessManager::new(fake.config());
    engine.start().unwrap();

    match engine.send_request("bytes", json!({})) {
        Err(AttestError::Decode { reason }) => assert!(reason.contains("UTF-8"), "{reason}"),
        other => panic!("expected Decode, got {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Failed);
}

#[test]
fn mismatched_response_id_is_a_decode_error() {
    let _serial = serial();
    let fake = FakeEngine::new("", INIT_OK, r#"    *'"method":"wrong_id"'*) respond 999 '{}' ;;"#, "");
    let mut engine = EngineProcessManager::new(fake.config());
    engine.start().unwrap();

    match engine.send_request("wrong_id", json!({})) {
        Err(AttestError::Decode { reason }) => assert!(reason.contains("999")),
        other => panic!("expected Decode, got {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Failed);
}

// ── Restart ──────────────────────────────────────────────────────────────────

#[test]
fn failed_engine_can_be_started_again() {
    let _serial = serial();
    let fake = FakeEngine::new("", INIT_OK, r#"    *'"method":"die"'*) exit 3 ;;"#, "");
    let mut engine = EngineProcessManager::new(fake.config());
    engine.start().unwrap();
    let first_pid = engine.pid().unwrap();

    assert!(matches!(engine.send_request("die", json!({})), Err(AttestError::Connection { .. })));
    assert_eq!(engine.state(), EngineState::Failed);

    let init = engine.start().unwrap();
    assert!(init.compatible);
    assert_eq!(engine.state(), EngineState::RunningReady);
    assert!(process_gone(first_pid));
    assert_ne!(engine.pid(), Some(first_pid));

    // Ids restart with the new process: initialize = 1, whoami = 2.
    let result = engine.send_request("whoami", json!({})).unwrap();
    assert_eq!(result["id"], 2);
}

#[test]
fn stopped_engine_can_be_started_again() {
    let _serial = serial();
    let fake = FakeEngine::ready();
    let mut engine = EngineProcessManager::new(fake.config());
    engine.start().unwrap();
    engine.stop();
    assert_eq!(engine.state(), EngineState::Stopped);

    engine.start().unwrap();
    assert_eq!(engine.state(), EngineState::RunningReady);
    assert!(engine.is_running());
    assert_eq!(engine.send_request("whoami", json!({})).unwrap()["id"], 2);

    let initializes = fake.requests().iter().filter(|r| r["method"] == "initialize").count();
    assert_eq!(initializes, 2);
}

// ── Shutdown ─────────────────────────────────────────────────────────────────

#[test]
fn cooperative_engine_stops_within_grace() {
    let _serial = serial();
    let fake = FakeEngine::ready();
    let mut engine = EngineProcessManager::new(fake.config());
    engine.start().unwrap();
    let pid = engine.pid().unwrap();

    let started = Instant::now();
    engine.stop();
    assert!(started.elapsed() < Duration::from_millis(1_500));
    assert!(process_gone(pid));
    assert!(!engine.is_running());

    // Idempotent.
    engine.stop();
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[test]
fn stubborn_engine_is_killed_after_grace() {
    let _serial = serial();
    let fake = FakeEngine::new(
        "trap '' TERM",
        INIT_OK,
        r#"    *'"method":"shutdown"'*) respond "$id" '{}' ;;"#,
        "while :; do sleep 0.05; done",
    );
    let config = EngineConfig {
        shutdown_grace_ms: 200,
        ..fake.config()
    };
    let mut engine = EngineProcessManager::new(config);
    engine.start().unwrap();
    let pid = engine.pid().unwrap();

    let started = Instant::now();
    engine.stop();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200), "stopped after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "stopped after {elapsed:?}");
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(process_gone(pid));
}

#[test]
fn unanswered_shutdown_is_bounded_by_grace() {
    let _serial = serial();
    let fake = FakeEngine::new("", INIT_OK, r#"    *'"method":"shutdown"'*) ;;"#, "");
    let config = EngineConfig {
        shutdown_grace_ms: 200,
        ..fake.config()
    };
    let mut engine = EngineProcessManager::new(config);
    engine.start().unwrap();
    let pid = engine.pid().unwrap();

    let started = Instant::now();
    engine.stop();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200), "stopped after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "stopped after {elapsed:?}");
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(process_gone(pid));
    assert_eq!(fake.requests().last().unwrap()["method"], "shutdown");
}

#[test]
fn drop_stops_the_engine() {
    let _serial = serial();
    let fake = FakeEngine::ready();
    let pid = {
        let mut engine = EngineProcessManager::new(fake.config());
        engine.start().unwrap();
        engine.pid().unwrap()
    };
    assert!(process_gone(pid));
}

// ── Scoped acquisition ───────────────────────────────────────────────────────

#[test]
fn scoped_returns_closure_value() {
    let _serial = serial();
    let fake = FakeEngine::ready();
    let id = EngineProcessManager::scoped(fake.config(), |engine| engine.send_request("whoami", json!({})))
        .unwrap();
    assert_eq!(id["id"], 2);
    assert_eq!(fake.requests().last().unwrap()["method"], "shutdown");
}

#[test]
fn scoped_stops_on_error() {
    let _serial = serial();
    let fake = FakeEngine::ready();
    let mut seen_pid = None;

    let result: Result<(), AttestError> = EngineProcessManager::scoped(fake.config(), |engine| {
        seen_pid = engine.pid();
        Err(AttestError::Usage { reason: "agent gave up".into() })
    });

    assert!(matches!(result, Err(AttestError::Usage { .. })));
    assert!(process_gone(seen_pid.unwrap()));
}

#[test]
fn scoped_stops_on_panic() {
    let _serial = serial();
    let fake = FakeEngine::ready();
    let seen_pid = Mutex::new(None);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        EngineProcessManager::scoped(fake.config(), |engine| -> Result<(), AttestError> {
            *seen_pid.lock().unwrap() = engine.pid();
            panic!("agent crashed");
        })
    }));

    assert!(outcome.is_err());
    let pid = seen_pid.lock().unwrap().unwrap();
    assert!(process_gone(pid));
}

#[test]
fn scoped_stops_when_handshake_fails() {
    let _serial = serial();
    let fake = FakeEngine::new(r#"echo $$ > "$(dirname "$0")/engine.pid""#, INIT_INCOMPATIBLE, "", "");
    let result = EngineProcessManager::scoped(fake.config(), |_| Ok(()));
    assert!(matches!(result, Err(AttestError::CapabilityMismatch { .. })));

    let pid: u32 = fs::read_to_string(fake.dir.path().join("engine.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(process_gone(pid));
}

#[test]
fn log_level_is_passed_on_the_command_line() {
    let _serial = serial();
    let fake = FakeEngine::new(
        r#"ARGS="$1""#,
        INIT_OK,
        r#"    *'"method":"args"'*) respond "$id" "\"$ARGS\"" ;;"#,
        "",
    );
    let config = EngineConfig {
        log_level: "debug".into(),
        ..fake.config()
    };

    let args = EngineProcessManager::scoped(config, |engine| engine.send_request("args", json!({}))).unwrap();
    assert_eq!(args, "--log-level=debug");
}
