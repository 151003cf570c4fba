/*
 * gateway_integration.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * End-to-end tests for the gateway: pipeline execution against the default
 * processor set, recipient validation, timeouts with late completion,
 * panic recovery, and lifecycle state legality.
 *
 * Run with:
 *   cargo test -p casellario_core --test gateway_integration
 */

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use casellario_core::backend::processor::{Processor, ProcessorResult, Task};
use casellario_core::backend::registry::ProcessorInstance;
use casellario_core::backend::result::ProcessorError;
use casellario_core::backend::Envelope;
use casellario_core::processors::redis::{with_driver, CacheDriver, CacheError};
use casellario_core::{ConfigTree, Gateway, MailAddress, ProcessorRegistry, RcptError, SharedEnvelope};

fn envelope_with_body(body: &[u8]) -> SharedEnvelope {
    let mut e = Envelope::default();
    e.helo = "client.example".to_string();
    e.mail_from = MailAddress::parse("sender@example.com");
    e.rcpt_to.push(MailAddress::parse("rcpt@example.com"));
    e.set_data(body);
    SharedEnvelope::new(e)
}

fn running_gateway(config: &str, registry: ProcessorRegistry) -> Gateway {
    let tree = ConfigTree::from_json(config).unwrap();
    let gw = Gateway::new("default", tree, registry).unwrap();
    gw.initialize().unwrap();
    gw.start().unwrap();
    gw
}

#[test]
fn save_pipeline_parses_headers() {
    let gw = running_gateway(
        r#"{"processors": {"debugger": {"log_received_mails": true}},
            "gateways": {"default": {
                "save_process": "HeadersParser|Debugger",
                "save_workers_size": 1
            }}}"#,
        ProcessorRegistry::with_defaults(),
    );
    let env = envelope_with_body(b"Subject: Test\n\nThis is a test.\n.\n");
    let result = gw.process(&env);
    assert!(result.is_success(), "got {}", result);
    assert_eq!(env.lock().header("Subject"), Some("Test"));
    gw.shutdown().unwrap();
}

/// Cache driver that records every SETEX it sees.
struct RecordingCache {
    commands: Arc<Mutex<Vec<(String, String, u64)>>>,
}

impl CacheDriver for RecordingCache {
    fn setex(&mut self, key: &str, expiry_secs: u64, _value: &[u8]) -> Result<(), CacheError> {
        self.commands
            .lock()
            .unwrap()
            .push(("SETEX".to_string(), key.to_string(), expiry_secs));
        Ok(())
    }
    fn close(&mut self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[test]
fn hasher_and_cache_pipeline_issues_setex() {
    let commands = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ProcessorRegistry::with_defaults();
    let seen = Arc::clone(&commands);
    registry.register("redis", move |cfg, next| {
        let driver = Arc::new(Mutex::new(RecordingCache {
            commands: Arc::clone(&seen),
        }));
        with_driver(driver, cfg, next)
    });

    let gw = running_gateway(
        r#"{"processors": {"redis": {"redis_expire_seconds": 7200}},
            "gateways": {"default": {"save_process": "Hasher|Redis"}}}"#,
        registry,
    );
    let env = envelope_with_body(b"Subject: cached\n\nbody\n");
    let result = gw.process(&env);
    assert!(result.as_str().contains("250 2.0.0 OK"), "got {}", result);
    gw.shutdown().unwrap();

    let commands = commands.lock().unwrap();
    assert_eq!(commands.len(), 1);
    let (cmd, key, ttl) = &commands[0];
    assert_eq!(cmd, "SETEX");
    assert_eq!(*ttl, 7200);
    // One recipient: the key is the recipient hash.
    assert_eq!(key, &env.lock().hashes[0]);
}

struct Sleepy {
    delay: Duration,
    next: Box<dyn Processor>,
}

impl Processor for Sleepy {
    fn process(&mut self, e: &mut Envelope, task: Task) -> ProcessorResult {
        thread::sleep(self.delay);
        self.next.process(e, task)
    }
}

fn registry_with_sleepy(delay: Duration) -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::with_defaults();
    registry.register("sleepy", move |_cfg, next| {
        Ok(ProcessorInstance::plain(Sleepy { delay, next }))
    });
    registry
}

#[test]
fn save_timeout_returns_early_and_claims_envelope() {
    let gw = running_gateway(
        r#"{"gateways": {"default": {
            "save_process": "sleepy",
            "save_timeout": "100ms"
        }}}"#,
        registry_with_sleepy(Duration::from_millis(500)),
    );
    let env = envelope_with_body(b"x");
    let started = Instant::now();
    let result = gw.process(&env);
    let elapsed = started.elapsed();
    assert_eq!(result.code(), 554);
    assert!(result.as_str().contains("timed out"), "got {}", result);
    assert!(elapsed < Duration::from_millis(250), "took {:?}", elapsed);
    // The worker is still writing: the claim token protects the envelope.
    assert!(env.is_busy());

    thread::sleep(Duration::from_secs(1));
    assert!(!env.is_busy());
    assert!(gw.pool_size() >= 1);
    gw.shutdown().unwrap();
}

#[test]
fn timeouts_never_leak_workers_and_pool_stays_bounded() {
    let gw = running_gateway(
        r#"{"gateways": {"default": {
            "save_process": "sleepy",
            "save_timeout": "50ms"
        }}}"#,
        registry_with_sleepy(Duration::from_millis(300)),
    );
    assert_eq!(gw.worker_count(), 1);
    let envs: Vec<SharedEnvelope> = (0..3).map(|_| envelope_with_body(b"m")).collect();
    for env in &envs {
        let result = gw.process(env);
        assert_eq!(result.code(), 554);
    }
    // Let every belated completion drain.
    thread::sleep(Duration::from_secs(2));
    for env in &envs {
        assert!(!env.is_busy());
    }
    assert_eq!(gw.worker_count(), 1);
    assert!(gw.pool_size() <= 128);
    // The worker is still alive and replying.
    let result = gw.process(&envelope_with_body(b"again"));
    assert_eq!(result.code(), 554);
    gw.shutdown().unwrap();
}

struct Panicky;

impl Processor for Panicky {
    fn process(&mut self, _e: &mut Envelope, _task: Task) -> ProcessorResult {
        panic!("processor exploded");
    }
}

#[test]
fn panic_is_recovered_and_worker_restarts() {
    let mut registry = ProcessorRegistry::with_defaults();
    registry.register("panicky", |_cfg, _next| Ok(ProcessorInstance::plain(Panicky)));
    let gw = running_gateway(
        r#"{"gateways": {"default": {"save_process": "panicky"}}}"#,
        registry,
    );
    for _ in 0..2 {
        let env = envelope_with_body(b"boom");
        let result = gw.process(&env);
        assert_eq!(result.code(), 554);
        assert!(result.as_str().contains("storage failed"), "got {}", result);
    }
    assert_eq!(gw.worker_count(), 1);
    gw.shutdown().unwrap();
}

#[test]
fn lifecycle_state_legality() {
    let tree = ConfigTree::from_json(r#"{"gateways": {"default": {}}}"#).unwrap();
    let gw = Gateway::new("default", tree, ProcessorRegistry::with_defaults()).unwrap();

    // Not running yet: submissions are refused with the state name.
    let env = envelope_with_body(b"x");
    let result = gw.process(&env);
    assert_eq!(result.code(), 554);
    assert!(result.as_str().contains("backend not running"));
    assert!(result.as_str().contains("new"));

    // Start before initialize is illegal.
    assert!(gw.start().is_err());
    gw.initialize().unwrap();
    gw.start().unwrap();

    // Start while running is illegal; so is initialize.
    assert!(gw.start().is_err());
    assert!(gw.initialize().is_err());

    gw.shutdown().unwrap();
    // Shutdown twice is illegal.
    assert!(gw.shutdown().is_err());

    // Reinitialize from shuttered, then run again.
    gw.reinitialize().unwrap();
    gw.start().unwrap();
    let result = gw.process(&envelope_with_body(b"Subject: ok\n\n."));
    assert!(result.is_success(), "got {}", result);
    gw.shutdown().unwrap();
}

struct Rejector {
    next: Box<dyn Processor>,
}

impl Processor for Rejector {
    fn process(&mut self, e: &mut Envelope, task: Task) -> ProcessorResult {
        if task == Task::ValidateRcpt {
            return Err(ProcessorError::Rcpt(RcptError::NoSuchUser));
        }
        self.next.process(e, task)
    }
}

#[test]
fn recipient_validation_propagates_taxonomy() {
    let mut registry = ProcessorRegistry::with_defaults();
    registry.register("rejector", |_cfg, next| {
        Ok(ProcessorInstance::plain(Rejector { next }))
    });
    let gw = running_gateway(
        r#"{"gateways": {"default": {"validate_process": "rejector"}}}"#,
        registry,
    );
    let env = envelope_with_body(b"x");
    assert_eq!(gw.validate_rcpt(&env), Err(RcptError::NoSuchUser));
    gw.shutdown().unwrap();
}

#[test]
fn empty_validator_short_circuits() {
    let gw = running_gateway(
        r#"{"gateways": {"default": {}}}"#,
        ProcessorRegistry::with_defaults(),
    );
    let env = envelope_with_body(b"x");
    assert_eq!(gw.validate_rcpt(&env), Ok(()));
    gw.shutdown().unwrap();
}

#[test]
fn unknown_processor_fails_initialisation() {
    let tree = ConfigTree::from_json(
        r#"{"gateways": {"default": {"save_process": "NoSuchStage"}}}"#,
    )
    .unwrap();
    let gw = Gateway::new("default", tree, ProcessorRegistry::with_defaults()).unwrap();
    let err = gw.initialize().unwrap_err();
    assert!(err.to_string().contains("processor [nosuchstage] not found"));
    assert_eq!(gw.state().name(), "error");
}
