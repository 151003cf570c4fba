/*
 * gateway.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Casellario, an SMTP message-processing backend.
 *
 * Casellario is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Casellario is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Casellario.  If not, see <http://www.gnu.org/licenses/>.
 */

//! The gateway: a worker pool hosting per-worker chains, dispatching
//! submissions over channels, enforcing per-task timeouts, and recovering
//! from processor panics.

use std::fmt;
use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::backend::chain::{build_chain, build_stream_chain};
use crate::backend::envelope::SharedEnvelope;
use crate::backend::processor::{Processor, Task};
use crate::backend::registry::ProcessorRegistry;
use crate::backend::result::{BackendResult, ProcessorError, RcptError};
use crate::backend::service::Services;
use crate::backend::stream::{copy_to_chain, StreamProcessor};
use crate::config::{ConfigError, ConfigTree, GatewayConfig};

/// Gateway lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    New,
    Initialized,
    Running,
    Shuttered,
    Error,
}

impl GatewayState {
    pub fn name(&self) -> &'static str {
        match self {
            GatewayState::New => "new",
            GatewayState::Initialized => "initialized",
            GatewayState::Running => "running",
            GatewayState::Shuttered => "shuttered",
            GatewayState::Error => "error",
        }
    }
}

/// Lifecycle and configuration errors surfaced to the caller.
#[derive(Debug)]
pub enum GatewayError {
    Config(ConfigError),
    State { op: &'static str, state: &'static str },
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Config(e) => write!(f, "{}", e),
            GatewayError::State { op, state } => {
                write!(f, "cannot {} a gateway in state {}", op, state)
            }
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<ConfigError> for GatewayError {
    fn from(e: ConfigError) -> Self {
        GatewayError::Config(e)
    }
}

/// What a queued submission asks for.
#[derive(Clone, Copy, PartialEq, Eq)]
enum SubmissionKind {
    Save,
    Validate,
    Stream,
}

/// Reply for one submission.
struct WorkerReply {
    result: Result<BackendResult, ProcessorError>,
    queued_id: String,
}

/// One dispatch of an envelope to the worker pool. Pooled and reused.
struct Submission {
    env: Option<SharedEnvelope>,
    kind: SubmissionKind,
    stream: Option<Box<dyn Read + Send>>,
    reply: Option<Sender<WorkerReply>>,
}

impl Submission {
    fn blank() -> Box<Self> {
        Box::new(Self {
            env: None,
            kind: SubmissionKind::Save,
            stream: None,
            reply: None,
        })
    }

    fn clear(&mut self) {
        self.env = None;
        self.kind = SubmissionKind::Save;
        self.stream = None;
        self.reply = None;
    }
}

const POOL_MAX: usize = 128;

/// Free list of submission allocations.
struct SubmissionPool {
    free: Mutex<Vec<Box<Submission>>>,
}

impl SubmissionPool {
    fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    fn borrow(&self) -> Box<Submission> {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        free.pop().unwrap_or_else(Submission::blank)
    }

    fn recycle(&self, mut sub: Box<Submission>) {
        sub.clear();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < POOL_MAX {
            free.push(sub);
        }
    }

    fn len(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Chains built at initialisation, one of each per worker.
struct BuiltSet {
    save: Vec<Box<dyn Processor>>,
    validate: Vec<Box<dyn Processor>>,
    stream: Vec<Box<dyn StreamProcessor>>,
    validate_noop: bool,
}

/// Live dispatch state while running.
struct Conveyors {
    save_tx: Sender<Box<Submission>>,
    validate_tx: Sender<Box<Submission>>,
    stream_tx: Sender<Box<Submission>>,
    stops: Vec<Sender<()>>,
    workers: Vec<thread::JoinHandle<()>>,
    validate_noop: bool,
}

/// The backend gateway for one named configuration entry.
pub struct Gateway {
    name: String,
    registry: ProcessorRegistry,
    tree: Mutex<ConfigTree>,
    config: Mutex<GatewayConfig>,
    state: Mutex<GatewayState>,
    services: Mutex<Services>,
    chains: Mutex<Option<BuiltSet>>,
    running: Mutex<Option<Conveyors>>,
    pool: Arc<SubmissionPool>,
}

impl Gateway {
    /// Create a gateway named `name` against a configuration tree.
    pub fn new(
        name: impl Into<String>,
        tree: ConfigTree,
        registry: ProcessorRegistry,
    ) -> Result<Self, GatewayError> {
        let name = name.into();
        let config = tree.gateway_config(&name)?;
        config.validate()?;
        Ok(Self {
            name,
            registry,
            tree: Mutex::new(tree),
            config: Mutex::new(config),
            state: Mutex::new(GatewayState::New),
            services: Mutex::new(Services::new()),
            chains: Mutex::new(None),
            running: Mutex::new(None),
            pool: Arc::new(SubmissionPool::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> GatewayState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the configuration tree. Only legal while not running; a
    /// reload shuts the gateway down, swaps the tree, and reinitialises.
    pub fn set_config_tree(&self, tree: ConfigTree) -> Result<(), GatewayError> {
        let state = self.state();
        if state == GatewayState::Running {
            return Err(GatewayError::State {
                op: "reconfigure",
                state: state.name(),
            });
        }
        let config = tree.gateway_config(&self.name)?;
        config.validate()?;
        *self.tree.lock().unwrap_or_else(PoisonError::into_inner) = tree;
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    fn config_snapshot(&self) -> GatewayConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build one save, validate, and stream chain per worker and run the
    /// collected initializers.
    fn build_and_init(&self) -> Result<BuiltSet, GatewayError> {
        let config = self.config_snapshot();
        let tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
        let mut services = self.services.lock().unwrap_or_else(PoisonError::into_inner);
        services.reset();

        let n = config.worker_count();
        let mut set = BuiltSet {
            save: Vec::with_capacity(n),
            validate: Vec::with_capacity(n),
            stream: Vec::with_capacity(n),
            validate_noop: true,
        };
        for _ in 0..n {
            let save = build_chain(&config.save_process, &tree.processors, &self.registry)?;
            services.collect(save.hooks);
            set.save.push(save.head);

            let validate =
                build_chain(&config.validate_process, &tree.processors, &self.registry)?;
            set.validate_noop = validate.is_noop;
            services.collect(validate.hooks);
            set.validate.push(validate.head);

            let stream =
                build_stream_chain(&config.save_stream, &tree.stream_processors, &self.registry)?;
            services.collect(stream.hooks);
            set.stream.push(stream.head);
        }
        services.initialize()?;
        Ok(set)
    }

    /// Initialize: {new, shuttered} → initialized; on failure → error.
    pub fn initialize(&self) -> Result<(), GatewayError> {
        {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                GatewayState::New | GatewayState::Shuttered => {}
                other => {
                    return Err(GatewayError::State {
                        op: "initialize",
                        state: other.name(),
                    })
                }
            }
        }
        match self.build_and_init() {
            Ok(set) => {
                *self.chains.lock().unwrap_or_else(PoisonError::into_inner) = Some(set);
                *self.state.lock().unwrap_or_else(PoisonError::into_inner) =
                    GatewayState::Initialized;
                info!(target: "backend", "gateway [{}] initialized", self.name);
                Ok(())
            }
            Err(e) => {
                *self.state.lock().unwrap_or_else(PoisonError::into_inner) = GatewayState::Error;
                Err(e)
            }
        }
    }

    /// Reinitialize: {shuttered} → initialized.
    pub fn reinitialize(&self) -> Result<(), GatewayError> {
        {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != GatewayState::Shuttered {
                return Err(GatewayError::State {
                    op: "reinitialize",
                    state: state.name(),
                });
            }
        }
        self.initialize()
    }

    /// Start: {initialized, shuttered} → running. From shuttered the chains
    /// were torn down with their workers, so they are rebuilt first.
    pub fn start(&self) -> Result<(), GatewayError> {
        {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                GatewayState::Initialized | GatewayState::Shuttered => {}
                other => {
                    return Err(GatewayError::State {
                        op: "start",
                        state: other.name(),
                    })
                }
            }
        }
        let set = {
            let mut chains = self.chains.lock().unwrap_or_else(PoisonError::into_inner);
            chains.take()
        };
        let set = match set {
            Some(s) => s,
            None => match self.build_and_init() {
                Ok(s) => s,
                Err(e) => {
                    *self.state.lock().unwrap_or_else(PoisonError::into_inner) =
                        GatewayState::Error;
                    return Err(e);
                }
            },
        };

        let config = self.config_snapshot();
        let n = config.worker_count();
        let (save_tx, save_rx) = bounded(n);
        let (validate_tx, validate_rx) = bounded(config.validate_queue());
        let (stream_tx, stream_rx) = bounded(config.stream_queue());
        let validate_noop = set.validate_noop;

        let mut stops = Vec::with_capacity(n);
        let mut workers = Vec::with_capacity(n);
        let mut save_chains = set.save;
        let mut validate_chains = set.validate;
        let mut stream_chains = set.stream;
        for idx in (0..n).rev() {
            let (stop_tx, stop_rx) = bounded(1);
            stops.push(stop_tx);
            let ctx = WorkerContext {
                idx,
                gateway: self.name.clone(),
                save_chain: save_chains.remove(idx),
                validate_chain: validate_chains.remove(idx),
                stream_chain: stream_chains.remove(idx),
                save_rx: save_rx.clone(),
                validate_rx: validate_rx.clone(),
                stream_rx: stream_rx.clone(),
                stop_rx,
                pool: Arc::clone(&self.pool),
                stream_buffer: config.stream_buffer(),
            };
            let handle = thread::Builder::new()
                .name(format!("gateway-{}-worker-{}", self.name, idx))
                .spawn(move || supervise_worker(ctx))
                .map_err(|e| GatewayError::Config(ConfigError::new(e.to_string())))?;
            workers.push(handle);
        }

        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(Conveyors {
            save_tx,
            validate_tx,
            stream_tx,
            stops,
            workers,
            validate_noop,
        });
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = GatewayState::Running;
        info!(target: "backend", "gateway [{}] started {} workers", self.name, n);
        Ok(())
    }

    /// Shutdown: {running} → shuttered. Stops the workers, waits for them
    /// (dropping their chains), then runs the shutdowner hooks.
    pub fn shutdown(&self) -> Result<(), GatewayError> {
        {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != GatewayState::Running {
                return Err(GatewayError::State {
                    op: "shutdown",
                    state: state.name(),
                });
            }
        }
        let conveyors = {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            running.take()
        };
        if let Some(conv) = conveyors {
            for stop in &conv.stops {
                let _ = stop.try_send(());
            }
            drop(conv.save_tx);
            drop(conv.validate_tx);
            drop(conv.stream_tx);
            for handle in conv.workers {
                let _ = handle.join();
            }
        }
        let shutdown_result = self
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = GatewayState::Shuttered;
        info!(target: "backend", "gateway [{}] shuttered", self.name);
        shutdown_result.map_err(GatewayError::Config)
    }

    /// Submit an envelope for saving. Requires the running state.
    pub fn process(&self, env: &SharedEnvelope) -> BackendResult {
        let state = self.state();
        if state != GatewayState::Running {
            return BackendResult::not_running(state.name());
        }
        let (tx, timeout) = {
            let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(conv) = running.as_ref() else {
                return BackendResult::not_running(state.name());
            };
            (
                conv.save_tx.clone(),
                self.config_snapshot().save_timeout_duration(),
            )
        };
        let (reply_tx, reply_rx) = bounded(1);
        let mut sub = self.pool.borrow();
        sub.env = Some(env.clone());
        sub.kind = SubmissionKind::Save;
        sub.reply = Some(reply_tx);
        if tx.send(sub).is_err() {
            return BackendResult::transaction_failed("no workers available");
        }
        match reply_rx.recv_timeout(timeout) {
            Ok(reply) => match reply.result {
                Ok(r) if r.is_success() => BackendResult::queued_ok(&reply.queued_id),
                Ok(r) => r,
                Err(e) => BackendResult::transaction_failed(&e.to_string()),
            },
            Err(RecvTimeoutError::Timeout) => {
                // The worker may still be writing to the envelope: claim it
                // and leave a drainer behind to consume the late reply.
                env.claim();
                let env = env.clone();
                let _ = thread::Builder::new()
                    .name("gateway-drainer".to_string())
                    .spawn(move || {
                        let _ = reply_rx.recv();
                        env.release();
                    });
                BackendResult::timed_out()
            }
            Err(RecvTimeoutError::Disconnected) => {
                BackendResult::transaction_failed("worker terminated")
            }
        }
    }

    /// Validate the envelope's recipients. Requires the running state.
    pub fn validate_rcpt(&self, env: &SharedEnvelope) -> Result<(), RcptError> {
        if self.state() != GatewayState::Running {
            return Err(RcptError::StorageNotAvailable);
        }
        let (tx, timeout) = {
            let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(conv) = running.as_ref() else {
                return Err(RcptError::StorageNotAvailable);
            };
            if conv.validate_noop {
                // No validators configured: accept without dispatch.
                return Ok(());
            }
            (
                conv.validate_tx.clone(),
                self.config_snapshot().validate_timeout_duration(),
            )
        };
        let (reply_tx, reply_rx) = bounded(1);
        let mut sub = self.pool.borrow();
        sub.env = Some(env.clone());
        sub.kind = SubmissionKind::Validate;
        sub.reply = Some(reply_tx);
        if tx.send(sub).is_err() {
            return Err(RcptError::StorageNotAvailable);
        }
        match reply_rx.recv_timeout(timeout) {
            Ok(reply) => match reply.result {
                Ok(_) => Ok(()),
                Err(ProcessorError::Rcpt(e)) => Err(e),
                Err(_) => Err(RcptError::StorageError),
            },
            Err(RecvTimeoutError::Timeout) => {
                env.claim();
                let env = env.clone();
                let _ = thread::Builder::new()
                    .name("gateway-drainer".to_string())
                    .spawn(move || {
                        let _ = reply_rx.recv();
                        env.release();
                    });
                Err(RcptError::StorageTimeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(RcptError::StorageError),
        }
    }

    /// Stream a message through the save-stream chain: a worker opens the
    /// chain, copies the reader through it, and closes it.
    pub fn process_stream(
        &self,
        env: &SharedEnvelope,
        reader: Box<dyn Read + Send>,
    ) -> BackendResult {
        let state = self.state();
        if state != GatewayState::Running {
            return BackendResult::not_running(state.name());
        }
        let (tx, timeout) = {
            let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(conv) = running.as_ref() else {
                return BackendResult::not_running(state.name());
            };
            (
                conv.stream_tx.clone(),
                self.config_snapshot().stream_timeout_duration(),
            )
        };
        let (reply_tx, reply_rx) = bounded(1);
        let mut sub = self.pool.borrow();
        sub.env = Some(env.clone());
        sub.kind = SubmissionKind::Stream;
        sub.stream = Some(reader);
        sub.reply = Some(reply_tx);
        if tx.send(sub).is_err() {
            return BackendResult::transaction_failed("no workers available");
        }
        match reply_rx.recv_timeout(timeout) {
            Ok(reply) => match reply.result {
                Ok(r) if r.is_success() => BackendResult::queued_ok(&reply.queued_id),
                Ok(r) => r,
                Err(e) => BackendResult::transaction_failed(&e.to_string()),
            },
            Err(RecvTimeoutError::Timeout) => {
                env.claim();
                let env = env.clone();
                let _ = thread::Builder::new()
                    .name("gateway-drainer".to_string())
                    .spawn(move || {
                        let _ = reply_rx.recv();
                        env.release();
                    });
                BackendResult::timed_out()
            }
            Err(RecvTimeoutError::Disconnected) => {
                BackendResult::transaction_failed("worker terminated")
            }
        }
    }

    /// Number of live workers (0 when not running).
    pub fn worker_count(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| c.workers.len())
            .unwrap_or(0)
    }

    /// Free submissions currently pooled.
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }
}

struct WorkerContext {
    idx: usize,
    gateway: String,
    save_chain: Box<dyn Processor>,
    validate_chain: Box<dyn Processor>,
    stream_chain: Box<dyn StreamProcessor>,
    save_rx: Receiver<Box<Submission>>,
    validate_rx: Receiver<Box<Submission>>,
    stream_rx: Receiver<Box<Submission>>,
    stop_rx: Receiver<()>,
    pool: Arc<SubmissionPool>,
    stream_buffer: usize,
}

/// Supervising loop: re-enters the worker loop after a recovered panic,
/// first delivering the owed `storage failed` reply.
fn supervise_worker(mut ctx: WorkerContext) {
    loop {
        let mut owed: Option<(Sender<WorkerReply>, String)> = None;
        let outcome = catch_unwind(AssertUnwindSafe(|| worker_loop(&mut ctx, &mut owed)));
        match outcome {
            Ok(()) => {
                debug!(target: "backend", "gateway [{}] worker {} stopped", ctx.gateway, ctx.idx);
                return;
            }
            Err(_) => {
                error!(
                    target: "backend",
                    "gateway [{}] worker {} panicked; restarting", ctx.gateway, ctx.idx
                );
                if let Some((tx, queued_id)) = owed.take() {
                    let _ = tx.send(WorkerReply {
                        result: Err(ProcessorError::StorageFailed),
                        queued_id,
                    });
                }
            }
        }
    }
}

fn worker_loop(ctx: &mut WorkerContext, owed: &mut Option<(Sender<WorkerReply>, String)>) {
    let stop_rx = ctx.stop_rx.clone();
    let save_rx = ctx.save_rx.clone();
    let validate_rx = ctx.validate_rx.clone();
    let stream_rx = ctx.stream_rx.clone();
    loop {
        select! {
            recv(stop_rx) -> _ => return,
            recv(save_rx) -> msg => match msg {
                Ok(sub) => handle_submission(ctx, sub, owed),
                Err(_) => return,
            },
            recv(validate_rx) -> msg => match msg {
                Ok(sub) => handle_submission(ctx, sub, owed),
                Err(_) => return,
            },
            recv(stream_rx) -> msg => match msg {
                Ok(sub) => handle_submission(ctx, sub, owed),
                Err(_) => return,
            },
        }
    }
}

fn handle_submission(
    ctx: &mut WorkerContext,
    mut sub: Box<Submission>,
    owed: &mut Option<(Sender<WorkerReply>, String)>,
) {
    let Some(env) = sub.env.take() else {
        ctx.pool.recycle(sub);
        return;
    };
    let Some(reply_tx) = sub.reply.take() else {
        ctx.pool.recycle(sub);
        return;
    };
    let kind = sub.kind;
    let mut stream = sub.stream.take();
    let queued_id = env.lock().queued_id.clone();
    *owed = Some((reply_tx.clone(), queued_id.clone()));

    let result = match kind {
        SubmissionKind::Save => {
            let mut guard = env.lock();
            ctx.save_chain.process(&mut guard, Task::Save)
        }
        SubmissionKind::Validate => {
            let mut guard = env.lock();
            ctx.validate_chain.process(&mut guard, Task::ValidateRcpt)
        }
        SubmissionKind::Stream => run_stream(ctx, &env, stream.as_mut()),
    };

    let _ = reply_tx.send(WorkerReply { result, queued_id });
    *owed = None;
    drop(stream);
    ctx.pool.recycle(sub);
}

fn run_stream(
    ctx: &mut WorkerContext,
    env: &SharedEnvelope,
    reader: Option<&mut Box<dyn Read + Send>>,
) -> Result<BackendResult, ProcessorError> {
    let Some(reader) = reader else {
        return Err(ProcessorError::Storage("stream submission without reader".to_string()));
    };
    {
        let mut guard = env.lock();
        ctx.stream_chain
            .open(&mut guard)
            .map_err(|e| ProcessorError::Storage(e.to_string()))?;
    }
    // The envelope lock is not held across the copy; writes may block on
    // downstream flow control.
    let copy_result = copy_to_chain(reader.as_mut(), ctx.stream_chain.as_mut(), ctx.stream_buffer);
    let close_result = ctx.stream_chain.close();
    copy_result.map_err(|e| ProcessorError::Storage(e.to_string()))?;
    close_result.map_err(|e| ProcessorError::Storage(e.to_string()))?;
    Ok(BackendResult::new("250 2.0.0 OK"))
}
