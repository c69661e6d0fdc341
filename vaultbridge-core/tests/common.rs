//! Common test utilities shared across integration tests.

#![allow(dead_code, missing_docs)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::Notify;
use vaultbridge_core::{ClientConfig, Command, SessionClient, Transport};

type Handler = dyn Fn(u16, &Value) -> Value + Send + Sync;

/// In-memory engine answering each frame through a handler.
///
/// Bootstrap commands are answered with an empty success. Every other frame
/// goes to the handler, which receives the opcode and the `data` field and
/// returns the full reply object.
#[derive(Clone)]
pub struct ScriptedEngine {
    inner: Arc<EngineState>,
}

struct EngineState {
    handler: Box<Handler>,
    replies: Mutex<VecDeque<Vec<u8>>>,
    reply_ready: Notify,
    requests: Mutex<Vec<Value>>,
    in_flight: AtomicUsize,
    overlaps: AtomicUsize,
    shut_down: AtomicBool,
}

impl ScriptedEngine {
    pub fn new(handler: impl Fn(u16, &Value) -> Value + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(EngineState {
                handler: Box::new(handler),
                replies: Mutex::new(VecDeque::new()),
                reply_ready: Notify::new(),
                requests: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                overlaps: AtomicUsize::new(0),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Every envelope written so far, in order.
    pub fn requests(&self) -> Vec<Value> {
        self.inner.requests.lock().unwrap().clone()
    }

    /// Opcodes written so far, in order.
    pub fn commands(&self) -> Vec<u16> {
        self.requests()
            .iter()
            .filter_map(|request| request["command"].as_u64())
            .filter_map(|code| u16::try_from(code).ok())
            .collect()
    }

    /// How often `command` was written.
    pub fn count(&self, command: Command) -> usize {
        self.commands()
            .into_iter()
            .filter(|code| *code == command.code())
            .count()
    }

    /// Times a frame was written while another was still unanswered.
    pub fn overlaps(&self) -> usize {
        self.inner.overlaps.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedEngine {
    async fn write(&self, frame: Vec<u8>) -> io::Result<()> {
        if self.is_shut_down() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "engine stopped"));
        }
        if self.inner.in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
            self.inner.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let envelope: Value = serde_json::from_slice(&frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.requests.lock().unwrap().push(envelope.clone());

        let code = envelope["command"]
            .as_u64()
            .and_then(|code| u16::try_from(code).ok())
            .unwrap_or_default();
        let data = envelope.get("data").cloned().unwrap_or(Value::Null);
        let reply = if code == Command::StoragePathSet.code()
            || code == Command::SetCoreStoreOptions.code()
        {
            json!({ "data": {} })
        } else {
            (self.inner.handler)(code, &data)
        };

        // Let other tasks run between write and reply.
        tokio::task::yield_now().await;

        self.inner
            .replies
            .lock()
            .unwrap()
            .push_back(serde_json::to_vec(&reply).unwrap());
        self.inner.reply_ready.notify_one();
        Ok(())
    }

    async fn read(&self) -> io::Result<Vec<u8>> {
        loop {
            let next = self.inner.replies.lock().unwrap().pop_front();
            if let Some(reply) = next {
                self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Ok(reply);
            }
            if self.is_shut_down() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "engine stopped"));
            }
            self.inner.reply_ready.notified().await;
        }
    }

    fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.reply_ready.notify_waiters();
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig::new("/tmp/vaultbridge-test")
}

/// Client over `engine` with bootstrap already done.
pub async fn ready_client(engine: &ScriptedEngine) -> SessionClient<ScriptedEngine> {
    let client = SessionClient::new(engine.clone(), &test_config());
    client.bootstrap().await.expect("bootstrap");
    client
}

/// Reply with `data`.
pub fn ok(data: Value) -> Value {
    json!({ "data": data })
}

/// Reply with an engine error.
pub fn engine_error(message: &str) -> Value {
    json!({ "error": message })
}

/// A 32-byte hashed password as the engine reports it.
pub const HASHED_PASSWORD_HEX: &str =
    "8f434346648f6b96df89dda901c5176b10a6d83961dd3c1ac88b59b2dc327aa4";
