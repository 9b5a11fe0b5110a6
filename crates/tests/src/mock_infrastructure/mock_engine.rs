//! Scriptable in-process lite-client engines.

use async_trait::async_trait;
use dashmap::DashMap;
use multiclient_core::{
    engine::{EngineConnector, EngineError, EngineTransport},
    types::EngineTarget,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

const PROBE_TYPE: &str = "blocks.getMasterchainInfo";
const ARCHIVAL_TYPE: &str = "blocks.lookupBlock";

/// Engine that answers the default probe and archival requests and echoes everything else.
///
/// A height of `None` makes probes fail as unreachable. Traffic replies are
/// `{"engine": <name>, "echo": <payload>}` unless a failure is scripted.
pub struct MockEngine {
    name: String,
    latency: Mutex<Duration>,
    height: Mutex<Option<u64>>,
    failure: Mutex<Option<EngineError>>,
    archival: AtomicBool,
    calls: AtomicUsize,
    completed: AtomicUsize,
    probes: AtomicUsize,
}

impl MockEngine {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            latency: Mutex::new(Duration::ZERO),
            height: Mutex::new(None),
            failure: Mutex::new(None),
            archival: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_height(self, height: u64) -> Self {
        self.set_height(Some(height));
        self
    }

    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    #[must_use]
    pub fn with_failure(self, error: EngineError) -> Self {
        self.set_failure(Some(error));
        self
    }

    #[must_use]
    pub fn archival(self) -> Self {
        self.archival.store(true, Ordering::Relaxed);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_height(&self, height: Option<u64>) {
        *self.height.lock() = height;
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn set_failure(&self, error: Option<EngineError>) {
        *self.failure.lock() = error;
    }

    /// Traffic calls started, probes excluded.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Traffic calls that ran to completion without being dropped.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::Relaxed)
    }

    fn answer_probe(&self) -> Result<Value, EngineError> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        match *self.height.lock() {
            Some(seqno) => Ok(json!({
                "@type": "blocks.masterchainInfo",
                "last": {"@type": "ton.blockIdExt", "workchain": -1, "seqno": seqno}
            })),
            None => Err(EngineError::Unreachable("connection refused".to_string())),
        }
    }

    fn answer_archival(&self) -> Result<Value, EngineError> {
        if self.height.lock().is_none() {
            return Err(EngineError::Unreachable("connection refused".to_string()));
        }
        if self.archival.load(Ordering::Relaxed) {
            Ok(json!({"@type": "ton.blockIdExt", "workchain": -1, "seqno": 3}))
        } else {
            Err(EngineError::EngineReported { code: 500, message: "block not found".to_string() })
        }
    }
}

#[async_trait]
impl EngineTransport for MockEngine {
    async fn call(&self, payload: &Value) -> Result<Value, EngineError> {
        match payload.get("@type").and_then(Value::as_str) {
            Some(PROBE_TYPE) => return self.answer_probe(),
            Some(ARCHIVAL_TYPE) => return self.answer_archival(),
            _ => {}
        }

        self.calls.fetch_add(1, Ordering::Relaxed);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.completed.fetch_add(1, Ordering::Relaxed);

        let failure = self.failure.lock().clone();
        match failure {
            Some(error) => Err(error),
            None => Ok(json!({"engine": self.name, "echo": payload})),
        }
    }
}

/// Resolves engine addresses to registered [`MockEngine`]s.
///
/// Unregistered addresses fail to connect.
#[derive(Default)]
pub struct MockConnector {
    engines: DashMap<String, Arc<MockEngine>>,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `engine` under `address` and returns a shared handle for scripting it.
    pub fn register(&self, address: &str, engine: MockEngine) -> Arc<MockEngine> {
        let engine = Arc::new(engine);
        self.engines.insert(address.to_string(), Arc::clone(&engine));
        engine
    }
}

impl EngineConnector for MockConnector {
    fn connect(&self, target: &EngineTarget) -> Result<Arc<dyn EngineTransport>, EngineError> {
        self.engines
            .get(&target.address)
            .map(|engine| Arc::clone(engine.value()) as Arc<dyn EngineTransport>)
            .ok_or_else(|| EngineError::Unreachable(format!("no engine at {}", target.address)))
    }
}
