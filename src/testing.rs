//! Test doubles shared by unit tests

use crate::error::{ShiploadError, ShiploadResult};
use crate::events::{EventListener, LoadEvent};
use crate::manifest::{Digest, Manifest, Module, PREBUILT_MANIFEST_FILE_NAME};
use crate::runtime::{ExecutionContext, Runtime, RuntimeError};
use crate::transport::Transport;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Map-backed transport that records traffic
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every request open for `delay` so overlapping fetches are visible
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn serve(&self, url: &str, bytes: &[u8]) {
        self.responses.lock().insert(url.to_string(), bytes.to_vec());
    }

    pub fn clear(&self) {
        self.responses.lock().clear();
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests_for(&self, url: &str) -> usize {
        self.requests.lock().iter().filter(|u| *u == url).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch(&self, url: &str) -> ShiploadResult<Vec<u8>> {
        self.requests.lock().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.responses
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| ShiploadError::transport(url, "404 Not Found"))
    }
}

/// Context whose modules are UTF-8 scripts: `log:<text>` appends to the
/// context log, `throw:<message>` fails
pub struct FakeContext {
    name: String,
    log: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl FakeContext {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionContext for FakeContext {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_module(&self, id: &str, bytes: &[u8]) -> Result<(), RuntimeError> {
        let script = std::str::from_utf8(bytes)
            .map_err(|_| RuntimeError::new(format!("{} is not valid bytecode", id)))?;
        if let Some(text) = script.strip_prefix("log:") {
            self.log.lock().push(text.to_string());
            Ok(())
        } else if let Some(message) = script.strip_prefix("throw:") {
            Err(RuntimeError::new(message))
        } else {
            Err(RuntimeError::new(format!("{} is not valid bytecode", id)))
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Runtime that hands out `FakeContext`s and remembers them
#[derive(Default)]
pub struct FakeRuntime {
    contexts: Mutex<Vec<Arc<FakeContext>>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Every context created so far, oldest first
    pub fn contexts(&self) -> Vec<Arc<FakeContext>> {
        self.contexts.lock().clone()
    }

    /// The `FakeContext` behind a context this runtime created
    pub fn find(&self, context: &Arc<dyn ExecutionContext>) -> Arc<FakeContext> {
        let target = Arc::as_ptr(context) as *const ();
        self.contexts
            .lock()
            .iter()
            .find(|c| Arc::as_ptr(c) as *const () == target)
            .cloned()
            .expect("context was not created by this runtime")
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn create(&self, name: &str) -> Result<Arc<dyn ExecutionContext>, RuntimeError> {
        let context = Arc::new(FakeContext {
            name: name.to_string(),
            log: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.contexts.lock().push(context.clone());
        Ok(context)
    }
}

/// Listener that keeps every event
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<LoadEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<LoadEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(LoadEvent::name).collect()
    }
}

#[async_trait]
impl EventListener for RecordingListener {
    async fn on_event(&self, event: &LoadEvent) {
        self.events.lock().push(event.clone());
    }
}

/// A manifest plus the bytes of each of its modules
pub struct Bundle {
    pub manifest: Manifest,
    pub files: Vec<(String, Vec<u8>)>,
}

impl Bundle {
    /// Modules are `(id, script, dependencies)`, served at `<base>/<id>.bin`
    pub fn new(base: &str, modules: &[(&str, &str, &[&str])]) -> Self {
        let mut manifest = Manifest::default();
        let mut files = Vec::new();
        for (id, script, deps) in modules {
            let url = format!("{}/{}.bin", base, id);
            let bytes = script.as_bytes().to_vec();
            manifest = manifest.with_module(
                *id,
                Module::new(url.clone(), Digest::of(&bytes)).depends_on(deps.iter().copied()),
            );
            files.push((url, bytes));
        }
        Self { manifest, files }
    }

    pub fn manifest_json(&self) -> Vec<u8> {
        self.manifest.to_json().unwrap().into_bytes()
    }

    /// Serve the manifest at `manifest_url` and every module at its URL
    pub fn serve(&self, transport: &FakeTransport, manifest_url: &str) {
        transport.serve(manifest_url, &self.manifest_json());
        for (url, bytes) in &self.files {
            transport.serve(url, bytes);
        }
    }

    /// Lay the bundle out as an embedded directory
    pub fn write_embedded(&self, dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(PREBUILT_MANIFEST_FILE_NAME), self.manifest_json()).unwrap();
        for (_, bytes) in &self.files {
            std::fs::write(dir.join(Digest::of(bytes).to_hex()), bytes).unwrap();
        }
    }
}
