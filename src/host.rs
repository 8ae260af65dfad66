//! The script host: worker-thread lifecycle, per-run output buffering, and
//! the cross-thread user-input bridge between script threads and a UI/event
//! thread.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::device::{Capability, DeviceManager};
use crate::error::RunError;
use crate::settings::Settings;

/// Cooperative sleep: blocks in 10 ms increments, re-checking the
/// cancellation flag each increment so a stop request interrupts a long
/// sleep within one increment.
pub fn cancellable_sleep(seconds: f64, cancel: &AtomicBool) {
    let increments = (seconds * 100.0).max(0.0) as u64;
    for _ in 0..increments {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

// ── Language selection ──────────────────────────────────────────

/// Which runtime executes a script. Selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLanguage {
    Dsl,
    Lua,
}

impl ScriptLanguage {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(crate::paths::LUA_EXT) => Some(ScriptLanguage::Lua),
            Some(crate::paths::DSL_EXT) => Some(ScriptLanguage::Dsl),
            _ => None,
        }
    }
}

// ── Notifications ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

type NotifyFn = Box<dyn Fn(&str, Severity) + Send + Sync>;
type ForwardFn = Box<dyn Fn(&str) + Send + Sync>;

// ── Input bridge ────────────────────────────────────────────────

/// A pending user-input request. The worker thread blocks on the paired
/// receiver; the UI thread fulfills it with [`InputRequest::resolve`].
pub struct InputRequest {
    pub prompt: String,
    pub description: String,
    responder: SyncSender<String>,
}

impl InputRequest {
    pub fn resolve(self, answer: impl Into<String>) {
        // A dropped receiver means the run was cancelled while the dialog
        // was open; nothing to deliver to.
        let _ = self.responder.send(answer.into());
    }
}

/// Blocking handoff between script threads and the UI thread. The worker
/// enqueues a request and blocks on a single-slot channel until a UI-side
/// handler resolves it; cancellation is re-checked on a short interval so a
/// stop request is honored promptly.
#[derive(Default)]
pub struct InputBridge {
    interactive: AtomicBool,
    pending: Mutex<VecDeque<InputRequest>>,
}

impl InputBridge {
    /// Mark that a UI-side handler is attached and will serve requests.
    pub fn set_interactive(&self, interactive: bool) {
        self.interactive.store(interactive, Ordering::Relaxed);
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive.load(Ordering::Relaxed)
    }

    /// Called from a worker thread. Returns `None` when no handler is
    /// attached; the caller notifies and substitutes an empty string.
    pub fn request(
        &self,
        prompt: &str,
        description: &str,
        cancel: &AtomicBool,
    ) -> Option<String> {
        if !self.is_interactive() {
            return None;
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.pending.lock().push_back(InputRequest {
            prompt: prompt.to_string(),
            description: description.to_string(),
            responder: tx,
        });
        loop {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(answer) => return Some(answer),
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.load(Ordering::Relaxed) {
                        return Some(String::new());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Some(String::new()),
            }
        }
    }

    /// Called from the UI thread: take the oldest unserved request.
    pub fn take(&self) -> Option<InputRequest> {
        self.pending.lock().pop_front()
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}

// ── Host sinks and per-run I/O ──────────────────────────────────

/// Sinks shared across runs: the live output viewer, the notification
/// handler, and the input bridge.
#[derive(Default)]
pub struct HostSinks {
    forward: RwLock<Option<ForwardFn>>,
    notify: RwLock<Option<NotifyFn>>,
    pub input: InputBridge,
}

impl HostSinks {
    pub fn set_forward(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        *self.forward.write() = Some(Box::new(f));
    }

    pub fn set_notify(&self, f: impl Fn(&str, Severity) + Send + Sync + 'static) {
        *self.notify.write() = Some(Box::new(f));
    }

    pub fn notify(&self, message: &str, severity: Severity) {
        if let Some(notify) = self.notify.read().as_ref() {
            notify(message, severity);
        }
    }
}

/// Per-run text I/O. Output lines from a single run are strictly ordered
/// (single writer); the run name makes interleaved output from concurrent
/// runs attributable.
pub struct ScriptIo {
    pub run_name: String,
    buffer: Mutex<String>,
    sinks: Arc<HostSinks>,
    cancel: Arc<AtomicBool>,
}

impl ScriptIo {
    pub fn new(run_name: impl Into<String>, sinks: Arc<HostSinks>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            run_name: run_name.into(),
            buffer: Mutex::new(String::new()),
            sinks,
            cancel,
        }
    }

    /// Append one output line and forward the delta to any attached viewer.
    pub fn output(&self, line: &str) {
        let mut text = String::with_capacity(line.len() + 1);
        text.push_str(line);
        text.push('\n');
        self.write_raw(&text);
    }

    /// Append raw text (no newline added). Used by the Lua `io.write` patch.
    pub fn write_raw(&self, text: &str) {
        self.buffer.lock().push_str(text);
        if let Some(forward) = self.sinks.forward.read().as_ref() {
            forward(text);
        }
    }

    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }

    pub fn clear_buffer(&self) {
        self.buffer.lock().clear();
    }

    pub fn notify(&self, message: &str, severity: Severity) {
        self.sinks.notify(message, severity);
    }

    /// Log a per-statement warning and mirror it into the output buffer so
    /// a non-technical user sees what failed.
    pub fn warn(&self, message: &str) {
        tracing::warn!(run = %self.run_name, "{message}");
        self.output(message);
    }

    /// Blocking user input. Returns an empty string immediately (after a
    /// notification) when no UI handler is attached.
    pub fn user_input(&self, prompt: &str, description: &str) -> String {
        match self.sinks.input.request(prompt, description, &self.cancel) {
            Some(answer) => answer,
            None => {
                self.notify(
                    "script requested user input, which this environment does not support",
                    Severity::Warning,
                );
                String::new()
            }
        }
    }
}

// ── Run context ─────────────────────────────────────────────────

/// Everything a single run needs, passed by reference into each runtime.
/// One context per run; nothing is carried across independent runs.
#[derive(Clone)]
pub struct RunContext {
    pub io: Arc<ScriptIo>,
    pub cancel: Arc<AtomicBool>,
    pub devices: Arc<DeviceManager>,
    pub images: Arc<dyn Capability>,
    /// Alias → canonical function-name view (the inverse of the configured
    /// mapping), applied before capability lookup.
    pub mapping: std::collections::HashMap<String, String>,
    pub work_path: PathBuf,
    pub http_timeout: u64,
}

impl RunContext {
    /// Translate a script-visible function name to its canonical form.
    pub fn canonical_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.mapping.get(name).map_or(name, String::as_str)
    }
}

// ── Run registry ────────────────────────────────────────────────

struct RunHandle {
    id: u64,
    name: String,
    cancel: Arc<AtomicBool>,
    io: Arc<ScriptIo>,
    thread: Option<JoinHandle<()>>,
}

/// Registry of live worker threads, owned by the host and passed by
/// reference into each run. Create-on-run-start, remove-on-run-end-or-cancel.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<Vec<RunHandle>>,
    next_id: AtomicU64,
}

impl RunRegistry {
    fn register(&self, name: &str, cancel: Arc<AtomicBool>, io: Arc<ScriptIo>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.runs.lock().push(RunHandle {
            id,
            name: name.to_string(),
            cancel,
            io,
            thread: None,
        });
        id
    }

    fn attach_thread(&self, id: u64, thread: JoinHandle<()>) {
        if let Some(run) = self.runs.lock().iter_mut().find(|r| r.id == id) {
            run.thread = Some(thread);
        }
    }

    fn remove(&self, id: u64) -> Option<RunHandle> {
        let mut runs = self.runs.lock();
        let index = runs.iter().position(|r| r.id == id)?;
        Some(runs.remove(index))
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.runs.lock().iter().any(|r| r.name == name)
    }

    pub fn live_count(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn buffer_of(&self, id: u64) -> Option<String> {
        self.runs
            .lock()
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.io.contents())
    }
}

// ── Script host ─────────────────────────────────────────────────

/// Spawns one worker thread per script invocation, selects the runtime by
/// file extension, and streams buffered output back through the host sinks.
pub struct ScriptHost {
    pub sinks: Arc<HostSinks>,
    pub registry: Arc<RunRegistry>,
    devices: Arc<DeviceManager>,
    images: Arc<dyn Capability>,
    settings: Settings,
}

impl ScriptHost {
    pub fn new(
        devices: Arc<DeviceManager>,
        images: Arc<dyn Capability>,
        settings: Settings,
    ) -> Self {
        Self {
            sinks: Arc::new(HostSinks::default()),
            registry: Arc::new(RunRegistry::default()),
            devices,
            images,
            settings,
        }
    }

    /// Launch a script file on a fresh worker thread. Returns the run id.
    pub fn spawn(&self, path: &Path) -> Result<u64, RunError> {
        let language = ScriptLanguage::from_path(path).ok_or_else(|| RunError::Io {
            message: format!("not a runnable script: {}", path.display()),
        })?;
        let source = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        self.spawn_source(language, &name, &source, path.to_path_buf())
    }

    /// Launch script source directly (used by hosts that hold sources
    /// in memory and by tests).
    pub fn spawn_source(
        &self,
        language: ScriptLanguage,
        name: &str,
        source: &str,
        work_path: PathBuf,
    ) -> Result<u64, RunError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let io = Arc::new(ScriptIo::new(name, Arc::clone(&self.sinks), Arc::clone(&cancel)));
        let id = self.registry.register(name, Arc::clone(&cancel), Arc::clone(&io));

        let ctx = RunContext {
            io: Arc::clone(&io),
            cancel,
            devices: Arc::clone(&self.devices),
            images: Arc::clone(&self.images),
            mapping: self.settings.inverse_mapping(),
            work_path,
            http_timeout: self.settings.http_timeout,
        };
        if let Some(device) = &self.settings.default_device {
            if !self.devices.select(device) {
                tracing::warn!(device = %device, "configured default device is not registered");
            }
        }

        let registry = Arc::clone(&self.registry);
        let sinks = Arc::clone(&self.sinks);
        let run_name = name.to_string();
        let source = source.to_string();
        let thread = std::thread::spawn(move || {
            tracing::debug!(run = %run_name, "script run started");
            let result = match language {
                ScriptLanguage::Dsl => crate::dsl::run(&source, &run_name, &ctx),
                ScriptLanguage::Lua => crate::lua::run(&source, &ctx),
            };
            match result {
                Ok(()) => {
                    sinks.notify(&format!("script {run_name} finished"), Severity::Info);
                }
                Err(e) => {
                    sinks.notify(
                        &format!("script {run_name} failed: {e}"),
                        Severity::Error,
                    );
                }
            }
            tracing::debug!(run = %run_name, "script run ended");
            registry.remove_self(&run_name);
        });
        self.registry.attach_thread(id, thread);
        Ok(id)
    }

    /// Block until the given run completes.
    pub fn wait(&self, id: u64) {
        let handle = self.registry.remove(id);
        if let Some(mut run) = handle {
            if let Some(thread) = run.thread.take() {
                let _ = thread.join();
            }
        }
    }

    /// Stop every live run: set each cancellation flag (honored at the next
    /// AST node, sleep increment, or input poll), drop the thread handles,
    /// and clear pending input requests. Best effort — a worker blocked
    /// inside a device call finishes that call first.
    pub fn stop_all(&self) -> usize {
        let mut runs = self.registry.runs.lock();
        let count = runs.len();
        for run in runs.iter() {
            run.cancel.store(true, Ordering::Relaxed);
        }
        runs.clear();
        drop(runs);
        self.sinks.input.clear();
        count
    }
}

impl RunRegistry {
    /// Normal-completion path: a worker removes its own entry. The entry may
    /// already be gone if `stop_all` cleared the registry first.
    fn remove_self(&self, name: &str) {
        let mut runs = self.runs.lock();
        if let Some(index) = runs.iter().position(|r| r.name == name) {
            runs.remove(index);
        }
    }
}
