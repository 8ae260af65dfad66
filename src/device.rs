//! The device capability surface.
//!
//! Concrete backends (ADB, desktop, WebDriver) live outside this crate; the
//! execution core only needs a name-indexed set of operations with declared
//! parameters. Backends implement [`Capability`] and register with the
//! [`DeviceManager`]; scripts swap the active device with `select_device`.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::value::{Image, Point, Value};

// ── Method metadata ─────────────────────────────────────────────

/// One declared parameter of a capability method.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &'static str) -> Self {
        Self {
            name,
            default: None,
        }
    }

    pub fn optional(name: &'static str, default: Value) -> Self {
        Self {
            name,
            default: Some(default),
        }
    }
}

/// Declared parameter shape of a capability method. Variadic methods receive
/// the caller's argument list unchanged; fixed methods go through the
/// dispatcher's flatten-and-bind step.
#[derive(Debug, Clone)]
pub enum MethodParams {
    Variadic,
    Fixed(Vec<ParamSpec>),
}

/// What a capability declares about one of its methods.
#[derive(Debug, Clone)]
pub struct MethodSpec {
    pub params: MethodParams,
}

impl MethodSpec {
    pub fn fixed(params: Vec<ParamSpec>) -> Self {
        Self {
            params: MethodParams::Fixed(params),
        }
    }

    pub fn variadic() -> Self {
        Self {
            params: MethodParams::Variadic,
        }
    }
}

/// Result of invoking a capability method: an optional human-readable tip
/// (routed to the output sink, never to the script) plus the data value the
/// script sees.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub tip: Option<String>,
    pub value: Value,
}

impl Outcome {
    pub fn value(value: Value) -> Self {
        Self { tip: None, value }
    }

    pub fn tip(tip: impl Into<String>) -> Self {
        Self {
            tip: Some(tip.into()),
            value: Value::Unit,
        }
    }

    pub fn with_tip(tip: impl Into<String>, value: Value) -> Self {
        Self {
            tip: Some(tip.into()),
            value,
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────

/// Failure raised by a capability backend. Callers log these as warnings;
/// they never abort a run.
#[derive(Debug, Clone)]
pub struct DeviceError {
    pub message: String,
}

impl DeviceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DeviceError {}

// ── Capability trait ────────────────────────────────────────────

/// A name-indexed set of operations. Both devices and the image function
/// surface expose themselves through this trait; the dispatcher treats the
/// two identically.
///
/// Method names beginning with an underscore are private to the backend and
/// must never be reported by `describe` (they are not invocable from script).
pub trait Capability: Send + Sync {
    /// Look up a method's declared parameters, or `None` if the backend has
    /// no such method.
    fn describe(&self, method: &str) -> Option<MethodSpec>;

    /// Invoke a method with already-bound arguments.
    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Outcome, DeviceError>;
}

/// A device backend: a capability surface with an identity.
pub trait Device: Capability {
    fn name(&self) -> &str;
    fn description(&self) -> &str {
        ""
    }
}

/// Whether a method name is invocable from script at all.
pub fn is_invocable(method: &str) -> bool {
    !method.is_empty() && !method.starts_with('_')
}

// ── Device manager ──────────────────────────────────────────────

/// Owns the registered backends and the single active selection.
///
/// The active handle is shared, single-owner-at-a-time by convention:
/// selecting a new device replaces the reference, and nothing serializes
/// concurrent invocations of the same backend from two runs.
#[derive(Default)]
pub struct DeviceManager {
    backends: RwLock<Vec<Arc<dyn Device>>>,
    active: RwLock<Option<Arc<dyn Device>>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, device: Arc<dyn Device>) {
        self.backends.write().push(device);
    }

    /// Re-resolve `name` against the registered backends and make it the
    /// active device. Returns false (leaving the previous selection intact)
    /// when no backend matches.
    pub fn select(&self, name: &str) -> bool {
        let found = self
            .backends
            .read()
            .iter()
            .find(|d| d.name() == name)
            .cloned();
        match found {
            Some(device) => {
                tracing::debug!(device = name, "active device selected");
                *self.active.write() = Some(device);
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> Option<Arc<dyn Device>> {
        self.active.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends
            .read()
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }
}

// ── Loopback backend ────────────────────────────────────────────

/// A backend that performs no platform I/O: every action succeeds and
/// returns a tip describing what a real device would have done. Useful for
/// dry-running scripts and as the reference implementation of the method
/// shapes real backends expose.
pub struct LoopbackDevice {
    name: String,
}

impl LoopbackDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Capability for LoopbackDevice {
    fn describe(&self, method: &str) -> Option<MethodSpec> {
        if !is_invocable(method) {
            return None;
        }
        match method {
            "click" => Some(MethodSpec::fixed(vec![
                ParamSpec::required("x"),
                ParamSpec::required("y"),
            ])),
            "swipe" => Some(MethodSpec::fixed(vec![
                ParamSpec::required("x1"),
                ParamSpec::required("y1"),
                ParamSpec::required("x2"),
                ParamSpec::required("y2"),
                ParamSpec::optional("duration", Value::Num(0.5)),
            ])),
            "key" => Some(MethodSpec::fixed(vec![ParamSpec::required("key_id")])),
            "input_text" => Some(MethodSpec::fixed(vec![ParamSpec::required("text")])),
            "open_app" => Some(MethodSpec::fixed(vec![
                ParamSpec::required("name"),
                ParamSpec::optional("activity", Value::Str(String::new())),
            ])),
            "screenshot" => Some(MethodSpec::fixed(Vec::new())),
            "resolution" => Some(MethodSpec::fixed(Vec::new())),
            _ => None,
        }
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Outcome, DeviceError> {
        let name = &self.name;
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Unit);
        match method {
            "click" => Ok(Outcome::tip(format!(
                "{name} clicked at {} {}",
                arg(0),
                arg(1)
            ))),
            "swipe" => Ok(Outcome::tip(format!(
                "{name} swiped {} {} => {} {} over {}s",
                arg(0),
                arg(1),
                arg(2),
                arg(3),
                arg(4)
            ))),
            "key" => Ok(Outcome::tip(format!("{name} pressed key {}", arg(0)))),
            "input_text" => Ok(Outcome::tip(format!("{name} typed {}", arg(0)))),
            "open_app" => Ok(Outcome::tip(format!("{name} opened app {}", arg(0)))),
            "screenshot" => Ok(Outcome::with_tip(
                format!("{name} captured a screenshot"),
                Value::Image(Image::new(Vec::new(), Some("screenshot".into()))),
            )),
            "resolution" => Ok(Outcome::value(Value::Point(Point::new(1920.0, 1080.0)))),
            _ => Err(DeviceError::new(format!("{name} has no {method} operation"))),
        }
    }
}

impl Device for LoopbackDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "dry-run backend: actions are reported, not performed"
    }
}
