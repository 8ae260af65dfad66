//! Internal methods: host-side functions scripts can call without a device.
//!
//! Function-call resolution checks this registry before the active device's
//! capability surface, so these names shadow device methods.

use crate::device::{Capability, DeviceError, MethodSpec, Outcome, ParamSpec};
use crate::host::{RunContext, Severity};
use crate::value::Value;

/// The registry, bound to one run's context.
pub struct InternalMethods {
    ctx: RunContext,
}

impl InternalMethods {
    pub fn new(ctx: &RunContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    fn select_device(&self, args: &[Value]) -> Value {
        let name = args.first().map(ToString::to_string).unwrap_or_default();
        if !self.ctx.devices.select(&name) {
            self.ctx.io.notify(
                &format!("tried to switch to device {name}, but it does not exist"),
                Severity::Error,
            );
        }
        Value::Unit
    }

    fn str_arg(args: &[Value], index: usize) -> String {
        args.get(index).map(ToString::to_string).unwrap_or_default()
    }
}

impl Capability for InternalMethods {
    fn describe(&self, method: &str) -> Option<MethodSpec> {
        match method {
            "select_device" => Some(MethodSpec::fixed(vec![ParamSpec::required("name")])),
            "file_move" => Some(MethodSpec::fixed(vec![
                ParamSpec::required("source"),
                ParamSpec::required("dest"),
            ])),
            "file_rename" => Some(MethodSpec::fixed(vec![
                ParamSpec::required("path"),
                ParamSpec::required("new_name"),
            ])),
            "folder_create" => Some(MethodSpec::fixed(vec![ParamSpec::required("path")])),
            "path_join" | "format" => Some(MethodSpec::variadic()),
            _ => None,
        }
    }

    fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Outcome, DeviceError> {
        let value = match method {
            "select_device" => self.select_device(&args),
            "file_move" => {
                let moved =
                    crate::files::file_move(&Self::str_arg(&args, 0), &Self::str_arg(&args, 1))?;
                Value::Str(moved.to_string_lossy().to_string())
            }
            "file_rename" => {
                let renamed =
                    crate::files::file_rename(&Self::str_arg(&args, 0), &Self::str_arg(&args, 1))?;
                Value::Str(renamed.to_string_lossy().to_string())
            }
            "folder_create" => {
                let created = crate::files::folder_create(&Self::str_arg(&args, 0))?;
                Value::Str(created.to_string_lossy().to_string())
            }
            "path_join" => {
                let segments: Vec<String> = args.iter().map(ToString::to_string).collect();
                Value::Str(crate::paths::path_join(&segments))
            }
            "format" => {
                let joined: String = args.iter().map(ToString::to_string).collect();
                Value::Str(joined)
            }
            _ => return Err(DeviceError::new(format!("no internal method {method}"))),
        };
        Ok(Outcome::value(value))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::{DeviceManager, LoopbackDevice};
    use crate::host::{HostSinks, ScriptIo};
    use crate::image::ImageSurface;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn test_ctx() -> RunContext {
        let sinks = Arc::new(HostSinks::default());
        let cancel = Arc::new(AtomicBool::new(false));
        let devices = Arc::new(DeviceManager::new());
        devices.register(Arc::new(LoopbackDevice::new("loopback")));
        RunContext {
            io: Arc::new(ScriptIo::new("test", sinks, Arc::clone(&cancel))),
            cancel,
            devices,
            images: Arc::new(ImageSurface::new()),
            mapping: std::collections::HashMap::new(),
            work_path: std::env::temp_dir(),
            http_timeout: 60,
        }
    }

    #[test]
    fn select_device_swaps_active() {
        let ctx = test_ctx();
        let methods = InternalMethods::new(&ctx);
        methods
            .invoke("select_device", vec![Value::Str("loopback".into())])
            .unwrap();
        assert_eq!(ctx.devices.active().unwrap().name(), "loopback");
    }

    #[test]
    fn select_missing_device_does_not_error() {
        let ctx = test_ctx();
        let methods = InternalMethods::new(&ctx);
        let out = methods
            .invoke("select_device", vec![Value::Str("ghost".into())])
            .unwrap();
        assert_eq!(out.value, Value::Unit);
        assert!(ctx.devices.active().is_none());
    }

    #[test]
    fn path_join_and_format() {
        let ctx = test_ctx();
        let methods = InternalMethods::new(&ctx);
        let out = methods
            .invoke(
                "path_join",
                vec![Value::Str("a".into()), Value::Num(2.0), Value::Str("c".into())],
            )
            .unwrap();
        assert_eq!(out.value, Value::Str("a/2/c".into()));

        let out = methods
            .invoke("format", vec![Value::Str("run ".into()), Value::Num(3.0)])
            .unwrap();
        assert_eq!(out.value, Value::Str("run 3".into()));
    }
}
