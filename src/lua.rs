//! The embedded Lua runtime.
//!
//! `init` builds a fresh engine per run and installs the host surface into
//! its global namespace: `print`/`notify`/`input`/`sleep`/`exit`, the
//! `Device` and `Image` proxies (both routed through the shared dynamic
//! dispatcher), `select_device`, the `Http` client, and path helpers. A
//! prelude chunk patches `io.write` to land in the host output buffer and
//! maps `os.exit` onto the host stop handler.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use mlua::{Lua, MetaMethod, UserData, UserDataMethods, Variadic};

use crate::dispatch;
use crate::error::{RunError, StopSignal};
use crate::host::{cancellable_sleep, RunContext, Severity};
use crate::http::HttpClient;
use crate::value::{Image, Point, Value};

/// Prelude executed after the globals are installed. Writes through the
/// default output stream land in the host buffer; explicitly opened files
/// keep working.
const IO_PRELUDE: &str = r##"
local original_io_write = io.write
local original_io_output = io.output
local original_default_output = original_io_output()

os.exit = exit

function io.write(...)
    local current_output = io.output()
    if current_output == original_default_output then
        local parts = {}
        for i = 1, select("#", ...) do
            parts[#parts + 1] = tostring(select(i, ...))
        end
        __buffer_write(table.concat(parts))
        return true
    else
        return original_io_write(...)
    end
end
"##;

// ── Host value types exposed to Lua ─────────────────────────────

impl UserData for Image {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("name", |_, this, ()| Ok(this.name.clone()));
        methods.add_method("size", |_, this, ()| Ok(this.bytes.len()));
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));
    }
}

/// Path-join helper handed to scripts as `work_path` and the `Path`
/// constructor.
struct LuaPath(PathBuf);

impl UserData for LuaPath {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method_mut("add", |_, this, segment: String| {
            this.0.push(&segment);
            Ok(this.0.to_string_lossy().to_string())
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(this.0.to_string_lossy().to_string())
        });
    }
}

// ── Value conversion ────────────────────────────────────────────

fn value_to_lua<'lua>(lua: &'lua Lua, value: &Value) -> mlua::Result<mlua::Value<'lua>> {
    match value {
        Value::Num(n) => Ok(mlua::Value::Number(*n)),
        Value::Str(s) => Ok(mlua::Value::String(lua.create_string(s)?)),
        Value::Bool(b) => Ok(mlua::Value::Boolean(*b)),
        Value::List(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.set(i + 1, value_to_lua(lua, item)?)?;
            }
            Ok(mlua::Value::Table(table))
        }
        Value::Point(p) => {
            let table = lua.create_table()?;
            table.set("x", p.x)?;
            table.set("y", p.y)?;
            Ok(mlua::Value::Table(table))
        }
        Value::Image(image) => Ok(mlua::Value::UserData(lua.create_userdata(image.clone())?)),
        Value::Unit => Ok(mlua::Value::Nil),
    }
}

fn lua_to_value(value: &mlua::Value) -> Value {
    match value {
        mlua::Value::Nil => Value::Unit,
        mlua::Value::Boolean(b) => Value::Bool(*b),
        mlua::Value::Integer(i) => Value::Num(*i as f64),
        mlua::Value::Number(n) => Value::Num(*n),
        mlua::Value::String(s) => {
            Value::Str(String::from_utf8_lossy(s.as_bytes()).to_string())
        }
        mlua::Value::Table(table) => {
            // A {x, y} pair is a point; any array part is a list.
            let x: Option<f64> = table.get("x").ok();
            let y: Option<f64> = table.get("y").ok();
            if let (Some(x), Some(y)) = (x, y) {
                return Value::Point(Point::new(x, y));
            }
            let mut items = Vec::new();
            for item in table.clone().sequence_values::<mlua::Value>() {
                match item {
                    Ok(item) => items.push(lua_to_value(&item)),
                    Err(_) => break,
                }
            }
            Value::List(items)
        }
        mlua::Value::UserData(ud) => match ud.borrow::<Image>() {
            Ok(image) => Value::Image(image.clone()),
            Err(_) => Value::Unit,
        },
        _ => Value::Unit,
    }
}

fn display(value: &mlua::Value) -> String {
    match value {
        mlua::Value::Nil => "nil".to_string(),
        other => lua_to_value(other).to_string(),
    }
}

// ── Runtime ─────────────────────────────────────────────────────

pub struct LuaRuntime {
    lua: Lua,
    ctx: RunContext,
}

impl LuaRuntime {
    /// Create a fresh engine instance bound to one run: clears the output
    /// buffer, installs the host globals, and patches the standard output
    /// primitives. Nothing is carried over from previous runs.
    pub fn init(ctx: &RunContext) -> Result<Self, RunError> {
        let lua = Lua::new();
        ctx.io.clear_buffer();
        install_globals(&lua, ctx).map_err(|e| RunError::Lua {
            message: e.to_string(),
        })?;
        lua.load(IO_PRELUDE)
            .set_name("prelude")
            .exec()
            .map_err(|e| RunError::Lua {
                message: e.to_string(),
            })?;
        Ok(Self {
            lua,
            ctx: ctx.clone(),
        })
    }

    /// Execute a script. Syntax errors are reformatted to their line and
    /// message fragment and pushed to the output buffer; a host-raised exit
    /// is a clean stop; a non-nil, non-zero return value is reported as an
    /// informational message, not an error.
    pub fn run(&self, script: &str) -> Result<(), RunError> {
        let result = self
            .lua
            .load(script)
            .set_name("script")
            .eval::<mlua::Value>();

        match result {
            Ok(value) => {
                match value {
                    mlua::Value::Nil | mlua::Value::Integer(0) => {}
                    mlua::Value::Number(n) if n == 0.0 => {}
                    other => {
                        self.ctx
                            .io
                            .output(&format!("script returned {}", display(&other)));
                    }
                }
                Ok(())
            }
            Err(e) => {
                if let Some(message) = stop_message(&e) {
                    tracing::debug!(reason = %message, "lua script stopped");
                    return Ok(());
                }
                if let mlua::Error::SyntaxError { message, .. } = &e {
                    let fragment = syntax_fragment(message);
                    self.ctx.io.output("your script has a syntax error!");
                    self.ctx.io.output(&format!("line: {fragment}"));
                    return Err(RunError::Lua {
                        message: fragment,
                    });
                }
                let message = e.to_string();
                tracing::warn!("lua run failed: {message}");
                self.ctx.io.output(&format!("script error: {message}"));
                Err(RunError::Lua { message })
            }
        }
    }
}

/// Convenience entry: fresh engine, one script.
pub fn run(source: &str, ctx: &RunContext) -> Result<(), RunError> {
    LuaRuntime::init(ctx)?.run(source)
}

/// Reduce mlua's `[string "script"]:3: unexpected symbol ...` to the
/// `3: unexpected symbol ...` fragment users actually need.
fn syntax_fragment(message: &str) -> String {
    match message.split_once("]:") {
        Some((_, rest)) => rest.lines().next().unwrap_or(rest).trim().to_string(),
        None => message.to_string(),
    }
}

/// Walk the error chain looking for the host stop marker.
fn stop_message(error: &mlua::Error) -> Option<String> {
    match error {
        mlua::Error::CallbackError { cause, .. } => stop_message(cause),
        mlua::Error::WithContext { cause, .. } => stop_message(cause),
        mlua::Error::ExternalError(cause) => {
            let cause: &(dyn std::error::Error + 'static) = &**cause;
            cause.downcast_ref::<StopSignal>().map(|s| s.0.clone())
        }
        _ => None,
    }
}

fn stop_error(message: impl Into<String>) -> mlua::Error {
    mlua::Error::external(StopSignal(message.into()))
}

// ── Global installation ─────────────────────────────────────────

fn install_globals(lua: &Lua, ctx: &RunContext) -> mlua::Result<()> {
    let globals = lua.globals();

    // print: every argument, tab separated, one line into the buffer.
    let io_ctx = ctx.clone();
    globals.set(
        "print",
        lua.create_function(move |_, args: Variadic<mlua::Value>| {
            let line = args.iter().map(display).collect::<Vec<_>>().join("\t");
            io_ctx.io.output(&line);
            Ok(())
        })?,
    )?;

    let notify_ctx = ctx.clone();
    globals.set(
        "notify",
        lua.create_function(move |_, message: Option<String>| {
            notify_ctx
                .io
                .notify(&message.unwrap_or_default(), Severity::Info);
            Ok(())
        })?,
    )?;

    let input_ctx = ctx.clone();
    globals.set(
        "input",
        lua.create_function(move |_, (prompt, description): (Option<String>, Option<String>)| {
            Ok(input_ctx.io.user_input(
                &prompt.unwrap_or_default(),
                &description.unwrap_or_default(),
            ))
        })?,
    )?;

    // sleep blocks cooperatively; when the run is cancelled mid-sleep the
    // stop marker unwinds the script instead of letting it continue.
    let sleep_ctx = ctx.clone();
    globals.set(
        "sleep",
        lua.create_function(move |_, seconds: Option<f64>| {
            cancellable_sleep(seconds.unwrap_or(1.0), &sleep_ctx.cancel);
            if sleep_ctx.cancel.load(Ordering::Relaxed) {
                return Err(stop_error("cancelled"));
            }
            Ok(())
        })?,
    )?;

    globals.set(
        "exit",
        lua.create_function(|_, message: Option<String>| -> mlua::Result<()> {
            Err(stop_error(message.unwrap_or_default()))
        })?,
    )?;

    let clear_ctx = ctx.clone();
    globals.set(
        "clear_buffer",
        lua.create_function(move |_, ()| {
            clear_ctx.io.clear_buffer();
            Ok(())
        })?,
    )?;

    let write_ctx = ctx.clone();
    globals.set(
        "__buffer_write",
        lua.create_function(move |_, text: String| {
            write_ctx.io.write_raw(&text);
            Ok(())
        })?,
    )?;

    globals.set("work_path", LuaPath(ctx.work_path.clone()))?;
    globals.set(
        "Path",
        lua.create_function(|_, path: String| Ok(LuaPath(PathBuf::from(path))))?,
    )?;

    let select_ctx = ctx.clone();
    globals.set(
        "select_device",
        lua.create_function(move |_, name: String| {
            if !select_ctx.devices.select(&name) {
                select_ctx.io.notify(
                    &format!("tried to switch to device {name}, but it does not exist"),
                    Severity::Error,
                );
            }
            Ok(())
        })?,
    )?;

    globals.set("Device", device_proxy(lua, ctx)?)?;
    globals.set("Image", image_proxy(lua, ctx)?)?;
    globals.set("Http", http_table(lua, ctx)?)?;

    Ok(())
}

/// Indexable proxy over the active device. Indexing by method name yields a
/// callable that resolves the (possibly localized) name, runs the dynamic
/// dispatcher against the active device, routes the tip to the output sink,
/// and returns the data value.
fn device_proxy<'lua>(lua: &'lua Lua, ctx: &RunContext) -> mlua::Result<mlua::Table<'lua>> {
    let proxy = lua.create_table()?;
    let meta = lua.create_table()?;
    let index_ctx = ctx.clone();
    meta.set(
        "__index",
        lua.create_function(move |lua, (_table, key): (mlua::Table, String)| {
            let ctx = index_ctx.clone();
            lua.create_function(move |lua, args: Variadic<mlua::Value>| {
                let device = ctx.devices.active().ok_or_else(|| {
                    mlua::Error::RuntimeError(
                        "no device selected; call select_device(name) first".into(),
                    )
                })?;
                let method = ctx.canonical_name(&key).to_string();
                let host_args: Vec<Value> = args.iter().map(lua_to_value).collect();
                match dispatch::dispatch(device.as_ref(), &method, host_args) {
                    Ok(outcome) => {
                        if let Some(tip) = outcome.tip {
                            ctx.io.output(&tip);
                        }
                        value_to_lua(lua, &outcome.value)
                    }
                    Err(e) => Err(mlua::Error::RuntimeError(e.to_string())),
                }
            })
        })?,
    )?;
    proxy.set_metatable(Some(meta));
    Ok(proxy)
}

/// Indexable proxy over the image function surface. Same dispatch path as
/// `Device`, but the operations are pure: results convert straight into Lua
/// tables, no tips.
fn image_proxy<'lua>(lua: &'lua Lua, ctx: &RunContext) -> mlua::Result<mlua::Table<'lua>> {
    let proxy = lua.create_table()?;
    let meta = lua.create_table()?;
    let index_ctx = ctx.clone();
    meta.set(
        "__index",
        lua.create_function(move |lua, (_table, key): (mlua::Table, String)| {
            let ctx = index_ctx.clone();
            lua.create_function(move |lua, args: Variadic<mlua::Value>| {
                let host_args: Vec<Value> = args.iter().map(lua_to_value).collect();
                match dispatch::dispatch(ctx.images.as_ref(), &key, host_args) {
                    Ok(outcome) => value_to_lua(lua, &outcome.value),
                    Err(e) => Err(mlua::Error::RuntimeError(e.to_string())),
                }
            })
        })?,
    )?;
    proxy.set_metatable(Some(meta));
    Ok(proxy)
}

fn http_table<'lua>(lua: &'lua Lua, ctx: &RunContext) -> mlua::Result<mlua::Table<'lua>> {
    let table = lua.create_table()?;
    let timeout = ctx.http_timeout;

    table.set(
        "get",
        lua.create_function(move |lua, url: String| {
            let client = HttpClient::new(timeout).map_err(mlua::Error::external)?;
            let response = client.get(&url).map_err(mlua::Error::external)?;
            let result = lua.create_table()?;
            result.set("status", response.status)?;
            result.set("body", response.body)?;
            Ok(result)
        })?,
    )?;

    table.set(
        "post",
        lua.create_function(move |lua, (url, body): (String, Option<String>)| {
            let client = HttpClient::new(timeout).map_err(mlua::Error::external)?;
            let response = client
                .post(&url, body.unwrap_or_default())
                .map_err(mlua::Error::external)?;
            let result = lua.create_table()?;
            result.set("status", response.status)?;
            result.set("body", response.body)?;
            Ok(result)
        })?,
    )?;

    Ok(table)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
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
            http_timeout: 5,
        }
    }

    fn run_script(source: &str) -> (Result<(), RunError>, String) {
        let ctx = test_ctx();
        let result = run(source, &ctx);
        (result, ctx.io.contents())
    }

    #[test]
    fn print_lands_in_buffer() {
        let (result, buffer) = run_script("print('hello', 2)");
        result.unwrap();
        assert_eq!(buffer, "hello\t2\n");
    }

    #[test]
    fn io_write_is_redirected() {
        let (result, buffer) = run_script("io.write('a', 'b') io.write('c')");
        result.unwrap();
        assert_eq!(buffer, "abc");
    }

    #[test]
    fn exit_is_a_clean_stop() {
        let (result, buffer) = run_script("print(1) exit('done') print(2)");
        result.unwrap();
        assert_eq!(buffer, "1\n");
    }

    #[test]
    fn os_exit_maps_to_host_stop() {
        let (result, buffer) = run_script("print(1) os.exit() print(2)");
        result.unwrap();
        assert_eq!(buffer, "1\n");
    }

    #[test]
    fn syntax_error_is_reformatted_and_reported() {
        let (result, buffer) = run_script("print(");
        assert!(matches!(result, Err(RunError::Lua { .. })));
        assert!(buffer.contains("syntax error"));
        assert!(buffer.contains("line:"));
    }

    #[test]
    fn runtime_error_is_logged_and_returned() {
        let (result, buffer) = run_script("error('boom')");
        assert!(matches!(result, Err(RunError::Lua { .. })));
        assert!(buffer.contains("boom"));
    }

    #[test]
    fn nonzero_return_value_is_informational() {
        let (result, buffer) = run_script("return 5");
        result.unwrap();
        assert!(buffer.contains("script returned 5"));
    }

    #[test]
    fn zero_and_nil_returns_are_silent() {
        let (result, buffer) = run_script("return 0");
        result.unwrap();
        assert_eq!(buffer, "");
        let (result, buffer) = run_script("local x = 1");
        result.unwrap();
        assert_eq!(buffer, "");
    }

    #[test]
    fn device_proxy_dispatches_and_routes_tip() {
        let (result, buffer) = run_script("select_device('loopback') Device.click(10, 20)");
        result.unwrap();
        assert_eq!(buffer, "loopback clicked at 10 20\n");
    }

    #[test]
    fn device_point_result_converts_to_table() {
        let (result, buffer) = run_script(
            "select_device('loopback') local p = Device.resolution() print(p.x, p.y)",
        );
        result.unwrap();
        assert_eq!(buffer, "1920\t1080\n");
    }

    #[test]
    fn point_table_argument_flattens() {
        let (result, buffer) =
            run_script("select_device('loopback') Device.click({x = 7, y = 8})");
        result.unwrap();
        assert_eq!(buffer, "loopback clicked at 7 8\n");
    }

    #[test]
    fn call_without_device_is_a_reported_error() {
        let (result, buffer) = run_script("Device.click(1, 2)");
        assert!(matches!(result, Err(RunError::Lua { .. })));
        assert!(buffer.contains("no device selected"));
    }

    #[test]
    fn device_errors_are_catchable_with_pcall() {
        let (result, buffer) = run_script(
            "local ok, err = pcall(function() Device.click(1, 2) end) print(ok, err)",
        );
        result.unwrap();
        assert!(buffer.starts_with("false"));
    }

    #[test]
    fn unwired_image_backend_reports_error() {
        let (result, buffer) = run_script("Image.ocr()");
        assert!(matches!(result, Err(RunError::Lua { .. })));
        assert!(buffer.contains("OCR"));
    }

    #[test]
    fn input_without_handler_yields_empty_string() {
        let (result, buffer) = run_script("local s = input('p', 'd') print('got[' .. s .. ']')");
        result.unwrap();
        assert_eq!(buffer, "got[]\n");
    }

    #[test]
    fn path_helper_joins_segments() {
        let (result, buffer) = run_script("local p = Path('base') print(p:add('x'))");
        result.unwrap();
        assert!(buffer.contains("base"));
        assert!(buffer.contains('x'));
    }

    #[test]
    fn cancel_mid_sleep_stops_script_cleanly() {
        let ctx = test_ctx();
        let cancel = Arc::clone(&ctx.cancel);
        let worker_ctx = ctx.clone();
        let start = std::time::Instant::now();
        let worker = std::thread::spawn(move || run("sleep(10) print('after')", &worker_ctx));
        std::thread::sleep(std::time::Duration::from_millis(50));
        cancel.store(true, Ordering::Relaxed);
        worker.join().unwrap().unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(2));
        assert!(!ctx.io.contents().contains("after"));
    }

    #[test]
    fn localized_alias_resolves_through_proxy() {
        let ctx = test_ctx();
        let mut mapping = std::collections::HashMap::new();
        mapping.insert("tap".to_string(), "click".to_string());
        let ctx = RunContext { mapping, ..ctx };
        run("select_device('loopback') Device.tap(3, 4)", &ctx).unwrap();
        assert_eq!(ctx.io.contents(), "loopback clicked at 3 4\n");
    }

    #[test]
    fn fresh_engine_per_init_clears_buffer() {
        let ctx = test_ctx();
        run("print('first')", &ctx).unwrap();
        assert_eq!(ctx.io.contents(), "first\n");
        // init clears the buffer before the next run.
        run("print('second')", &ctx).unwrap();
        assert_eq!(ctx.io.contents(), "second\n");
    }
}
