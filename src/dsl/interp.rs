//! Tree-walking evaluator for the automation DSL.
//!
//! Control flow is an explicit [`Flow`] result threaded through the
//! statement runner rather than an unwinding mechanism: `break` unwinds to
//! the nearest loop or function-call boundary, `continue` to the current
//! iteration, and `Stop` (the cancellation flag) all the way out.
//!
//! Scoping is dynamic: one global map, one activation record per live user
//! function call, and a stack of foreach frames. Assignment to a name that
//! already exists globally updates the global even from inside a function.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::Ordering;

use indexmap::IndexMap;

use super::ast::{CallExpr, DynamicSource, Expr, FuncDecl, ListExpr, Stmt};
use crate::device::Capability;
use crate::dispatch;
use crate::error::RunError;
use crate::host::{cancellable_sleep, RunContext};
use crate::methods::InternalMethods;
use crate::value::{arith, compare, Value};

/// Outcome of executing one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Normal,
    Break,
    Continue,
    /// Cancellation requested; unwinds the entire run cleanly.
    Stop,
}

/// Per-call binding record of a user function. The function body itself is
/// shared read-only; only this record is fresh per invocation, which is what
/// keeps recursive and re-entrant calls from leaking state into each other.
struct Activation {
    locals: IndexMap<String, Value>,
}

pub struct Interpreter {
    ctx: RunContext,
    internals: InternalMethods,
    pub script_name: String,
    globals: IndexMap<String, Value>,
    functions: HashMap<String, Rc<FuncDecl>>,
    call_stack: Vec<Activation>,
    /// Active foreach frames, innermost last. The innermost frame with a
    /// matching name wins lookup, so nested loops may reuse an item name.
    loop_items: Vec<(String, Value)>,
}

impl Interpreter {
    pub fn new(script_name: &str, ctx: &RunContext) -> Self {
        let mut globals = IndexMap::new();
        globals.insert(
            "work_path".to_string(),
            Value::Str(ctx.work_path.to_string_lossy().to_string()),
        );
        Self {
            internals: InternalMethods::new(ctx),
            ctx: ctx.clone(),
            script_name: script_name.to_string(),
            globals,
            functions: HashMap::new(),
            call_stack: Vec::new(),
            loop_items: Vec::new(),
        }
    }

    /// Execute a parsed program to completion. A top-level `break` or a
    /// cancellation ends the run cleanly.
    pub fn run(&mut self, program: &[Stmt]) -> Result<(), RunError> {
        for stmt in program {
            match self.exec(stmt)? {
                Flow::Normal | Flow::Continue => {}
                Flow::Break | Flow::Stop => break,
            }
        }
        Ok(())
    }

    // ── Variables ──────────────────────────────────────────────────

    /// Lookup order: innermost matching foreach item, then the current
    /// activation record, then globals, then the default value `0`.
    fn get_var(&self, name: &str) -> Value {
        if let Some((_, item)) = self.loop_items.iter().rev().find(|(n, _)| n == name) {
            return item.clone();
        }
        if let Some(frame) = self.call_stack.last() {
            if let Some(value) = frame.locals.get(name) {
                return value.clone();
            }
        }
        self.globals.get(name).cloned().unwrap_or(Value::Num(0.0))
    }

    /// Global shadow rule: names that already exist globally update the
    /// global map even from inside a function.
    fn set_var(&mut self, name: &str, value: Value) {
        if self.call_stack.is_empty() || self.globals.contains_key(name) {
            self.globals.insert(name.to_string(), value);
        } else if let Some(frame) = self.call_stack.last_mut() {
            frame.locals.insert(name.to_string(), value);
        }
    }

    // ── Expressions ────────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr) -> Value {
        match expr {
            Expr::Number(n) => Value::Num(*n),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Variable(name) => self.get_var(name),
            Expr::Bin { left, op, right } => {
                let left = self.eval(left);
                let right = self.eval(right);
                arith(*op, &left, &right)
            }
            Expr::Cmp { left, op, right } => {
                let left = self.eval(left);
                let right = self.eval(right);
                Value::Bool(compare(*op, &left, &right))
            }
            Expr::Truthy(inner) => Value::Bool(self.eval(inner).is_truthy()),
        }
    }

    fn eval_condition(&mut self, expr: &Expr) -> bool {
        self.eval(expr).is_truthy()
    }

    fn eval_list(&mut self, elements: &[ListExpr]) -> Value {
        let items = elements
            .iter()
            .map(|element| match element {
                ListExpr::Item(expr) => self.eval(expr),
                ListExpr::Nested(inner) => self.eval_list(inner),
            })
            .collect();
        Value::List(items)
    }

    // ── Statements ─────────────────────────────────────────────────

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, RunError> {
        // Cancellation is honored at the granularity of the next AST node.
        if self.ctx.cancel.load(Ordering::Relaxed) {
            tracing::debug!(script = %self.script_name, "run cancelled");
            return Ok(Flow::Stop);
        }

        match stmt {
            Stmt::ScriptName(name) => {
                self.script_name = name.clone();
                Ok(Flow::Normal)
            }
            Stmt::Var { name, value } => {
                let value = self.eval(value);
                self.set_var(name, value);
                Ok(Flow::Normal)
            }
            Stmt::Dynamic { name, source } => {
                match source {
                    DynamicSource::List(elements) => {
                        let value = self.eval_list(elements);
                        self.set_var(name, value);
                    }
                    DynamicSource::Expr(expr) => {
                        let value = self.eval(expr);
                        self.set_var(name, value);
                    }
                    DynamicSource::Call(call) => {
                        // Bind only on success; a failed call leaves the
                        // variable untouched.
                        if let Some(value) = self.call_capability(call) {
                            self.set_var(name, value);
                        }
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Print(expr) => {
                let value = self.eval(expr);
                tracing::debug!(script = %self.script_name, "print: {value}");
                self.ctx.io.output(&value.to_string());
                Ok(Flow::Normal)
            }
            Stmt::Sleep(expr) => {
                let seconds = self.eval(expr).as_number();
                tracing::debug!(script = %self.script_name, seconds, "sleep");
                cancellable_sleep(seconds, &self.ctx.cancel);
                Ok(Flow::Normal)
            }
            Stmt::If {
                condition,
                true_body,
                else_ifs,
                false_body,
            } => {
                // First true condition wins; exactly one body executes.
                if self.eval_condition(condition) {
                    return self.exec_body(true_body);
                }
                for (else_if_condition, body) in else_ifs {
                    if self.eval_condition(else_if_condition) {
                        return self.exec_body(body);
                    }
                }
                self.exec_body(false_body)
            }
            Stmt::Loop { count, body } => {
                let count = self.eval(count).as_number().floor().max(0.0) as u64;
                for _ in 0..count {
                    match self.exec_body(body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        Flow::Stop => return Ok(Flow::Stop),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::While { condition, body } => {
                while self.eval_condition(condition) {
                    match self.exec_body(body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        Flow::Stop => return Ok(Flow::Stop),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Foreach { item, items, body } => self.exec_foreach(item, items, body),
            Stmt::Func(decl) => {
                self.functions.insert(decl.name.clone(), Rc::clone(decl));
                Ok(Flow::Normal)
            }
            Stmt::Call(call) => self.exec_call(call),
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
        }
    }

    fn exec_body(&mut self, body: &[Stmt]) -> Result<Flow, RunError> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_foreach(&mut self, item: &str, items: &Expr, body: &[Stmt]) -> Result<Flow, RunError> {
        let subject = self.eval(items);
        let iterations: Vec<Value> = match subject {
            Value::Num(n) => (0..n.floor().max(0.0) as u64)
                .map(|i| Value::Num(i as f64))
                .collect(),
            Value::List(items) => items,
            other => {
                self.ctx
                    .io
                    .warn(&format!("{other} is not iterable; the loop will not run"));
                return Ok(Flow::Normal);
            }
        };

        self.loop_items.push((item.to_string(), Value::Unit));
        let mut flow = Flow::Normal;
        'outer: for value in iterations {
            if let Some(frame) = self.loop_items.last_mut() {
                frame.1 = value;
            }
            for stmt in body {
                match self.exec(stmt) {
                    Ok(Flow::Normal) => {}
                    Ok(Flow::Continue) => break,
                    Ok(Flow::Break) => break 'outer,
                    Ok(Flow::Stop) => {
                        flow = Flow::Stop;
                        break 'outer;
                    }
                    Err(e) => {
                        self.loop_items.pop();
                        return Err(e);
                    }
                }
            }
        }
        self.loop_items.pop();
        Ok(flow)
    }

    // ── Function calls ─────────────────────────────────────────────

    fn exec_call(&mut self, call: &CallExpr) -> Result<Flow, RunError> {
        if let Some(decl) = self.functions.get(&call.name).cloned() {
            return self.call_user_function(&decl, call);
        }
        self.call_capability(call);
        Ok(Flow::Normal)
    }

    /// Run a user function. Each call gets a fresh activation record bound
    /// positionally from the evaluated call-site arguments; an argument
    /// count mismatch is fatal for the run. A `break` inside the body stops
    /// at the function boundary instead of escaping into the caller's loop.
    fn call_user_function(
        &mut self,
        decl: &Rc<FuncDecl>,
        call: &CallExpr,
    ) -> Result<Flow, RunError> {
        if decl.params.len() != call.args.len() {
            return Err(RunError::Arity {
                function: call.name.clone(),
                required: decl.params.len(),
                supplied: call.args.len(),
            });
        }

        let mut locals = IndexMap::new();
        for (param, arg) in decl.params.iter().zip(call.args.iter()) {
            let value = self.eval(arg);
            locals.insert(param.clone(), value);
        }

        self.call_stack.push(Activation { locals });
        let result = self.exec_body(&decl.body);
        self.call_stack.pop();
        tracing::debug!(
            function = %call.name,
            depth = self.call_stack.len(),
            "user function returned"
        );

        match result? {
            Flow::Break | Flow::Normal => Ok(Flow::Normal),
            other => Ok(other),
        }
    }

    /// Resolve and invoke an internal method or device capability. All
    /// failures are per-statement warnings, never fatal: the warning is
    /// logged and mirrored into the output buffer and execution continues.
    /// Returns the data value on success; tips are routed to the output
    /// sink.
    fn call_capability(&mut self, call: &CallExpr) -> Option<Value> {
        let canonical = self.ctx.canonical_name(&call.name).to_string();
        let args: Vec<Value> = call.args.iter().map(|arg| self.eval(arg)).collect();

        let result = if self.internals.describe(&canonical).is_some() {
            dispatch::dispatch(&self.internals, &canonical, args)
        } else if let Some(device) = self.ctx.devices.active() {
            dispatch::dispatch(device.as_ref(), &canonical, args)
        } else {
            self.ctx.io.warn(&format!(
                "no device selected; use call select_device(name) before {}",
                call.name
            ));
            return None;
        };

        match result {
            Ok(outcome) => {
                if let Some(tip) = outcome.tip {
                    self.ctx.io.output(&tip);
                }
                Some(outcome.value)
            }
            Err(RunError::Unresolved { .. }) => {
                self.ctx
                    .io
                    .warn(&format!("unknown function {} (line {})", call.name, call.line));
                None
            }
            Err(e) => {
                self.ctx
                    .io
                    .warn(&format!("function {} failed: {e}", call.name));
                None
            }
        }
    }
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
            http_timeout: 60,
        }
    }

    fn run_with_ctx(source: &str, ctx: &RunContext) -> Vec<String> {
        let program = super::super::parser::parse(source).unwrap();
        let mut interp = Interpreter::new("test", ctx);
        interp.run(&program).unwrap();
        ctx.io
            .contents()
            .lines()
            .map(ToString::to_string)
            .collect()
    }

    fn run(source: &str) -> Vec<String> {
        run_with_ctx(source, &test_ctx())
    }

    #[test]
    fn scalar_arithmetic() {
        assert_eq!(run("print(2 + 3)"), vec!["5"]);
        assert_eq!(run("print(2 - 3)"), vec!["-1"]);
        assert_eq!(run("print(2 * 3)"), vec!["6"]);
        assert_eq!(run("print(7 / 2)"), vec!["3.5"]);
    }

    #[test]
    fn chained_expressions_are_left_associative() {
        // The grammar has no precedence levels: 1 + 2 * 3 is (1 + 2) * 3.
        assert_eq!(run("print(1 + 2 * 3)"), vec!["9"]);
    }

    #[test]
    fn division_by_zero_prints_zero() {
        assert_eq!(run("print(5 / 0)"), vec!["0"]);
    }

    #[test]
    fn loop_runs_exactly_count_times() {
        assert_eq!(run("loop 3 { print(1) }"), vec!["1", "1", "1"]);
        assert_eq!(run("loop 2.9 { print(1) }"), vec!["1", "1"]);
    }

    #[test]
    fn break_exits_after_first_iteration() {
        assert_eq!(run("loop 3 { print(1) break }"), vec!["1"]);
    }

    #[test]
    fn continue_skips_rest_of_iteration() {
        assert_eq!(run("loop 3 { continue print(1) }"), Vec::<String>::new());
        assert_eq!(
            run("foreach (i, 3) { if (i == 1) { continue } print(i) }"),
            vec!["0", "2"]
        );
    }

    #[test]
    fn while_reevaluates_condition() {
        assert_eq!(
            run("var i = 0 while i < 3 { print(i) var i = i + 1 }"),
            vec!["0", "1", "2"]
        );
    }

    #[test]
    fn foreach_over_integer_and_sequence() {
        assert_eq!(run("foreach (i, 3) { print(i) }"), vec!["0", "1", "2"]);
        assert_eq!(
            run("dynamic xs = (5, 6, 7) foreach (i, xs) { print(i) }"),
            vec!["5", "6", "7"]
        );
    }

    #[test]
    fn foreach_non_iterable_warns_and_skips() {
        let lines = run("foreach (i, \"abc\") { print(i) }");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("not iterable"));
    }

    #[test]
    fn nested_foreach_reusing_item_name() {
        assert_eq!(
            run("dynamic xs = (1, 2) foreach (i, xs) { foreach (i, xs) { print(i) } }"),
            vec!["1", "2", "1", "2"]
        );
    }

    #[test]
    fn user_function_calls_do_not_share_state() {
        assert_eq!(
            run("func f(x) { var y = x + 1 print(y) } call f(1) call f(10)"),
            vec!["2", "11"]
        );
    }

    #[test]
    fn function_locals_do_not_leak() {
        assert_eq!(
            run("func f(x) { var y = x } call f(9) print(y)"),
            vec!["0"]
        );
    }

    #[test]
    fn global_shadow_rule_updates_existing_global() {
        assert_eq!(
            run("var g = 1 func f { var g = 5 } call f() print(g)"),
            vec!["5"]
        );
    }

    #[test]
    fn break_stops_at_function_boundary() {
        assert_eq!(
            run("func f { break print(9) } loop 2 { call f() print(2) }"),
            vec!["2", "2"]
        );
    }

    #[test]
    fn recursion_gets_fresh_bindings() {
        assert_eq!(
            run("func r(n) { if (n > 0) { call r(n - 1) } print(n) } call r(2)"),
            vec!["0", "1", "2"]
        );
    }

    #[test]
    fn user_function_arity_mismatch_is_fatal() {
        let ctx = test_ctx();
        let program = super::super::parser::parse("func f(a, b) { print(a) } call f(1)").unwrap();
        let mut interp = Interpreter::new("test", &ctx);
        let err = interp.run(&program).unwrap_err();
        assert!(matches!(err, RunError::Arity { .. }));
    }

    #[test]
    fn if_else_if_else_first_true_wins() {
        let source = "var x = 2
            if (x == 1) { print(\"one\") }
            else if (x == 2) { print(\"two\") }
            else if (x > 0) { print(\"positive\") }
            else { print(\"other\") }";
        assert_eq!(run(source), vec!["two"]);
    }

    #[test]
    fn vector_comparison_in_condition() {
        assert_eq!(
            run("dynamic a = (1, 2) dynamic b = (1, 2) if (a == b) { print(\"same\") }"),
            vec!["same"]
        );
        assert_eq!(
            run("dynamic a = (1, 2) dynamic b = (1, 3) if (a == b) { print(\"same\") } else { print(\"differ\") }"),
            vec!["differ"]
        );
    }

    #[test]
    fn bare_condition_truthiness() {
        assert_eq!(run("var x = 1 if (x) { print(\"t\") }"), vec!["t"]);
        assert_eq!(run("var x = 0 if (x) { print(\"t\") }"), Vec::<String>::new());
        assert_eq!(
            run("dynamic a = (1, 0) if (a) { print(\"t\") } else { print(\"f\") }"),
            vec!["f"]
        );
    }

    #[test]
    fn string_concat_with_plus() {
        assert_eq!(run("print(\"count\" + 3)"), vec!["count 3"]);
    }

    #[test]
    fn unknown_variable_defaults_to_zero() {
        assert_eq!(run("print(missing + 1)"), vec!["1"]);
    }

    #[test]
    fn device_call_routes_tip_to_output() {
        assert_eq!(
            run("call select_device(\"loopback\") call click(10, 20)"),
            vec!["loopback clicked at 10 20"]
        );
    }

    #[test]
    fn point_result_flattens_into_device_call() {
        // resolution() returns a Point; passing it to click binds x, y.
        let lines = run(
            "call select_device(\"loopback\") dynamic p = call resolution() call click(p)",
        );
        assert_eq!(lines, vec!["loopback clicked at 1920 1080"]);
    }

    #[test]
    fn call_without_device_warns_and_continues() {
        let lines = run("call click(1, 2) print(7)");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("no device selected"));
        assert_eq!(lines[1], "7");
    }

    #[test]
    fn select_nonexistent_device_then_call_continues() {
        let lines = run("call select_device(\"nonexistent\") call click(1, 2) print(7)");
        assert_eq!(lines.last().map(String::as_str), Some("7"));
    }

    #[test]
    fn unknown_function_is_a_warned_noop() {
        let lines = run("call select_device(\"loopback\") call bogus(1) print(7)");
        assert!(lines[0].contains("unknown function bogus"));
        assert_eq!(lines[1], "7");
    }

    #[test]
    fn arity_error_on_device_call_is_warned_not_fatal() {
        let lines = run("call select_device(\"loopback\") call click(1) print(7)");
        assert!(lines[0].contains("click"));
        assert!(lines[0].contains("failed"));
        assert_eq!(lines[1], "7");
    }

    #[test]
    fn localized_alias_resolves_to_canonical() {
        let mut ctx = test_ctx();
        ctx.mapping.insert("tap".to_string(), "click".to_string());
        let lines = run_with_ctx("call select_device(\"loopback\") call tap(3, 4)", &ctx);
        assert_eq!(lines, vec!["loopback clicked at 3 4"]);
    }

    #[test]
    fn dynamic_from_failed_call_leaves_variable_default() {
        let lines = run(
            "call select_device(\"loopback\") dynamic v = call bogus() print(v)",
        );
        assert_eq!(lines.last().map(String::as_str), Some("0"));
    }

    #[test]
    fn script_name_statement_updates_name() {
        let ctx = test_ctx();
        let program = super::super::parser::parse("name \"daily\" print(1)").unwrap();
        let mut interp = Interpreter::new("fallback", &ctx);
        interp.run(&program).unwrap();
        assert_eq!(interp.script_name, "daily");
    }

    #[test]
    fn cancel_interrupts_sleep_promptly() {
        let ctx = test_ctx();
        let cancel = Arc::clone(&ctx.cancel);
        let worker_ctx = ctx.clone();
        let start = std::time::Instant::now();
        let worker = std::thread::spawn(move || {
            let program = super::super::parser::parse("sleep(10) print(1)").unwrap();
            let mut interp = Interpreter::new("test", &worker_ctx);
            interp.run(&program).unwrap();
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        cancel.store(true, Ordering::Relaxed);
        worker.join().unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(2));
        // The statement after the sleep never ran.
        assert_eq!(ctx.io.contents(), "");
    }

    #[test]
    fn work_path_is_predefined() {
        let lines = run("print(work_path)");
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].is_empty());
    }
}
