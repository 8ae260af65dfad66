//! Dynamic argument binding, shared verbatim by both language runtimes so a
//! device method behaves identically whether called from the DSL or Lua.
//!
//! Binding is flatten-then-positional: sequence arguments are spliced into
//! the flat list in place, a point expands into its `x`, `y` components,
//! then flat values bind to declared parameters left to right with declared
//! defaults filling the tail.

use crate::device::{Capability, MethodParams, MethodSpec, Outcome};
use crate::error::RunError;
use crate::value::Value;

/// Bind `args` against a method's declared parameters.
///
/// Variadic methods receive the argument list unchanged. For fixed methods
/// the flattened count must cover every parameter without a default;
/// otherwise this is an [`RunError::Arity`] naming the method and both
/// counts.
pub fn bind(function: &str, spec: &MethodSpec, args: Vec<Value>) -> Result<Vec<Value>, RunError> {
    let params = match &spec.params {
        MethodParams::Variadic => return Ok(args),
        MethodParams::Fixed(params) => params,
    };

    let flat = flatten(args);
    let required = params.iter().filter(|p| p.default.is_none()).count();
    if flat.len() < required {
        return Err(RunError::Arity {
            function: function.to_string(),
            required,
            supplied: flat.len(),
        });
    }

    let mut bound = Vec::with_capacity(params.len());
    let mut flat = flat.into_iter();
    for param in params {
        match flat.next() {
            Some(value) => bound.push(value),
            None => match &param.default {
                Some(default) => bound.push(default.clone()),
                // Unreachable in practice: the required-count check above
                // already rejected short argument lists.
                None => {
                    return Err(RunError::Arity {
                        function: function.to_string(),
                        required,
                        supplied: bound.len(),
                    })
                }
            },
        }
    }
    Ok(bound)
}

/// Expand sequence and point arguments into a single flat list of scalars.
/// Flattening is one level deep: a nested list is spliced as its elements,
/// which may themselves be lists.
pub fn flatten(args: Vec<Value>) -> Vec<Value> {
    let mut flat = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::List(items) => flat.extend(items),
            Value::Point(p) => {
                flat.push(Value::Num(p.x));
                flat.push(Value::Num(p.y));
            }
            other => flat.push(other),
        }
    }
    flat
}

/// Resolve, bind, and invoke a method on a capability surface.
///
/// Returns [`RunError::Unresolved`] for unknown (or underscore-private)
/// names, [`RunError::Arity`] for binding failures, and [`RunError::Device`]
/// for backend failures — all of which callers treat as per-statement
/// warnings, not fatal errors.
pub fn dispatch<T: Capability + ?Sized>(
    target: &T,
    method: &str,
    args: Vec<Value>,
) -> Result<Outcome, RunError> {
    if !crate::device::is_invocable(method) {
        return Err(RunError::Unresolved {
            function: method.to_string(),
        });
    }
    let spec = target
        .describe(method)
        .ok_or_else(|| RunError::Unresolved {
            function: method.to_string(),
        })?;
    let bound = bind(method, &spec, args)?;
    target
        .invoke(method, bound)
        .map_err(|e| RunError::device(e.message))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::device::ParamSpec;
    use crate::value::Point;

    fn spec(params: Vec<ParamSpec>) -> MethodSpec {
        MethodSpec::fixed(params)
    }

    #[test]
    fn point_expands_then_binds_positionally() {
        let spec = spec(vec![
            ParamSpec::required("x"),
            ParamSpec::required("y"),
            ParamSpec::required("label"),
        ]);
        let bound = bind(
            "f",
            &spec,
            vec![
                Value::Point(Point::new(1.0, 2.0)),
                Value::Str("go".into()),
            ],
        )
        .unwrap();
        assert_eq!(
            bound,
            vec![Value::Num(1.0), Value::Num(2.0), Value::Str("go".into())]
        );
    }

    #[test]
    fn list_argument_is_spliced_in_place() {
        let spec = spec(vec![
            ParamSpec::required("a"),
            ParamSpec::required("b"),
            ParamSpec::required("c"),
        ]);
        let bound = bind(
            "f",
            &spec,
            vec![
                Value::Num(0.0),
                Value::List(vec![Value::Num(1.0), Value::Num(2.0)]),
            ],
        )
        .unwrap();
        assert_eq!(
            bound,
            vec![Value::Num(0.0), Value::Num(1.0), Value::Num(2.0)]
        );
    }

    #[test]
    fn missing_required_arguments_is_arity_error() {
        let spec = spec(vec![ParamSpec::required("x"), ParamSpec::required("y")]);
        let err = bind("click", &spec, vec![Value::Num(1.0)]).unwrap_err();
        match err {
            RunError::Arity {
                function,
                required,
                supplied,
            } => {
                assert_eq!(function, "click");
                assert_eq!(required, 2);
                assert_eq!(supplied, 1);
            }
            other => panic!("expected arity error, got {other:?}"),
        }
    }

    #[test]
    fn defaults_fill_the_tail() {
        let spec = spec(vec![
            ParamSpec::required("x"),
            ParamSpec::optional("duration", Value::Num(0.5)),
        ]);
        let bound = bind("f", &spec, vec![Value::Num(9.0)]).unwrap();
        assert_eq!(bound, vec![Value::Num(9.0), Value::Num(0.5)]);
    }

    #[test]
    fn variadic_passes_args_through_unflattened() {
        let spec = MethodSpec::variadic();
        let args = vec![Value::List(vec![Value::Num(1.0)]), Value::Num(2.0)];
        let bound = bind("f", &spec, args.clone()).unwrap();
        assert_eq!(bound, args);
    }

    #[test]
    fn extra_flat_arguments_are_dropped() {
        let spec = spec(vec![ParamSpec::required("x")]);
        let bound = bind("f", &spec, vec![Value::Num(1.0), Value::Num(2.0)]).unwrap();
        assert_eq!(bound, vec![Value::Num(1.0)]);
    }

    #[test]
    fn underscore_method_is_unresolved() {
        let device = crate::device::LoopbackDevice::new("d");
        let err = dispatch(&device, "_offset", Vec::new()).unwrap_err();
        assert!(matches!(err, RunError::Unresolved { .. }));
    }
}
