//! Function registry
//!
//! Every function is registered under a name with a typed signature; the
//! registry checks arity and argument types before the handler runs, so
//! handlers can destructure their arguments directly.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use serde_json::Value;

use super::{number, type_name, values_equal, Error};

/// Argument type accepted by a function parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Any,
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// string, array or object
    Sized,
    /// string or array
    Sequence,
}

impl ArgType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ArgType::Any => true,
            ArgType::String => value.is_string(),
            ArgType::Number => value.is_number(),
            ArgType::Boolean => value.is_boolean(),
            ArgType::Array => value.is_array(),
            ArgType::Object => value.is_object(),
            ArgType::Sized => value.is_string() || value.is_array() || value.is_object(),
            ArgType::Sequence => value.is_string() || value.is_array(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ArgType::Any => "any",
            ArgType::String => "a string",
            ArgType::Number => "a number",
            ArgType::Boolean => "a boolean",
            ArgType::Array => "an array",
            ArgType::Object => "an object",
            ArgType::Sized => "a string, array or object",
            ArgType::Sequence => "a string or array",
        }
    }
}

pub type Handler = Arc<dyn Fn(&[Value]) -> Result<Value, Error> + Send + Sync>;

struct Function {
    params: Vec<ArgType>,
    variadic: Option<ArgType>,
    handler: Handler,
}

/// Named, signature-checked functions available to expressions
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Function>,
}

impl FunctionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the standard functions
    pub fn with_builtins() -> Self {
        use ArgType::*;
        let mut registry = Self::new();
        registry.register("length", &[Sized], None, Arc::new(length));
        registry.register("contains", &[Sequence, Any], None, Arc::new(contains));
        registry.register("starts_with", &[String, String], None, Arc::new(starts_with));
        registry.register("ends_with", &[String, String], None, Arc::new(ends_with));
        registry.register("join", &[String, Array], None, Arc::new(join));
        registry.register("split", &[String, String], None, Arc::new(split));
        registry.register("concat", &[String, String], None, Arc::new(concat));
        registry.register("keys", &[Object], None, Arc::new(keys));
        registry.register("values", &[Object], None, Arc::new(values));
        registry.register("merge", &[], Some(Object), Arc::new(merge));
        registry.register("to_string", &[Any], None, Arc::new(to_string));
        registry.register("to_number", &[Any], None, Arc::new(to_number));
        registry.register("to_upper", &[String], None, Arc::new(to_upper));
        registry.register("to_lower", &[String], None, Arc::new(to_lower));
        registry.register("trim_space", &[String], None, Arc::new(trim_space));
        registry.register("type", &[Any], None, Arc::new(type_of));
        registry.register("not_null", &[Any], Some(Any), Arc::new(not_null));
        registry.register("abs", &[Number], None, Arc::new(abs));
        registry.register("ceil", &[Number], None, Arc::new(ceil));
        registry.register("floor", &[Number], None, Arc::new(floor));
        registry.register("sum", &[Array], None, Arc::new(sum));
        registry.register("max", &[Array], None, Arc::new(max));
        registry.register("min", &[Array], None, Arc::new(min));
        registry.register("sort", &[Array], None, Arc::new(sort));
        registry.register("reverse", &[Sequence], None, Arc::new(reverse));
        registry.register("env", &[String], None, Arc::new(env));
        registry.register("base64_encode", &[String], None, Arc::new(base64_encode));
        registry.register("base64_decode", &[String], None, Arc::new(base64_decode));
        registry
    }

    /// Register (or replace) a function
    pub fn register(
        &mut self,
        name: &str,
        params: &[ArgType],
        variadic: Option<ArgType>,
        handler: Handler,
    ) {
        self.functions.insert(
            name.to_string(),
            Function {
                params: params.to_vec(),
                variadic,
                handler,
            },
        );
    }

    /// Check arguments against the signature and invoke the handler
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, Error> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))?;

        let fixed = function.params.len();
        let arity_ok = match function.variadic {
            Some(_) => args.len() >= fixed,
            None => args.len() == fixed,
        };
        if !arity_ok {
            return Err(Error::Arity {
                name: name.to_string(),
                expected: match function.variadic {
                    Some(_) => format!("at least {fixed}"),
                    None => fixed.to_string(),
                },
                actual: args.len(),
            });
        }

        for (index, arg) in args.iter().enumerate() {
            let expected = function
                .params
                .get(index)
                .copied()
                .or(function.variadic)
                .unwrap_or(ArgType::Any);
            if !expected.accepts(arg) {
                return Err(Error::ArgumentType {
                    name: name.to_string(),
                    index: index + 1,
                    expected: expected.name(),
                    actual: type_name(arg),
                });
            }
        }

        (function.handler)(args)
    }
}

fn as_str(value: &Value) -> &str {
    value.as_str().unwrap_or_default()
}

fn as_f64(value: &Value) -> f64 {
    value.as_f64().unwrap_or_default()
}

fn length(args: &[Value]) -> Result<Value, Error> {
    let len = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        _ => 0,
    };
    Ok(Value::from(len))
}

fn contains(args: &[Value]) -> Result<Value, Error> {
    let found = match (&args[0], &args[1]) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::String(_), _) => false,
        (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
        _ => false,
    };
    Ok(Value::Bool(found))
}

fn starts_with(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(as_str(&args[0]).starts_with(as_str(&args[1]))))
}

fn ends_with(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::Bool(as_str(&args[0]).ends_with(as_str(&args[1]))))
}

fn join(args: &[Value]) -> Result<Value, Error> {
    let items = args[1].as_array().map(Vec::as_slice).unwrap_or_default();
    let parts = items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::Runtime("join() expects an array of strings".to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::String(parts.join(as_str(&args[0]))))
}

fn split(args: &[Value]) -> Result<Value, Error> {
    let parts = as_str(&args[0])
        .split(as_str(&args[1]))
        .map(|s| Value::String(s.to_string()))
        .collect();
    Ok(Value::Array(parts))
}

fn concat(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::String(format!("{}{}", as_str(&args[0]), as_str(&args[1]))))
}

fn keys(args: &[Value]) -> Result<Value, Error> {
    let keys = args[0]
        .as_object()
        .map(|o| o.keys().map(|k| Value::String(k.clone())).collect())
        .unwrap_or_default();
    Ok(Value::Array(keys))
}

fn values(args: &[Value]) -> Result<Value, Error> {
    let values = args[0]
        .as_object()
        .map(|o| o.values().cloned().collect())
        .unwrap_or_default();
    Ok(Value::Array(values))
}

fn merge(args: &[Value]) -> Result<Value, Error> {
    let mut merged = serde_json::Map::new();
    for arg in args {
        if let Value::Object(map) = arg {
            for (k, v) in map {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(Value::Object(merged))
}

fn to_string(args: &[Value]) -> Result<Value, Error> {
    match &args[0] {
        Value::String(s) => Ok(Value::String(s.clone())),
        other => Ok(Value::String(serde_json::to_string(other).map_err(|e| {
            Error::Runtime(format!("to_string(): {e}"))
        })?)),
    }
}

fn to_number(args: &[Value]) -> Result<Value, Error> {
    Ok(match &args[0] {
        Value::Number(n) => Value::Number(n.clone()),
        Value::String(s) => s.trim().parse::<f64>().map(number).unwrap_or(Value::Null),
        _ => Value::Null,
    })
}

fn to_upper(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::String(as_str(&args[0]).to_uppercase()))
}

fn to_lower(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::String(as_str(&args[0]).to_lowercase()))
}

fn trim_space(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::String(as_str(&args[0]).trim().to_string()))
}

fn type_of(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::String(type_name(&args[0]).to_string()))
}

fn not_null(args: &[Value]) -> Result<Value, Error> {
    Ok(args
        .iter()
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null))
}

fn abs(args: &[Value]) -> Result<Value, Error> {
    Ok(number(as_f64(&args[0]).abs()))
}

fn ceil(args: &[Value]) -> Result<Value, Error> {
    Ok(number(as_f64(&args[0]).ceil()))
}

fn floor(args: &[Value]) -> Result<Value, Error> {
    Ok(number(as_f64(&args[0]).floor()))
}

fn numbers(value: &Value, function: &str) -> Result<Vec<f64>, Error> {
    value
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| Error::Runtime(format!("{function}() expects an array of numbers")))
        })
        .collect()
}

fn sum(args: &[Value]) -> Result<Value, Error> {
    Ok(number(numbers(&args[0], "sum")?.iter().sum()))
}

fn extreme(args: &[Value], function: &str, pick_greater: bool) -> Result<Value, Error> {
    let items = args[0].as_array().map(Vec::as_slice).unwrap_or_default();
    if items.is_empty() {
        return Ok(Value::Null);
    }
    if items.iter().all(Value::is_string) {
        let mut strings: Vec<&str> = items.iter().map(as_str).collect();
        strings.sort_unstable();
        let pick = if pick_greater {
            strings.last()
        } else {
            strings.first()
        };
        return Ok(pick.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null));
    }
    let values = numbers(&args[0], function)?;
    let pick = values.into_iter().reduce(|a, b| {
        if (b > a) == pick_greater {
            b
        } else {
            a
        }
    });
    Ok(pick.map(number).unwrap_or(Value::Null))
}

fn max(args: &[Value]) -> Result<Value, Error> {
    extreme(args, "max", true)
}

fn min(args: &[Value]) -> Result<Value, Error> {
    extreme(args, "min", false)
}

fn sort(args: &[Value]) -> Result<Value, Error> {
    let items = args[0].as_array().cloned().unwrap_or_default();
    if items.iter().all(Value::is_string) {
        let mut strings: Vec<String> = items.iter().map(|v| as_str(v).to_string()).collect();
        strings.sort();
        return Ok(Value::Array(strings.into_iter().map(Value::String).collect()));
    }
    let mut values = numbers(&args[0], "sort")?;
    values.sort_by(|a, b| a.total_cmp(b));
    Ok(Value::Array(values.into_iter().map(number).collect()))
}

fn reverse(args: &[Value]) -> Result<Value, Error> {
    Ok(match &args[0] {
        Value::String(s) => Value::String(s.chars().rev().collect()),
        Value::Array(items) => Value::Array(items.iter().rev().cloned().collect()),
        other => other.clone(),
    })
}

fn env(args: &[Value]) -> Result<Value, Error> {
    Ok(std::env::var(as_str(&args[0]))
        .map(Value::String)
        .unwrap_or(Value::Null))
}

fn base64_encode(args: &[Value]) -> Result<Value, Error> {
    Ok(Value::String(
        base64::engine::general_purpose::STANDARD.encode(as_str(&args[0])),
    ))
}

fn base64_decode(args: &[Value]) -> Result<Value, Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(as_str(&args[0]))
        .map_err(|e| Error::Runtime(format!("base64_decode(): {e}")))?;
    String::from_utf8(bytes)
        .map(Value::String)
        .map_err(|e| Error::Runtime(format!("base64_decode(): {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, Error> {
        FunctionRegistry::with_builtins().call(name, &args)
    }

    #[test]
    fn test_length_and_contains() {
        assert_eq!(call("length", vec![json!([1, 2, 3])]).unwrap(), json!(3));
        assert_eq!(call("length", vec![json!("héllo")]).unwrap(), json!(5));
        assert_eq!(
            call("contains", vec![json!("already exists"), json!("exists")]).unwrap(),
            json!(true)
        );
        assert_eq!(
            call("contains", vec![json!([1, 2]), json!(2.0)]).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_arity_is_checked() {
        let err = call("length", vec![]).unwrap_err();
        assert!(matches!(err, Error::Arity { actual: 0, .. }));
        assert!(call("not_null", vec![]).is_err());
    }

    #[test]
    fn test_argument_types_are_checked() {
        let err = call("starts_with", vec![json!(1), json!("a")]).unwrap_err();
        assert_eq!(
            err,
            Error::ArgumentType {
                name: "starts_with".into(),
                index: 1,
                expected: "a string",
                actual: "number",
            }
        );
    }

    #[test]
    fn test_unknown_function() {
        assert_eq!(
            call("nope", vec![]).unwrap_err(),
            Error::UnknownFunction("nope".into())
        );
    }

    #[test]
    fn test_custom_function_registration() {
        let mut registry = FunctionRegistry::new();
        registry.register(
            "double",
            &[ArgType::Number],
            None,
            Arc::new(|args: &[Value]| Ok(number(args[0].as_f64().unwrap_or_default() * 2.0))),
        );
        assert_eq!(registry.call("double", &[json!(21)]).unwrap(), json!(42));
    }

    #[test]
    fn test_numeric_helpers() {
        assert_eq!(call("max", vec![json!([1, 5, 3])]).unwrap(), json!(5));
        assert_eq!(call("min", vec![json!(["b", "a"])]).unwrap(), json!("a"));
        assert_eq!(call("sum", vec![json!([1, 2.5])]).unwrap(), json!(3.5));
        assert_eq!(call("sort", vec![json!([3, 1, 2])]).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(
            call("join", vec![json!("-"), json!(["a", "b"])]).unwrap(),
            json!("a-b")
        );
        assert_eq!(
            call("split", vec![json!("a,b"), json!(",")]).unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(
            call("base64_decode", vec![json!("aGVsbG8=")]).unwrap(),
            json!("hello")
        );
        assert_eq!(call("to_number", vec![json!("42")]).unwrap(), json!(42));
    }
}
