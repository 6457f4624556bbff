//! Tree-walking interpreter over the expression AST

use serde_json::{Map, Value};

use super::functions::FunctionRegistry;
use super::parser::{Ast, Comparator};
use super::{is_truthy, values_equal, Error};
use crate::bindings::Bindings;

pub struct Interpreter<'a> {
    bindings: &'a Bindings,
    functions: &'a FunctionRegistry,
}

impl<'a> Interpreter<'a> {
    pub fn new(bindings: &'a Bindings, functions: &'a FunctionRegistry) -> Self {
        Self {
            bindings,
            functions,
        }
    }

    pub fn eval(&self, ast: &Ast, current: &Value) -> Result<Value, Error> {
        match ast {
            Ast::Identity => Ok(current.clone()),
            Ast::Literal(value) => Ok(value.clone()),
            Ast::Variable(name) => self
                .bindings
                .get(name)
                .cloned()
                .ok_or_else(|| Error::UndefinedVariable(name.clone())),
            Ast::Field(name) => Ok(current.get(name.as_str()).cloned().unwrap_or(Value::Null)),
            Ast::Index(index) => Ok(match current {
                Value::Array(items) => resolve_index(items.len(), *index)
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            }),
            Ast::Slice { start, stop, step } => match current {
                Value::Array(items) => Ok(Value::Array(slice(items, *start, *stop, *step)?)),
                _ => Ok(Value::Null),
            },
            Ast::Subexpr(lhs, rhs) => {
                let left = self.eval(lhs, current)?;
                self.eval(rhs, &left)
            }
            Ast::Pipe(lhs, rhs) => {
                let left = self.eval(lhs, current)?;
                self.eval(rhs, &left)
            }
            Ast::Projection(lhs, rhs) => match self.eval(lhs, current)? {
                Value::Array(items) => self.project(items.iter(), rhs),
                _ => Ok(Value::Null),
            },
            Ast::ValueProjection(lhs, rhs) => match self.eval(lhs, current)? {
                Value::Object(map) => self.project(map.values(), rhs),
                _ => Ok(Value::Null),
            },
            Ast::Flatten(inner) => match self.eval(inner, current)? {
                Value::Array(items) => {
                    let mut flat = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::Array(nested) => flat.extend(nested),
                            other => flat.push(other),
                        }
                    }
                    Ok(Value::Array(flat))
                }
                _ => Ok(Value::Null),
            },
            Ast::Filter {
                lhs,
                rhs,
                predicate,
            } => match self.eval(lhs, current)? {
                Value::Array(items) => {
                    let mut kept = Vec::new();
                    for item in &items {
                        if is_truthy(&self.eval(predicate, item)?) {
                            kept.push(item);
                        }
                    }
                    self.project(kept.into_iter(), rhs)
                }
                _ => Ok(Value::Null),
            },
            Ast::MultiList(items) => {
                if current.is_null() {
                    return Ok(Value::Null);
                }
                let values = items
                    .iter()
                    .map(|item| self.eval(item, current))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(values))
            }
            Ast::MultiHash(pairs) => {
                if current.is_null() {
                    return Ok(Value::Null);
                }
                let mut map = Map::new();
                for (key, expr) in pairs {
                    map.insert(key.clone(), self.eval(expr, current)?);
                }
                Ok(Value::Object(map))
            }
            Ast::Function(name, args) => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg, current))
                    .collect::<Result<Vec<_>, _>>()?;
                self.functions.call(name, &values)
            }
            Ast::Not(inner) => Ok(Value::Bool(!is_truthy(&self.eval(inner, current)?))),
            Ast::And(lhs, rhs) => {
                let left = self.eval(lhs, current)?;
                if is_truthy(&left) {
                    self.eval(rhs, current)
                } else {
                    Ok(left)
                }
            }
            Ast::Or(lhs, rhs) => {
                let left = self.eval(lhs, current)?;
                if is_truthy(&left) {
                    Ok(left)
                } else {
                    self.eval(rhs, current)
                }
            }
            Ast::Compare(op, lhs, rhs) => {
                let left = self.eval(lhs, current)?;
                let right = self.eval(rhs, current)?;
                Ok(compare(op, &left, &right))
            }
        }
    }

    fn project<'v>(
        &self,
        items: impl Iterator<Item = &'v Value>,
        rhs: &Ast,
    ) -> Result<Value, Error> {
        let mut out = Vec::new();
        for item in items {
            let value = self.eval(rhs, item)?;
            if !value.is_null() {
                out.push(value);
            }
        }
        Ok(Value::Array(out))
    }
}

fn compare(op: &Comparator, left: &Value, right: &Value) -> Value {
    match op {
        Comparator::Eq => Value::Bool(values_equal(left, right)),
        Comparator::Ne => Value::Bool(!values_equal(left, right)),
        _ => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                },
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                Some(ord) => Value::Bool(match op {
                    Comparator::Lt => ord.is_lt(),
                    Comparator::Le => ord.is_le(),
                    Comparator::Gt => ord.is_gt(),
                    _ => ord.is_ge(),
                }),
                None => Value::Null,
            }
        }
    }
}

fn resolve_index(len: usize, index: i64) -> Option<usize> {
    if index < 0 {
        let from_end = index.unsigned_abs() as usize;
        len.checked_sub(from_end)
    } else {
        Some(index as usize)
    }
}

fn slice(
    items: &[Value],
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<Value>, Error> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Error::Runtime("slice step cannot be 0".to_string()));
    }
    let len = items.len() as i64;
    let adjust = |value: i64| -> i64 {
        if value < 0 {
            let shifted = value + len;
            if shifted < 0 {
                if step < 0 {
                    -1
                } else {
                    0
                }
            } else {
                shifted
            }
        } else if value >= len {
            if step < 0 {
                len - 1
            } else {
                len
            }
        } else {
            value
        }
    };
    let start = match start {
        Some(s) => adjust(s),
        None if step < 0 => len - 1,
        None => 0,
    };
    let stop = match stop {
        Some(s) => adjust(s),
        None if step < 0 => -1,
        None => len,
    };

    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        if let Some(item) = items.get(i as usize) {
            out.push(item.clone());
        }
        i += step;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;
    use serde_json::json;

    fn eval(expr: &str, value: Value) -> Value {
        let functions = FunctionRegistry::with_builtins();
        let bindings = Bindings::new();
        Interpreter::new(&bindings, &functions)
            .eval(&parse(expr).unwrap(), &value)
            .unwrap()
    }

    #[test]
    fn test_index_and_negative_index() {
        let data = json!({"items": [1, 2, 3]});
        assert_eq!(eval("items[0]", data.clone()), json!(1));
        assert_eq!(eval("items[-1]", data.clone()), json!(3));
        assert_eq!(eval("items[5]", data), Value::Null);
    }

    #[test]
    fn test_slices() {
        let data = json!([0, 1, 2, 3, 4]);
        assert_eq!(eval("[1:3]", data.clone()), json!([1, 2]));
        assert_eq!(eval("[::-1]", data.clone()), json!([4, 3, 2, 1, 0]));
        assert_eq!(eval("[-2:]", data), json!([3, 4]));
    }

    #[test]
    fn test_projection_skips_nulls() {
        let data = json!({"items": [{"name": "a"}, {"other": 1}, {"name": "b"}]});
        assert_eq!(eval("items[*].name", data), json!(["a", "b"]));
    }

    #[test]
    fn test_value_projection_and_flatten() {
        let data = json!({"a": {"x": [1, 2]}, "b": {"x": [3]}});
        assert_eq!(eval("*.x[]", data), json!([1, 2, 3]));
    }

    #[test]
    fn test_logical_operators() {
        let data = json!({"a": true, "b": "", "c": "x"});
        assert_eq!(eval("a && c", data.clone()), json!("x"));
        assert_eq!(eval("b || c", data.clone()), json!("x"));
        assert_eq!(eval("!b", data), json!(true));
    }

    #[test]
    fn test_multi_select() {
        let data = json!({"metadata": {"name": "n", "namespace": "ns"}});
        assert_eq!(
            eval("metadata.[name, namespace]", data.clone()),
            json!(["n", "ns"])
        );
        assert_eq!(
            eval("metadata.{n: name}", data),
            json!({"n": "n"})
        );
    }

    #[test]
    fn test_ordering_on_mixed_types_is_null() {
        assert_eq!(eval("`1` < 'a'", Value::Null), Value::Null);
        assert_eq!(eval("'a' < 'b'", Value::Null), json!(true));
    }
}
