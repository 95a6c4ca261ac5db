//! Argument schemas: rendered as JSON schema for the reasoning backend and
//! used to validate incoming calls field by field.
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy)]
pub enum ParamKind {
    Integer { min: i64, max: i64 },
    Number { min: f64, max: f64 },
    /// Non-blank string of at most `max_len` characters.
    String { max_len: usize },
    Boolean,
    Enum(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self { name, kind, required: true, description }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self { name, kind, required: false, description }
    }

    fn schema(&self) -> Value {
        let mut s = match self.kind {
            ParamKind::Integer { min, max } => json!({"type": "integer", "minimum": min, "maximum": max}),
            ParamKind::Number { min, max } => json!({"type": "number", "minimum": min, "maximum": max}),
            ParamKind::String { max_len } => json!({"type": "string", "minLength": 1, "maxLength": max_len}),
            ParamKind::Boolean => json!({"type": "boolean"}),
            ParamKind::Enum(values) => json!({"type": "string", "enum": values}),
        };
        s["description"] = Value::String(self.description.to_string());
        s
    }

    /// Check one present value, returning its normalized form.
    fn check(&self, tool: &str, value: &Value) -> Result<Value, String> {
        let field = self.name;
        match self.kind {
            ParamKind::Integer { min, max } => {
                let n = value
                    .as_i64()
                    .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9e15).map(|f| f as i64))
                    .ok_or_else(|| format!("argument `{field}` of `{tool}` must be an integer, got {}", kind_of(value)))?;
                if n < min || n > max {
                    return Err(format!("argument `{field}` of `{tool}` must be within [{min}, {max}], got {n}"));
                }
                Ok(json!(n))
            }
            ParamKind::Number { min, max } => {
                let n = value
                    .as_f64()
                    .filter(|f| f.is_finite())
                    .ok_or_else(|| format!("argument `{field}` of `{tool}` must be a number, got {}", kind_of(value)))?;
                if n < min || n > max {
                    return Err(format!("argument `{field}` of `{tool}` must be within [{min}, {max}], got {n}"));
                }
                Ok(json!(n))
            }
            ParamKind::String { max_len } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("argument `{field}` of `{tool}` must be a string, got {}", kind_of(value)))?;
                // Whitespace is meaningful text; only the empty string is rejected.
                if s.is_empty() {
                    return Err(format!("argument `{field}` of `{tool}` must not be empty"));
                }
                let len = s.chars().count();
                if len > max_len {
                    return Err(format!("argument `{field}` of `{tool}` is {len} characters long; the limit is {max_len}"));
                }
                Ok(value.clone())
            }
            ParamKind::Boolean => value
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| format!("argument `{field}` of `{tool}` must be a boolean, got {}", kind_of(value))),
            ParamKind::Enum(values) => {
                let s = value
                    .as_str()
                    .map(|s| s.trim().to_ascii_lowercase())
                    .ok_or_else(|| format!("argument `{field}` of `{tool}` must be a string, got {}", kind_of(value)))?;
                if values.contains(&s.as_str()) {
                    Ok(Value::String(s))
                } else {
                    Err(format!("argument `{field}` of `{tool}` must be one of {values:?}, got {s:?}"))
                }
            }
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// JSON schema for an argument object.
pub fn object_schema(params: &[ParamSpec]) -> Value {
    let properties: Map<String, Value> = params
        .iter()
        .map(|p| (p.name.to_string(), p.schema()))
        .collect();
    let required: Vec<&str> = params.iter().filter(|p| p.required).map(|p| p.name).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Validate `args` against `params`. Returns the normalized argument object,
/// or a message naming the first offending field.
///
/// `null` stands for "absent": a null top-level object is treated as `{}` and
/// null optional fields are dropped.
pub fn validate(tool: &str, params: &[ParamSpec], args: &Value) -> Result<Value, String> {
    let empty = Map::new();
    let obj = match args {
        Value::Null => &empty,
        Value::Object(o) => o,
        other => return Err(format!("arguments of `{tool}` must be a JSON object, got {}", kind_of(other))),
    };

    if let Some(unknown) = obj.keys().find(|k| !params.iter().any(|p| p.name == k.as_str())) {
        return Err(format!("unknown argument `{unknown}` for `{tool}`"));
    }

    let mut out = Map::new();
    for p in params {
        match obj.get(p.name) {
            None | Some(Value::Null) if p.required => {
                return Err(format!("missing required argument `{}` for `{tool}`", p.name));
            }
            None | Some(Value::Null) => {}
            Some(v) => {
                out.insert(p.name.to_string(), p.check(tool, v)?);
            }
        }
    }
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: &[ParamSpec] = &[
        ParamSpec::required("x", ParamKind::Integer { min: 0, max: 100 }, "x"),
        ParamSpec::optional("button", ParamKind::Enum(&["left", "right"]), "button"),
        ParamSpec::optional("text", ParamKind::String { max_len: 5 }, "text"),
    ];

    #[test]
    fn missing_required_field_is_named() {
        let err = validate("t", PARAMS, &json!({})).unwrap_err();
        assert!(err.contains("`x`"), "{err}");
        let err = validate("t", PARAMS, &json!({"x": null})).unwrap_err();
        assert!(err.contains("missing required argument `x`"), "{err}");
    }

    #[test]
    fn wrong_types_and_ranges_are_named() {
        let err = validate("t", PARAMS, &json!({"x": "5"})).unwrap_err();
        assert!(err.contains("`x`") && err.contains("integer"), "{err}");
        let err = validate("t", PARAMS, &json!({"x": 101})).unwrap_err();
        assert!(err.contains("[0, 100]"), "{err}");
        let err = validate("t", PARAMS, &json!({"x": 1, "button": "middle"})).unwrap_err();
        assert!(err.contains("`button`"), "{err}");
        let err = validate("t", PARAMS, &json!({"x": 1, "text": "toolong"})).unwrap_err();
        assert!(err.contains("`text`"), "{err}");
    }

    #[test]
    fn unknown_fields_and_non_objects_are_rejected() {
        let err = validate("t", PARAMS, &json!({"x": 1, "y": 2})).unwrap_err();
        assert!(err.contains("unknown argument `y`"), "{err}");
        let err = validate("t", PARAMS, &json!([1])).unwrap_err();
        assert!(err.contains("JSON object"), "{err}");
    }

    #[test]
    fn whitespace_strings_pass_but_empty_ones_do_not() {
        let v = validate("t", PARAMS, &json!({"x": 1, "text": "  "})).unwrap();
        assert_eq!(v["text"], "  ");
        let err = validate("t", PARAMS, &json!({"x": 1, "text": ""})).unwrap_err();
        assert!(err.contains("must not be empty"), "{err}");
    }

    #[test]
    fn normalizes_values() {
        let v = validate("t", PARAMS, &json!({"x": 3.0, "button": " Right ", "text": null})).unwrap();
        assert_eq!(v, json!({"x": 3, "button": "right"}));
    }

    #[test]
    fn schema_lists_required_fields() {
        let s = object_schema(PARAMS);
        assert_eq!(s["required"], json!(["x"]));
        assert_eq!(s["properties"]["button"]["enum"], json!(["left", "right"]));
    }
}
