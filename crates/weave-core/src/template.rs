use liquid::model::{KString, Value as LiquidValue};
use liquid::{Object, Parser, ParserBuilder};
use liquid_core::{Display_filter, Filter, FilterReflection, ParseFilter, Runtime, ValueView};
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::error::{RecipeError, RecipeResult};

/// Converts runs of whitespace/`-` into `_`, splits camelCase boundaries,
/// lowercases, drops anything that isn't alphanumeric/underscore, then
/// collapses and trims underscore runs.
fn to_snake_case(input: &str) -> String {
    let mut with_underscores = String::with_capacity(input.len());
    let mut prev_was_lower_or_digit = false;
    for ch in input.chars() {
        if ch.is_whitespace() || ch == '-' {
            with_underscores.push('_');
            prev_was_lower_or_digit = false;
            continue;
        }
        if ch.is_uppercase() && prev_was_lower_or_digit {
            with_underscores.push('_');
        }
        with_underscores.push(ch);
        prev_was_lower_or_digit = ch.is_lowercase() || ch.is_ascii_digit();
    }

    let lowered = with_underscores.to_lowercase();

    let mut cleaned = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            cleaned.push(ch);
        }
    }

    let mut collapsed = String::with_capacity(cleaned.len());
    let mut last_was_underscore = false;
    for ch in cleaned.chars() {
        if ch == '_' {
            if !last_was_underscore {
                collapsed.push(ch);
            }
            last_was_underscore = true;
        } else {
            collapsed.push(ch);
            last_was_underscore = false;
        }
    }

    collapsed.trim_matches('_').to_string()
}

#[derive(Clone, ParseFilter, FilterReflection)]
#[filter(
    name = "snakecase",
    description = "Convert a string to snake_case.",
    parsed(SnakeCaseFilter)
)]
pub struct SnakeCaseFilterParser;

#[derive(Debug, Default, Display_filter)]
#[name = "snakecase"]
struct SnakeCaseFilter;

impl Filter for SnakeCaseFilter {
    fn evaluate(
        &self,
        input: &dyn ValueView,
        _runtime: &dyn Runtime,
    ) -> liquid_core::Result<LiquidValue> {
        let s = input.to_kstr().into_owned();
        Ok(LiquidValue::scalar(to_snake_case(s.as_str())))
    }
}

/// Mirrors python-liquid's `extra=True` environment, which enables a `json`
/// filter alongside `snakecase`: serializes the input (often a whole
/// artifact, not just an interpolated scalar) back to compact JSON text, so
/// a template can emit `{{ items | json }}` instead of hand-rolling a loop.
#[derive(Clone, ParseFilter, FilterReflection)]
#[filter(
    name = "json",
    description = "Serialize a value to a JSON string.",
    parsed(JsonFilter)
)]
pub struct JsonFilterParser;

#[derive(Debug, Default, Display_filter)]
#[name = "json"]
struct JsonFilter;

impl Filter for JsonFilter {
    fn evaluate(
        &self,
        input: &dyn ValueView,
        _runtime: &dyn Runtime,
    ) -> liquid_core::Result<LiquidValue> {
        let owned = input.to_value();
        let value = liquid_to_json(&owned);
        let text = serde_json::to_string(&value).map_err(|e| {
            liquid_core::Error::with_msg(format!("failed to serialize value to JSON: {e}"))
        })?;
        Ok(LiquidValue::scalar(text))
    }
}

fn liquid_to_json(value: &LiquidValue) -> Value {
    match value {
        LiquidValue::Nil => Value::Null,
        LiquidValue::Scalar(s) => {
            if let Some(b) = s.to_bool() {
                Value::Bool(b)
            } else if let Some(i) = s.to_integer() {
                Value::from(i)
            } else if let Some(f) = s.to_float() {
                serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
            } else {
                Value::String(s.to_kstr().into_owned().to_string())
            }
        }
        LiquidValue::Array(items) => Value::Array(items.iter().map(liquid_to_json).collect()),
        LiquidValue::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.to_string(), liquid_to_json(v)))
                .collect(),
        ),
        // Liquid's internal sentinel states (e.g. blank/empty markers) have
        // no JSON equivalent.
        _ => Value::Null,
    }
}

fn json_to_liquid(value: &Value) -> LiquidValue {
    match value {
        Value::Null => LiquidValue::Nil,
        Value::Bool(b) => LiquidValue::scalar(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                LiquidValue::scalar(i)
            } else {
                LiquidValue::scalar(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => LiquidValue::scalar(s.clone()),
        Value::Array(items) => {
            LiquidValue::Array(items.iter().map(json_to_liquid).collect())
        }
        Value::Object(map) => {
            let object: Object = map
                .iter()
                .map(|(k, v)| (KString::from_string(k.clone()), json_to_liquid(v)))
                .collect();
            LiquidValue::Object(object)
        }
    }
}

/// Builds the Liquid `Object` that templates render against, from a flat
/// artifact map.
pub fn globals_from_map<'a>(entries: impl Iterator<Item = (&'a String, &'a Value)>) -> Object {
    entries
        .map(|(k, v)| (KString::from_string(k.clone()), json_to_liquid(v)))
        .collect()
}

/// Alias so downstream crates don't need a direct `liquid` dependency just
/// to hold onto a globals object between render calls.
pub type Globals = Object;

static PARSER: Lazy<Parser> = Lazy::new(|| {
    ParserBuilder::with_stdlib()
        .filter(SnakeCaseFilterParser)
        .filter(JsonFilterParser)
        .build()
        .expect("liquid parser with snakecase/json filters must build")
});

/// Renders a Liquid template string against a set of globals. Empty input
/// returns empty output without invoking the parser.
pub fn render(text: &str, globals: &Object) -> RecipeResult<String> {
    if text.is_empty() {
        return Ok(String::new());
    }

    let template = PARSER.parse(text).map_err(|e| {
        RecipeError::Render(format!(
            "failed to parse template {text:?} (known keys: {:?}): {e}",
            globals.keys().collect::<Vec<_>>()
        ))
    })?;

    template.render(globals).map_err(|e| {
        RecipeError::Render(format!(
            "failed to render template {text:?} (known keys: {:?}): {e}",
            globals.keys().collect::<Vec<_>>()
        ))
    })
}

/// Re-renders `text` until a fixed point or no Liquid tags remain, guarding
/// against pathological cycles with a hard iteration cap.
pub fn render_nested(text: &str, globals: &Object) -> RecipeResult<String> {
    const MAX_PASSES: usize = 10;
    let mut current = text.to_string();
    for _ in 0..MAX_PASSES {
        let rendered = render(&current, globals)?;
        if rendered == current || !has_liquid_tags(&rendered) {
            return Ok(rendered);
        }
        current = rendered;
    }
    Err(RecipeError::Render(format!(
        "template {text:?} did not reach a fixed point within {MAX_PASSES} passes"
    )))
}

fn has_liquid_tags(text: &str) -> bool {
    text.contains("{{") || text.contains("{%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn globals(pairs: &[(&str, Value)]) -> Object {
        let map: BTreeMap<String, Value> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        globals_from_map(map.iter())
    }

    #[test]
    fn empty_text_is_left_identity() {
        let g = globals(&[]);
        assert_eq!(render("", &g).unwrap(), "");
        assert_eq!(render("plain text, no tags", &g).unwrap(), "plain text, no tags");
    }

    #[test]
    fn renders_dotted_path_into_nested_object() {
        let g = globals(&[("person", json!({"name": "Ada"}))]);
        assert_eq!(render("Hello, {{ person.name }}!", &g).unwrap(), "Hello, Ada!");
    }

    #[test]
    fn snakecase_filter_matches_spec_algorithm() {
        let g = globals(&[("title", json!("Hello World--FooBar2Baz"))]);
        let rendered = render("{{ title | snakecase }}", &g).unwrap();
        assert_eq!(rendered, "hello_world_foo_bar2_baz");
    }

    #[test]
    fn snakecase_filter_does_not_split_consecutive_capitals() {
        let g = globals(&[("a", json!("HTTPServer")), ("b", json!("ABC"))]);
        assert_eq!(render("{{ a | snakecase }}", &g).unwrap(), "httpserver");
        assert_eq!(render("{{ b | snakecase }}", &g).unwrap(), "abc");
    }

    #[test]
    fn render_nested_reaches_fixed_point() {
        let g = globals(&[("a", json!("{{ b }}")), ("b", json!("done"))]);
        assert_eq!(render_nested("{{ a }}", &g).unwrap(), "done");
    }

    #[test]
    fn render_error_on_bad_syntax() {
        let g = globals(&[]);
        assert!(render("{{ unterminated", &g).is_err());
    }

    #[test]
    fn json_filter_serializes_whole_values() {
        let g = globals(&[("items", json!(["a", "b", 3]))]);
        assert_eq!(render("{{ items | json }}", &g).unwrap(), r#"["a","b",3]"#);
    }

    #[test]
    fn json_filter_round_trips_nested_objects() {
        let g = globals(&[("person", json!({"name": "Ada", "age": 36}))]);
        let rendered = render("{{ person | json }}", &g).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, json!({"name": "Ada", "age": 36}));
    }
}
