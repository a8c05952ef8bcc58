use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{RecipeError, RecipeResult};

/// The shared, mutable store that steps read from and write to as a recipe
/// executes. Artifacts are arbitrary JSON values keyed by name; config is a
/// separate, parallel map seeded once (from `env_mask` and an optional
/// `--config` file) and not normally touched by step execution.
///
/// `Context` deliberately does not derive `Clone`: [`Context::clone_deep`] is
/// the only way to copy one, so a stray `.clone()` at a call site can never
/// be mistaken for a cheap reference bump.
#[derive(Debug, Default)]
pub struct Context {
    artifacts: BTreeMap<String, Value>,
    config: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifacts(artifacts: BTreeMap<String, Value>) -> Self {
        Self {
            artifacts,
            config: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.artifacts.get(key)
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.artifacts.get(key).cloned().unwrap_or(default)
    }

    /// Looks up `key`, erroring with `missing-file`-adjacent `validation-error`
    /// semantics when absent (mirrors the original's `KeyError` on subscript).
    pub fn require(&self, key: &str) -> RecipeResult<&Value> {
        self.artifacts
            .get(key)
            .ok_or_else(|| RecipeError::Validation(format!("key '{key}' not found in context")))
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.artifacts.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> RecipeResult<Value> {
        self.artifacts
            .remove(key)
            .ok_or_else(|| RecipeError::Validation(format!("key '{key}' not found in context")))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.artifacts.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.artifacts.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.artifacts.iter()
    }

    /// Deep copy of both artifacts and config, for per-iteration/per-substep
    /// isolation under loop and parallel execution.
    pub fn clone_deep(&self) -> Self {
        Self {
            artifacts: self.artifacts.clone(),
            config: self.config.clone(),
        }
    }

    pub fn as_dict(&self) -> Value {
        Value::Object(
            self.artifacts
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn to_json(&self) -> RecipeResult<String> {
        serde_json::to_string(&self.as_dict())
            .map_err(|e| RecipeError::Validation(format!("context is not serializable: {e}")))
    }

    pub fn config(&self) -> &BTreeMap<String, Value> {
        &self.config
    }

    pub fn config_get(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    pub fn set_config(&mut self, config: BTreeMap<String, Value>) {
        self.config = config;
    }

    pub fn config_set(&mut self, key: impl Into<String>, value: Value) {
        self.config.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_deep_is_independent() {
        let mut ctx = Context::new();
        ctx.set("a", Value::from(1));
        let mut cloned = ctx.clone_deep();
        cloned.set("a", Value::from(2));
        cloned.set("b", Value::from("new"));

        assert_eq!(ctx.get("a"), Some(&Value::from(1)));
        assert_eq!(ctx.get("b"), None);
        assert_eq!(cloned.get("a"), Some(&Value::from(2)));
    }

    #[test]
    fn require_missing_key_fails() {
        let ctx = Context::new();
        let err = ctx.require("missing").unwrap_err();
        assert_eq!(err.kind(), "validation-error");
    }

    #[test]
    fn get_or_never_fails_on_missing_key() {
        let ctx = Context::new();
        assert_eq!(ctx.get_or("missing", Value::from("default")), Value::from("default"));
    }

    #[test]
    fn remove_missing_key_fails_but_existing_succeeds() {
        let mut ctx = Context::new();
        ctx.set("k", Value::from(true));
        assert!(ctx.remove("k").is_ok());
        assert!(ctx.remove("k").is_err());
    }

    #[test]
    fn keys_are_stable_and_sorted() {
        let mut ctx = Context::new();
        ctx.set("z", Value::from(1));
        ctx.set("a", Value::from(2));
        let keys: Vec<&String> = ctx.keys().collect();
        assert_eq!(keys, vec!["a", "z"]);
    }
}
