//! Procedure registry, the callable surface an endpoint exposes.
//!
//! A [`ProcedureRegistry`] maps process ids to procedures. It is the only
//! place remote callers can reach: an invoke naming an id that is not here
//! runs nothing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Outcome of running a procedure. `Ok(None)` is the undefined result.
pub type ProcedureResult = Result<Option<Value>, String>;

/// A locally registered procedure.
pub type Procedure = Arc<dyn Fn(Option<Value>) -> ProcedureResult + Send + Sync>;

/// Thread-safe map of process id to procedure.
#[derive(Clone)]
pub struct ProcedureRegistry {
    procedures: Arc<RwLock<HashMap<String, Procedure>>>,
}

impl ProcedureRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            procedures: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register or replace a procedure. Returns `true` if one was replaced.
    pub fn register(&self, process_id: &str, procedure: Procedure) -> bool {
        let mut procedures = self.procedures.write().unwrap_or_else(|e| e.into_inner());
        procedures
            .insert(process_id.to_string(), procedure)
            .is_some()
    }

    /// Register a procedure over typed arguments and result.
    ///
    /// Missing arguments are handed to serde as `null`, so `()` and
    /// `Option<_>` argument types accept an undefined argument.
    pub fn register_fn<A, R, F>(&self, process_id: &str, f: F) -> bool
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let procedure: Procedure = Arc::new(move |args: Option<Value>| -> ProcedureResult {
            let args: A = serde_json::from_value(args.unwrap_or(Value::Null))
                .map_err(|e| format!("invalid arguments: {e}"))?;
            let result = serde_json::to_value(f(args))
                .map_err(|e| format!("unserializable result: {e}"))?;
            Ok(Some(result))
        });
        self.register(process_id, procedure)
    }

    /// Remove a procedure. Absent ids are ignored.
    pub fn unregister(&self, process_id: &str) -> Option<Procedure> {
        let mut procedures = self.procedures.write().unwrap_or_else(|e| e.into_inner());
        procedures.remove(process_id)
    }

    /// Look up a procedure by process id.
    pub fn get(&self, process_id: &str) -> Option<Procedure> {
        let procedures = self.procedures.read().unwrap_or_else(|e| e.into_inner());
        procedures.get(process_id).cloned()
    }

    /// Whether `process_id` is registered.
    pub fn contains(&self, process_id: &str) -> bool {
        let procedures = self.procedures.read().unwrap_or_else(|e| e.into_inner());
        procedures.contains_key(process_id)
    }

    /// Run `process_id` with `args`. `None` when nothing is registered.
    ///
    /// The lock is released before the procedure runs, so a procedure may
    /// itself register or unregister.
    pub fn call(&self, process_id: &str, args: Option<Value>) -> Option<ProcedureResult> {
        let procedure = self.get(process_id)?;
        Some(procedure(args))
    }

    /// Sorted list of registered ids.
    pub fn process_ids(&self) -> Vec<String> {
        let procedures = self.procedures.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = procedures.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        let procedures = self.procedures.read().unwrap_or_else(|e| e.into_inner());
        procedures.len()
    }

    /// Whether no procedure is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every procedure.
    pub fn clear(&self) {
        let mut procedures = self.procedures.write().unwrap_or_else(|e| e.into_inner());
        procedures.clear();
    }
}

impl Default for ProcedureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn constant(value: Value) -> Procedure {
        Arc::new(move |_: Option<Value>| Ok(Some(value.clone())))
    }

    #[test]
    fn test_register_and_call() {
        let registry = ProcedureRegistry::new();
        assert!(!registry.register("PING", constant(json!("pong"))));
        assert!(registry.contains("PING"));

        let result = registry.call("PING", None).unwrap().unwrap();
        assert_eq!(result, Some(json!("pong")));
    }

    #[test]
    fn test_reregister_replaces() {
        let registry = ProcedureRegistry::new();
        registry.register("P", constant(json!(1)));
        assert!(registry.register("P", constant(json!(2))));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.call("P", None).unwrap().unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let registry = ProcedureRegistry::new();
        assert!(registry.unregister("missing").is_none());
        registry.register("P", constant(json!(1)));
        assert!(registry.unregister("P").is_some());
        assert!(registry.is_empty());
        assert!(registry.call("P", None).is_none());
    }

    #[test]
    fn test_call_runs_procedure_exactly_once() {
        let registry = ProcedureRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        registry.register(
            "INCREMENT",
            Arc::new(move |_: Option<Value>| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Some(json!(n)))
            }),
        );
        assert_eq!(registry.call("INCREMENT", None).unwrap().unwrap(), Some(json!(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_register_fn_typed() {
        let registry = ProcedureRegistry::new();
        registry.register_fn("ADD", |(a, b): (i64, i64)| a + b);
        registry.register_fn("NOTHING", |_: ()| ());

        assert_eq!(registry.call("ADD", Some(json!([2, 3]))).unwrap().unwrap(), Some(json!(5)));
        assert_eq!(registry.call("NOTHING", None).unwrap().unwrap(), Some(Value::Null));

        let err = registry.call("ADD", Some(json!("nope"))).unwrap().unwrap_err();
        assert!(err.contains("invalid arguments"), "got: {err}");
    }

    #[test]
    fn test_procedure_may_touch_registry() {
        let registry = ProcedureRegistry::new();
        let inner = registry.clone();
        registry.register(
            "SELF_REMOVE",
            Arc::new(move |_: Option<Value>| {
                inner.unregister("SELF_REMOVE");
                Ok(None)
            }),
        );
        assert_eq!(registry.call("SELF_REMOVE", None).unwrap().unwrap(), None);
        assert!(!registry.contains("SELF_REMOVE"));
        assert_eq!(registry.process_ids(), Vec::<String>::new());
    }
}
