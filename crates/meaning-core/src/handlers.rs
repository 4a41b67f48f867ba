//! Capability-based handler registry.
//!
//! Handlers are injected at construction; there is no runtime discovery. Untrusted
//! generated code runs only out of process through [`ProcessHandler`], which enforces a
//! timeout and speaks JSON over stdin/stdout.

use crate::error::{MeaningError, MeaningResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[async_trait]
pub trait Handler: Send + Sync {
    fn key(&self) -> &str;

    async fn execute(&self, input: Value) -> MeaningResult<Value>;
}

/// Owned by the caller and passed by reference; keys are unique.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> MeaningResult<Self> {
        let mut map = BTreeMap::new();
        for handler in handlers {
            let key = handler.key().to_string();
            if map.contains_key(&key) {
                return Err(MeaningError::Config(format!("duplicate handler key '{}'", key)));
            }
            map.insert(key, handler);
        }
        info!(target: "meaning::handlers", count = map.len(), "Handler registry built");
        Ok(Self { handlers: map })
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub async fn execute(&self, key: &str, input: Value) -> MeaningResult<Value> {
        let handler = self
            .get(key)
            .ok_or_else(|| MeaningError::Handler(format!("no handler registered for '{}'", key)))?;
        handler.execute(input).await
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

/// Runs an external program per call: `{"objective": input}` on stdin, JSON on stdout.
#[derive(Debug, Clone)]
pub struct ProcessHandler {
    key: String,
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessHandler {
    pub fn new(key: &str, program: impl Into<PathBuf>) -> Self {
        Self {
            key: key.to_string(),
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Handler for ProcessHandler {
    fn key(&self) -> &str {
        &self.key
    }

    async fn execute(&self, input: Value) -> MeaningResult<Value> {
        let payload = serde_json::to_vec(&serde_json::json!({ "objective": input }))
            .map_err(|e| MeaningError::Handler(e.to_string()))?;

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MeaningError::Handler(format!("{}: failed to spawn {}: {}", self.key, self.program.display(), e))
            })?;

        // The stdin write shares the deadline: a child that never reads must not stall us.
        let exchange = async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(&payload)
                    .await
                    .map_err(|e| MeaningError::Handler(format!("{}: stdin write failed: {}", self.key, e)))?;
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| MeaningError::Handler(format!("{}: wait failed: {}", self.key, e)))
        };

        // Dropping the future on expiry drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(target: "meaning::handlers", key = %self.key, timeout_ms = self.timeout.as_millis() as u64, "Handler timed out");
                return Err(MeaningError::Handler(format!(
                    "{}: timed out after {:?}",
                    self.key, self.timeout
                )));
            }
        };

        if !output.status.success() {
            return Err(MeaningError::Handler(format!(
                "{}: exited with {}: {}",
                self.key,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| MeaningError::Handler(format!("{}: invalid JSON output: {}", self.key, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    #[async_trait]
    impl Handler for Echo {
        fn key(&self) -> &str {
            self.0
        }

        async fn execute(&self, input: Value) -> MeaningResult<Value> {
            Ok(serde_json::json!({ "handler": self.0, "input": input }))
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_key() {
        let registry =
            HandlerRegistry::new(vec![Arc::new(Echo("a")), Arc::new(Echo("b"))]).unwrap();
        assert_eq!(registry.keys(), vec!["a", "b"]);
        let out = registry.execute("b", serde_json::json!(1)).await.unwrap();
        assert_eq!(out["handler"], "b");
        assert!(registry.get("c").is_none());
        assert!(matches!(
            registry.execute("c", Value::Null).await,
            Err(MeaningError::Handler(_))
        ));
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = HandlerRegistry::new(vec![Arc::new(Echo("a")), Arc::new(Echo("a"))]).unwrap_err();
        assert!(matches!(err, MeaningError::Config(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_handler_round_trips_json() {
        let handler = ProcessHandler::new("cat", "cat");
        let out = handler.execute(serde_json::json!("find dogs")).await.unwrap();
        assert_eq!(out, serde_json::json!({ "objective": "find dogs" }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_handler_enforces_timeout() {
        let handler = ProcessHandler::new("slow", "sh")
            .with_args(["-c", "sleep 5"])
            .with_timeout(Duration::from_millis(100));
        let err = handler.execute(Value::Null).await.unwrap_err();
        assert!(matches!(err, MeaningError::Handler(ref m) if m.contains("timed out")), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_covers_a_child_that_never_reads_stdin() {
        let handler = ProcessHandler::new("deaf", "sh")
            .with_args(["-c", "sleep 5"])
            .with_timeout(Duration::from_millis(200));
        let objective = "x".repeat(1024 * 1024);
        let started = std::time::Instant::now();
        let err = handler.execute(Value::String(objective)).await.unwrap_err();
        assert!(matches!(err, MeaningError::Handler(ref m) if m.contains("timed out")), "{err}");
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_handler_rejects_bad_output_and_failure() {
        let garbage = ProcessHandler::new("garbage", "sh").with_args(["-c", "cat >/dev/null; echo not-json"]);
        assert!(matches!(garbage.execute(Value::Null).await, Err(MeaningError::Handler(_))));
        let failing = ProcessHandler::new("fail", "sh").with_args(["-c", "cat >/dev/null; exit 3"]);
        assert!(matches!(failing.execute(Value::Null).await, Err(MeaningError::Handler(_))));
    }
}
