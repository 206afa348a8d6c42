use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The key-value execution context passed to step handlers.
///
/// One context map is shared by all steps of a workflow instance; each
/// handler receives a snapshot of it and returns the keys it wants merged
/// back in.
pub type Context = Map<String, Value>;

/// Shared mutable execution context for one workflow instance.
///
/// Steps within a wave run concurrently against the same context. Reads
/// and merges are atomic at the map level; key disjointness across a wave
/// is an authoring contract (see [`crate::StepHandler`]).
#[derive(Debug, Clone)]
pub struct SharedContext {
    inner: Arc<RwLock<Context>>,
}

impl SharedContext {
    /// Create a shared context seeded with the workflow input
    pub fn new(initial: Context) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Clone the current contents of the context
    pub async fn snapshot(&self) -> Context {
        self.inner.read().await.clone()
    }

    /// Merge a handler's output into the context, key-wise
    pub async fn merge(&self, updates: Context) {
        if updates.is_empty() {
            return;
        }
        let mut guard = self.inner.write().await;
        for (key, value) in updates {
            guard.insert(key, value);
        }
    }

    /// Look up a single key
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().await.get(key).cloned()
    }

    /// Insert a single key
    pub async fn insert(&self, key: &str, value: Value) {
        self.inner.write().await.insert(key.to_string(), value);
    }
}

/// Serde helpers that (de)serialize `std::time::Duration` as fractional
/// seconds, so authored definitions read `"timeout": 30.0` rather than the
/// default `{secs, nanos}` encoding.
pub mod duration_secs {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a duration as seconds
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    /// Deserialize a duration from seconds
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| D::Error::custom(format!("invalid duration in seconds: {}", secs)))
    }
}
