// redactgate-http/src/idempotency.rs
//! Idempotency store and replay middleware.
//!
//! Mutating requests carrying an `Idempotency-Key` header execute the
//! handler at most once per key: the first request's response is stored
//! and later retries replay it verbatim with an `X-Idempotency-Replay:
//! true` marker. Keys are hashed as `sha256(method + path + client_key)`
//! so a client token never appears in the store.
//!
//! Two backends implement [`IdempotencyStore`]: an in-memory map (single
//! instance only; two concurrent identical requests can race its
//! check-then-act window) and Redis, whose atomic `SET NX EX` gives
//! cross-instance exactly-once cache writes and a processing lock.
//!
//! Store outages never fail the primary request: lookup errors degrade to
//! a cache miss and record errors are logged and dropped.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::warn;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};

use crate::errors::SecurityError;
use crate::transport::{RequestHead, Response, StoredResponse};

/// Default retention for stored responses.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Methods the middleware treats as mutating by default.
pub const DEFAULT_MUTATING_METHODS: &[&str] = &["POST", "PUT", "PATCH", "DELETE"];

/// Backend contract for response deduplication.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredResponse>, SecurityError>;
    async fn set(
        &self,
        key: &str,
        response: &StoredResponse,
        ttl: Duration,
    ) -> Result<(), SecurityError>;
    async fn exists(&self, key: &str) -> Result<bool, SecurityError>;

    /// Stores only when no value exists yet; returns whether the write
    /// happened. Atomic on backends that support it.
    async fn set_if_absent(
        &self,
        key: &str,
        response: &StoredResponse,
        ttl: Duration,
    ) -> Result<bool, SecurityError>;

    /// Acquires the processing lock for `key`; returns false when another
    /// request already holds it.
    async fn mark_processing(&self, key: &str, ttl: Duration) -> Result<bool, SecurityError>;
    async fn unmark_processing(&self, key: &str) -> Result<(), SecurityError>;
    async fn is_processing(&self, key: &str) -> Result<bool, SecurityError>;
}

struct MemoryEntry {
    response: StoredResponse,
    expires_at: Instant,
}

/// In-memory store.
///
/// Safe only within one process: there is no cross-instance visibility,
/// and the mark/check pair is not atomic across two tasks arriving in the
/// same instant. Use the Redis backend when running more than one
/// instance.
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    processing: Mutex<HashMap<String, Instant>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<StoredResponse>, SecurityError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.response.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        response: &StoredResponse,
        ttl: Duration,
    ) -> Result<(), SecurityError> {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            MemoryEntry {
                response: response.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, SecurityError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        response: &StoredResponse,
        ttl: Duration,
    ) -> Result<bool, SecurityError> {
        let mut entries = self.entries.lock().unwrap();
        let live = matches!(entries.get(key), Some(e) if e.expires_at > Instant::now());
        if live {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                response: response.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn mark_processing(&self, key: &str, ttl: Duration) -> Result<bool, SecurityError> {
        let mut processing = self.processing.lock().unwrap();
        let now = Instant::now();
        match processing.get(key) {
            Some(expires) if *expires > now => Ok(false),
            _ => {
                processing.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn unmark_processing(&self, key: &str) -> Result<(), SecurityError> {
        self.processing.lock().unwrap().remove(key);
        Ok(())
    }

    async fn is_processing(&self, key: &str) -> Result<bool, SecurityError> {
        let processing = self.processing.lock().unwrap();
        Ok(matches!(processing.get(key), Some(expires) if *expires > Instant::now()))
    }
}

/// Redis-backed store. `SET NX EX` provides atomic exactly-once cache
/// writes and the processing lock across instances.
pub struct RedisIdempotencyStore {
    client: redis::Client,
    prefix: String,
}

impl RedisIdempotencyStore {
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self, SecurityError> {
        let client = redis::Client::open(url)
            .map_err(|e| SecurityError::StoreUnavailable(e.to_string()))?;
        Ok(Self { client, prefix: prefix.into() })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, SecurityError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SecurityError::StoreUnavailable(e.to_string()))
    }

    fn data_key(&self, key: &str) -> String {
        format!("{}:resp:{}", self.prefix, key)
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{}", self.prefix, key)
    }
}

fn encode(response: &StoredResponse) -> Result<String, SecurityError> {
    serde_json::to_string(response).map_err(|e| SecurityError::StoreUnavailable(e.to_string()))
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<StoredResponse>, SecurityError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(self.data_key(key))
            .await
            .map_err(|e| SecurityError::StoreUnavailable(e.to_string()))?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| SecurityError::StoreUnavailable(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        response: &StoredResponse,
        ttl: Duration,
    ) -> Result<(), SecurityError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(self.data_key(key), encode(response)?, ttl.as_secs())
            .await
            .map_err(|e| SecurityError::StoreUnavailable(e.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, SecurityError> {
        let mut conn = self.connection().await?;
        conn.exists(self.data_key(key))
            .await
            .map_err(|e| SecurityError::StoreUnavailable(e.to_string()))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        response: &StoredResponse,
        ttl: Duration,
    ) -> Result<bool, SecurityError> {
        let mut conn = self.connection().await?;
        let outcome: Option<String> = redis::cmd("SET")
            .arg(self.data_key(key))
            .arg(encode(response)?)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| SecurityError::StoreUnavailable(e.to_string()))?;
        Ok(outcome.is_some())
    }

    async fn mark_processing(&self, key: &str, ttl: Duration) -> Result<bool, SecurityError> {
        let mut conn = self.connection().await?;
        let outcome: Option<String> = redis::cmd("SET")
            .arg(self.lock_key(key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| SecurityError::StoreUnavailable(e.to_string()))?;
        Ok(outcome.is_some())
    }

    async fn unmark_processing(&self, key: &str) -> Result<(), SecurityError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.lock_key(key))
            .await
            .map_err(|e| SecurityError::StoreUnavailable(e.to_string()))
    }

    async fn is_processing(&self, key: &str) -> Result<bool, SecurityError> {
        let mut conn = self.connection().await?;
        conn.exists(self.lock_key(key))
            .await
            .map_err(|e| SecurityError::StoreUnavailable(e.to_string()))
    }
}

/// What the replay middleware decided for one request.
#[derive(Debug)]
pub enum IdempotencyDecision {
    /// Not a mutating request, or no key supplied: pass through untouched.
    NotApplicable,
    /// A stored response exists; replay it without invoking the handler.
    Replay(Response),
    /// First time seen; the caller must invoke the handler and then
    /// [`IdempotencyLayer::record`] the response under this hashed key.
    Execute { hashed_key: String },
}

/// The replay middleware around an [`IdempotencyStore`].
pub struct IdempotencyLayer<S> {
    store: S,
    mutating_methods: Vec<String>,
    ttl: Duration,
    processing_ttl: Duration,
}

impl<S: IdempotencyStore> IdempotencyLayer<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            mutating_methods: DEFAULT_MUTATING_METHODS.iter().map(|m| m.to_string()).collect(),
            ttl: DEFAULT_TTL,
            processing_ttl: Duration::from_secs(60),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_mutating_methods(mut self, methods: Vec<String>) -> Self {
        self.mutating_methods = methods.into_iter().map(|m| m.to_ascii_uppercase()).collect();
        self
    }

    /// The store key for a request: the client token never lands in the
    /// store in raw form.
    pub fn hashed_key(&self, head: &RequestHead, client_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(head.method.as_bytes());
        hasher.update(head.path.as_bytes());
        hasher.update(client_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Pre-handler step: replay, conflict, or proceed.
    pub async fn lookup(&self, head: &RequestHead) -> Result<IdempotencyDecision, SecurityError> {
        if !self.mutating_methods.iter().any(|m| *m == head.method) {
            return Ok(IdempotencyDecision::NotApplicable);
        }
        let Some(client_key) = head.headers.get("idempotency-key") else {
            return Ok(IdempotencyDecision::NotApplicable);
        };
        let hashed = self.hashed_key(head, client_key);

        match self.store.get(&hashed).await {
            Ok(Some(stored)) => {
                let mut response = Response::from_stored(stored);
                response.head.headers.set("X-Idempotency-Replay", "true");
                return Ok(IdempotencyDecision::Replay(response));
            }
            Ok(None) => {}
            Err(e) => {
                // A store outage must not fail the request; treat as miss.
                warn!("Idempotency lookup failed, treating as cache miss: {}", e);
                return Ok(IdempotencyDecision::Execute { hashed_key: hashed });
            }
        }

        match self.store.mark_processing(&hashed, self.processing_ttl).await {
            Ok(true) => Ok(IdempotencyDecision::Execute { hashed_key: hashed }),
            Ok(false) => Err(SecurityError::IdempotencyConflict),
            Err(e) => {
                warn!("Idempotency lock failed, proceeding without it: {}", e);
                Ok(IdempotencyDecision::Execute { hashed_key: hashed })
            }
        }
    }

    /// Post-handler step: store the response and release the lock.
    /// Best-effort; store failures are logged, never surfaced.
    pub async fn record(&self, hashed_key: &str, response: &StoredResponse) {
        if let Err(e) = self.store.set_if_absent(hashed_key, response, self.ttl).await {
            warn!("Failed to record idempotent response: {}", e);
        }
        if let Err(e) = self.store.unmark_processing(hashed_key).await {
            warn!("Failed to release idempotency lock: {}", e);
        }
    }

    /// Releases the lock without storing (handler failed).
    pub async fn abandon(&self, hashed_key: &str) {
        if let Err(e) = self.store.unmark_processing(hashed_key).await {
            warn!("Failed to release idempotency lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Headers;

    fn stored(body: &[u8]) -> StoredResponse {
        StoredResponse {
            status: 201,
            headers: Headers::new(),
            body: body.to_vec(),
        }
    }

    fn post(path: &str, key: &str) -> RequestHead {
        RequestHead::new("POST", path).with_header("Idempotency-Key", key)
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_ttl() {
        let store = MemoryIdempotencyStore::new();
        store.set("k", &stored(b"body"), Duration::from_secs(60)).await.unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().unwrap().body, b"body");

        store.set("gone", &stored(b"x"), Duration::from_secs(0)).await.unwrap();
        assert_eq!(store.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_set_if_absent() {
        let store = MemoryIdempotencyStore::new();
        assert!(store.set_if_absent("k", &stored(b"first"), Duration::from_secs(60)).await.unwrap());
        assert!(!store.set_if_absent("k", &stored(b"second"), Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().unwrap().body, b"first");
    }

    #[tokio::test]
    async fn test_processing_lock() {
        let store = MemoryIdempotencyStore::new();
        assert!(store.mark_processing("k", Duration::from_secs(60)).await.unwrap());
        assert!(store.is_processing("k").await.unwrap());
        assert!(!store.mark_processing("k", Duration::from_secs(60)).await.unwrap());
        store.unmark_processing("k").await.unwrap();
        assert!(!store.is_processing("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_layer_ignores_non_mutating_and_keyless_requests() {
        let layer = IdempotencyLayer::new(MemoryIdempotencyStore::new());
        let get = RequestHead::new("GET", "/things").with_header("Idempotency-Key", "abc");
        assert!(matches!(layer.lookup(&get).await.unwrap(), IdempotencyDecision::NotApplicable));

        let keyless = RequestHead::new("POST", "/things");
        assert!(matches!(layer.lookup(&keyless).await.unwrap(), IdempotencyDecision::NotApplicable));
    }

    #[tokio::test]
    async fn test_layer_replays_with_marker() {
        let layer = IdempotencyLayer::new(MemoryIdempotencyStore::new());
        let head = post("/orders", "tok-1");

        let IdempotencyDecision::Execute { hashed_key } = layer.lookup(&head).await.unwrap() else {
            panic!("expected Execute on first sight");
        };
        layer.record(&hashed_key, &stored(b"created")).await;

        let IdempotencyDecision::Replay(replay) = layer.lookup(&head).await.unwrap() else {
            panic!("expected Replay on second sight");
        };
        assert_eq!(replay.head.headers.get("x-idempotency-replay"), Some("true"));
        assert_eq!(replay.head.status, 201);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_conflicts() {
        let layer = IdempotencyLayer::new(MemoryIdempotencyStore::new());
        let head = post("/orders", "tok-2");
        let IdempotencyDecision::Execute { .. } = layer.lookup(&head).await.unwrap() else {
            panic!("expected Execute");
        };
        // Same key again while the first is still processing.
        let err = layer.lookup(&head).await.unwrap_err();
        assert!(matches!(err, SecurityError::IdempotencyConflict));
    }

    #[tokio::test]
    async fn test_different_paths_get_different_keys() {
        let layer = IdempotencyLayer::new(MemoryIdempotencyStore::new());
        let a = layer.hashed_key(&post("/a", "tok"), "tok");
        let b = layer.hashed_key(&post("/b", "tok"), "tok");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_store_outage_degrades_to_miss() {
        struct DownStore;
        #[async_trait]
        impl IdempotencyStore for DownStore {
            async fn get(&self, _: &str) -> Result<Option<StoredResponse>, SecurityError> {
                Err(SecurityError::StoreUnavailable("down".into()))
            }
            async fn set(&self, _: &str, _: &StoredResponse, _: Duration) -> Result<(), SecurityError> {
                Err(SecurityError::StoreUnavailable("down".into()))
            }
            async fn exists(&self, _: &str) -> Result<bool, SecurityError> {
                Err(SecurityError::StoreUnavailable("down".into()))
            }
            async fn set_if_absent(
                &self,
                _: &str,
                _: &StoredResponse,
                _: Duration,
            ) -> Result<bool, SecurityError> {
                Err(SecurityError::StoreUnavailable("down".into()))
            }
            async fn mark_processing(&self, _: &str, _: Duration) -> Result<bool, SecurityError> {
                Err(SecurityError::StoreUnavailable("down".into()))
            }
            async fn unmark_processing(&self, _: &str) -> Result<(), SecurityError> {
                Err(SecurityError::StoreUnavailable("down".into()))
            }
            async fn is_processing(&self, _: &str) -> Result<bool, SecurityError> {
                Err(SecurityError::StoreUnavailable("down".into()))
            }
        }

        let layer = IdempotencyLayer::new(DownStore);
        let decision = layer.lookup(&post("/orders", "tok-3")).await.unwrap();
        assert!(matches!(decision, IdempotencyDecision::Execute { .. }));
        // record must not panic or error either.
        layer.record("k", &stored(b"x")).await;
    }
}
