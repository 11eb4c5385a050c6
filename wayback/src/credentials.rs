//! API credential rotation and health bookkeeping.
//!
//! The pool is an ordered list of API keys plus a pointer to the one in use.
//! Callers report each request's outcome through [`CredentialPool::mark_success`]
//! and [`CredentialPool::mark_failed`]; [`CredentialPool::rotate`] then moves the
//! pointer to the next key that has not been marked bad. All of it is written
//! through to the [`KvStore`] so rotation order and health survive restarts.

use crate::clock::Clock;
use crate::store::KvStore;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Keys shorter than this are rejected outright; real YouTube API keys are 39 characters.
pub const MIN_TOKEN_LEN: usize = 35;

/// Substrings (matched case-insensitively) that mark a failure as quota exhaustion.
pub const QUOTA_KEYWORDS: [&str; 4] = [
    "quota",
    "exceeded",
    "dailyLimitExceeded",
    "rateLimitExceeded",
];

/// Failures older than this are forgiven when the pool is loaded.
const DAILY_RESET: SignedDuration = SignedDuration::from_hours(24);

const KEYS_KEY: &str = "api_keys";
const INDEX_KEY: &str = "current_key_index";
const STATS_KEY: &str = "key_stats";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub request_count: u64,
    pub success_count: u64,
    pub failed: bool,
    pub quota_exceeded: bool,
    pub last_used_at: Option<Timestamp>,
    pub last_failed_at: Option<Timestamp>,
}

impl Health {
    fn is_usable(&self) -> bool {
        !self.failed && !self.quota_exceeded
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub health: Health,
}

/// A display-safe snapshot of one credential.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub masked_token: String,
    pub is_current: bool,
    pub failed: bool,
    pub quota_exceeded: bool,
    pub request_count: u64,
    pub success_count: u64,
    /// Successful requests as a fraction of all requests, if any were made.
    pub success_rate: Option<f64>,
    pub last_used_at: Option<Timestamp>,
    pub last_failed_at: Option<Timestamp>,
}

/// Shortens a key for logs and display: `…` followed by its last four characters.
pub fn mask_token(token: &str) -> String {
    let tail: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("…{tail}")
}

fn is_quota_error(error_text: &str) -> bool {
    let lowered = error_text.to_lowercase();
    QUOTA_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(&keyword.to_lowercase()))
}

#[derive(Debug)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    current: Option<usize>,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl CredentialPool {
    /// Loads the pool from `store`, forgiving failures older than a day.
    ///
    /// Missing or malformed entries are treated as empty, so a fresh store
    /// yields an empty pool.
    pub fn load(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        let tokens: Vec<String> = store
            .get(KEYS_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let mut stats: HashMap<String, Health> = store
            .get(STATS_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let index: Option<usize> = store
            .get(INDEX_KEY)
            .and_then(|v| serde_json::from_value(v).ok());

        let now = clock.now();
        let mut forgiven = 0;
        let mut credentials = Vec::with_capacity(tokens.len());
        for token in tokens {
            if credentials.iter().any(|c: &Credential| c.token == token) {
                continue;
            }
            let mut health = stats.remove(&token).unwrap_or_default();
            if let Some(failed_at) = health.last_failed_at
                && (health.failed || health.quota_exceeded)
                && now.duration_since(failed_at) > DAILY_RESET
            {
                health.failed = false;
                health.quota_exceeded = false;
                forgiven += 1;
            }
            credentials.push(Credential { token, health });
        }

        let current = if credentials.is_empty() {
            None
        } else {
            Some(index.filter(|&i| i < credentials.len()).unwrap_or(0))
        };

        tracing::debug!(
            credentials = credentials.len(),
            current = ?current,
            forgiven,
            "loaded credential pool"
        );

        let pool = Self {
            credentials,
            current,
            store,
            clock,
        };
        if forgiven > 0 {
            pool.persist();
        }
        pool
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn get(&self, token: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.token == token)
    }

    /// Appends `token` with a clean health record.
    ///
    /// Returns `false` without changing anything if the token is blank, shorter
    /// than [`MIN_TOKEN_LEN`], or already in the pool.
    pub fn add(&mut self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() || token.chars().count() < MIN_TOKEN_LEN {
            tracing::debug!("rejected credential that is too short");
            return false;
        }
        if self.get(token).is_some() {
            tracing::debug!(credential = %mask_token(token), "rejected duplicate credential");
            return false;
        }

        self.credentials.push(Credential {
            token: token.to_string(),
            health: Health::default(),
        });
        if self.current.is_none() {
            self.current = Some(0);
        }
        tracing::info!(credential = %mask_token(token), "added credential");
        self.persist();
        true
    }

    /// Removes `token`, keeping the rotation pointer on a valid entry.
    pub fn remove(&mut self, token: &str) -> bool {
        let Some(position) = self.credentials.iter().position(|c| c.token == token) else {
            return false;
        };
        self.credentials.remove(position);

        self.current = match self.current {
            _ if self.credentials.is_empty() => None,
            Some(current) if position <= current => Some(current.saturating_sub(1)),
            other => other,
        };
        tracing::info!(credential = %mask_token(token), "removed credential");
        self.persist();
        true
    }

    pub fn current(&self) -> Option<&Credential> {
        self.current.and_then(|i| self.credentials.get(i))
    }

    /// Moves to the next usable credential, starting just after the current one.
    ///
    /// At most one full cycle is examined. If every credential is marked failed
    /// or quota-exceeded, the pointer is reset to the first credential and
    /// `false` is returned; callers may still choose to use that credential.
    pub fn rotate(&mut self) -> bool {
        let len = self.credentials.len();
        let Some(start) = self.current else {
            return false;
        };

        let found = (1..=len)
            .map(|offset| (start + offset) % len)
            .find(|&i| self.credentials[i].health.is_usable());

        let rotated = match found {
            Some(next) => {
                tracing::debug!(
                    from = start,
                    to = next,
                    credential = %mask_token(&self.credentials[next].token),
                    "rotated credential"
                );
                self.current = Some(next);
                true
            }
            None => {
                tracing::warn!(credentials = len, "no usable credential left, resetting rotation");
                self.current = Some(0);
                false
            }
        };
        self.persist();
        rotated
    }

    pub fn mark_success(&mut self, token: &str) {
        let now = self.clock.now();
        let Some(credential) = self.credentials.iter_mut().find(|c| c.token == token) else {
            return;
        };
        let health = &mut credential.health;
        health.request_count += 1;
        health.success_count += 1;
        health.failed = false;
        health.quota_exceeded = false;
        health.last_used_at = Some(now);
        self.persist();
    }

    /// Records a failed request; quota exhaustion is inferred from `error_text`.
    pub fn mark_failed(&mut self, token: &str, error_text: &str) {
        let now = self.clock.now();
        let Some(credential) = self.credentials.iter_mut().find(|c| c.token == token) else {
            return;
        };
        let health = &mut credential.health;
        health.request_count += 1;
        health.failed = true;
        health.last_used_at = Some(now);
        health.last_failed_at = Some(now);
        if is_quota_error(error_text) {
            health.quota_exceeded = true;
        }
        tracing::warn!(
            credential = %mask_token(token),
            quota_exceeded = health.quota_exceeded,
            reason = error_text,
            "credential failed"
        );
        self.persist();
    }

    /// Clears the failure flags of every credential.
    pub fn reset_health(&mut self) {
        for credential in &mut self.credentials {
            credential.health.failed = false;
            credential.health.quota_exceeded = false;
        }
        tracing::info!(credentials = self.credentials.len(), "reset credential health");
        self.persist();
    }

    pub fn statuses(&self) -> Vec<CredentialStatus> {
        self.credentials
            .iter()
            .enumerate()
            .map(|(i, c)| CredentialStatus {
                masked_token: mask_token(&c.token),
                is_current: self.current == Some(i),
                failed: c.health.failed,
                quota_exceeded: c.health.quota_exceeded,
                request_count: c.health.request_count,
                success_count: c.health.success_count,
                success_rate: (c.health.request_count > 0)
                    .then(|| c.health.success_count as f64 / c.health.request_count as f64),
                last_used_at: c.health.last_used_at,
                last_failed_at: c.health.last_failed_at,
            })
            .collect()
    }

    fn persist(&self) {
        if let Err(e) = self.try_persist() {
            tracing::warn!(error = %e, "failed to persist credential pool");
        }
    }

    fn try_persist(&self) -> eyre::Result<()> {
        let tokens: Vec<&str> = self.credentials.iter().map(|c| c.token.as_str()).collect();
        let stats: HashMap<&str, &Health> = self
            .credentials
            .iter()
            .map(|c| (c.token.as_str(), &c.health))
            .collect();

        let index = self.current.map(serde_json::to_value).transpose()?;
        self.store.write_batch(vec![
            (KEYS_KEY, Some(serde_json::to_value(tokens)?)),
            (STATS_KEY, Some(serde_json::to_value(stats)?)),
            (INDEX_KEY, index),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn token(tag: char) -> String {
        format!("AIzaSy{}", tag.to_string().repeat(33))
    }

    fn setup() -> (Arc<ManualClock>, Arc<MemoryStore>, CredentialPool) {
        let clock = Arc::new(ManualClock::new(
            "2024-03-01T08:00:00Z".parse::<Timestamp>().unwrap(),
        ));
        let store = Arc::new(MemoryStore::new());
        let pool = CredentialPool::load(store.clone(), clock.clone());
        (clock, store, pool)
    }

    fn pool_of(tags: &[char]) -> (Arc<ManualClock>, Arc<MemoryStore>, CredentialPool) {
        let (clock, store, mut pool) = setup();
        for &tag in tags {
            assert!(pool.add(&token(tag)));
        }
        (clock, store, pool)
    }

    #[test]
    fn add_validates() {
        let (_, _, mut pool) = setup();
        assert!(!pool.add(""));
        assert!(!pool.add("   "));
        assert!(!pool.add(&"x".repeat(MIN_TOKEN_LEN - 1)));
        assert!(pool.add(&"x".repeat(MIN_TOKEN_LEN)));
        assert!(!pool.add(&"x".repeat(MIN_TOKEN_LEN)));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.current_index(), Some(0));
    }

    #[test]
    fn empty_pool_has_no_current() {
        let (_, _, mut pool) = setup();
        assert!(pool.current().is_none());
        assert_eq!(pool.current_index(), None);
        assert!(!pool.rotate());
    }

    #[test]
    fn remove_keeps_pointer_in_range() {
        let (_, _, mut pool) = pool_of(&['a', 'b', 'c']);
        pool.current = Some(2);

        assert!(pool.remove(&token('a')));
        assert_eq!(pool.current_index(), Some(1));
        assert_eq!(pool.current().unwrap().token, token('c'));

        assert!(pool.remove(&token('c')));
        assert_eq!(pool.current_index(), Some(0));

        assert!(!pool.remove(&token('z')));
        assert!(pool.remove(&token('b')));
        assert_eq!(pool.current_index(), None);
        assert!(pool.current().is_none());
    }

    #[test]
    fn remove_after_pointer_leaves_it() {
        let (_, _, mut pool) = pool_of(&['a', 'b', 'c']);
        assert!(pool.remove(&token('c')));
        assert_eq!(pool.current_index(), Some(0));
    }

    #[test]
    fn rotate_skips_bad_credentials() {
        let (_, _, mut pool) = pool_of(&['a', 'b', 'c']);
        pool.mark_failed(
            &token('a'),
            "The request cannot be completed because you have exceeded your quota.",
        );
        pool.mark_failed(&token('b'), "HTTP 500");
        assert!(pool.credentials[0].health.quota_exceeded);
        assert!(!pool.credentials[1].health.quota_exceeded);

        assert!(pool.rotate());
        assert_eq!(pool.current_index(), Some(2));
        assert_eq!(pool.current().unwrap().token, token('c'));
    }

    #[test]
    fn rotate_wraps_around() {
        let (_, _, mut pool) = pool_of(&['a', 'b', 'c']);
        pool.current = Some(2);
        pool.mark_failed(&token('c'), "Network error");
        assert!(pool.rotate());
        assert_eq!(pool.current_index(), Some(0));
    }

    #[test]
    fn rotate_can_return_to_current_if_it_is_clean() {
        let (_, _, mut pool) = pool_of(&['a', 'b']);
        pool.mark_failed(&token('b'), "HTTP 500");
        assert!(pool.rotate());
        assert_eq!(pool.current_index(), Some(0));
    }

    #[test]
    fn rotate_resets_when_everything_is_bad() {
        let (_, _, mut pool) = pool_of(&['a', 'b', 'c']);
        pool.current = Some(1);
        for tag in ['a', 'b', 'c'] {
            pool.mark_failed(&token(tag), "Request timeout");
        }
        assert!(!pool.rotate());
        assert_eq!(pool.current_index(), Some(0));
    }

    #[test]
    fn quota_classification() {
        let cases = [
            ("quota exceeded", true),
            ("QUOTA", true),
            ("dailyLimitExceeded", true),
            ("RATELIMITEXCEEDED", true),
            ("Daily Limit Exceeded", true),
            ("API key not valid. Please pass a valid API key.", false),
            ("HTTP 403", false),
            ("Network error", false),
        ];
        for (text, quota) in cases {
            let (_, _, mut pool) = pool_of(&['a']);
            pool.mark_failed(&token('a'), text);
            let health = &pool.credentials[0].health;
            assert!(health.failed, "{text}");
            assert_eq!(health.quota_exceeded, quota, "{text}");
        }
    }

    #[test]
    fn success_clears_failure_and_counts() {
        let (clock, _, mut pool) = pool_of(&['a']);
        pool.mark_failed(&token('a'), "quota");
        clock.advance(SignedDuration::from_secs(5));
        pool.mark_success(&token('a'));

        let health = &pool.credentials[0].health;
        assert_eq!(health.request_count, 2);
        assert_eq!(health.success_count, 1);
        assert!(!health.failed);
        assert!(!health.quota_exceeded);
        assert_eq!(health.last_used_at, Some(clock.now()));

        let status = &pool.statuses()[0];
        assert_eq!(status.success_rate, Some(0.5));
        assert!(status.is_current);
        assert_eq!(status.masked_token, "…aaaa");
    }

    #[test]
    fn unknown_tokens_are_ignored() {
        let (_, _, mut pool) = pool_of(&['a']);
        pool.mark_failed("nope", "quota");
        pool.mark_success("nope");
        assert_eq!(pool.credentials[0].health, Health::default());
    }

    #[test]
    fn state_survives_reload() {
        let (clock, store, mut pool) = pool_of(&['a', 'b', 'c']);
        pool.mark_failed(&token('a'), "quota");
        assert!(pool.rotate());
        pool.mark_success(&token('b'));

        let reloaded = CredentialPool::load(store.clone(), clock.clone());
        assert_eq!(reloaded.credentials, pool.credentials);
        assert_eq!(reloaded.current_index(), Some(1));
        assert_eq!(
            reloaded
                .credentials()
                .iter()
                .map(|c| c.token.clone())
                .collect::<Vec<_>>(),
            vec![token('a'), token('b'), token('c')]
        );
    }

    #[test]
    fn old_failures_are_forgiven_on_load() {
        let (clock, store, mut pool) = pool_of(&['a', 'b']);
        pool.mark_failed(&token('a'), "quota exceeded");
        clock.advance(SignedDuration::from_hours(20));
        pool.mark_failed(&token('b'), "HTTP 500");
        clock.advance(SignedDuration::from_hours(5));

        let reloaded = CredentialPool::load(store.clone(), clock.clone());
        let a = &reloaded.credentials()[0].health;
        assert!(!a.failed);
        assert!(!a.quota_exceeded);
        assert_eq!(a.request_count, 1);
        assert!(reloaded.credentials()[1].health.failed);
    }

    #[test]
    fn out_of_range_index_is_clamped_on_load() {
        let (clock, store, _) = pool_of(&['a', 'b']);
        store.set(INDEX_KEY, serde_json::json!(7)).unwrap();
        let reloaded = CredentialPool::load(store.clone(), clock.clone());
        assert_eq!(reloaded.current_index(), Some(0));
    }

    #[test]
    fn reset_health_clears_flags() {
        let (_, _, mut pool) = pool_of(&['a', 'b']);
        pool.mark_failed(&token('a'), "quota");
        pool.mark_failed(&token('b'), "HTTP 500");
        pool.reset_health();
        assert!(pool.credentials().iter().all(|c| c.health.is_usable()));
    }

    /// Counts how often the pool writes to its store.
    #[derive(Debug, Default)]
    struct CountingStore {
        inner: MemoryStore,
        writes: std::sync::atomic::AtomicUsize,
    }

    impl CountingStore {
        fn writes(&self) -> usize {
            self.writes.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl KvStore for CountingStore {
        fn get(&self, key: &str) -> Option<serde_json::Value> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: serde_json::Value) -> eyre::Result<()> {
            self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.set(key, value)
        }

        fn delete(&self, key: &str) -> eyre::Result<()> {
            self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.delete(key)
        }

        fn keys(&self) -> Vec<String> {
            self.inner.keys()
        }

        fn write_batch(&self, entries: Vec<crate::store::BatchEntry<'_>>) -> eyre::Result<()> {
            self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.write_batch(entries)
        }
    }

    #[test]
    fn each_mutation_is_a_single_store_write() {
        let clock = Arc::new(ManualClock::new("2024-03-01T08:00:00Z".parse().unwrap()));
        let store = Arc::new(CountingStore::default());
        let mut pool = CredentialPool::load(store.clone(), clock);

        assert!(pool.add(&token('a')));
        assert!(pool.add(&token('b')));
        assert_eq!(store.writes(), 2);

        pool.mark_failed(&token('a'), "quota exceeded");
        assert!(pool.rotate());
        pool.mark_success(&token('b'));
        assert_eq!(store.writes(), 5);

        assert_eq!(store.get(INDEX_KEY), Some(serde_json::json!(1)));
        assert!(pool.remove(&token('a')));
        assert!(pool.remove(&token('b')));
        assert_eq!(store.get(INDEX_KEY), None);
        assert_eq!(store.get(KEYS_KEY), Some(serde_json::json!([])));
    }
}
