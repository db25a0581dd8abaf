//! In-process store with TTL reaping and ordered sets
//!
//! Two maps behind one mutex: string values (counters share the slot, stored
//! canonically) and ordered sets. Expiry is lazy on read plus a background
//! reaper on a fixed cadence. `close` drops all state; any later operation
//! returns [`RateLimitError::StoreClosed`].

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{RateLimitError, Result};
use crate::store::Store;

/// Default reaper cadence
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Default)]
struct State {
    values: HashMap<String, ValueEntry>,
    sets: HashMap<String, BTreeSet<(i64, String)>>,
}

/// In-process [`Store`] implementation
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    closed: Arc<AtomicBool>,
    reaper_cancel: CancellationToken,
}

impl MemoryStore {
    /// Create a store with the default one-minute reap cadence
    pub fn new() -> Self {
        Self::with_reap_interval(DEFAULT_REAP_INTERVAL)
    }

    /// Create a store with a custom reap cadence
    pub fn with_reap_interval(interval: Duration) -> Self {
        let state: Arc<Mutex<State>> = Arc::new(Mutex::new(State::default()));
        let closed = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let reap_state = Arc::clone(&state);
        let reap_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = reap_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let mut state = reap_state.lock();
                        let before = state.values.len();
                        state.values.retain(|_, entry| !entry.is_expired(now));
                        let dropped = before - state.values.len();
                        if dropped > 0 {
                            trace!(dropped, "reaped expired entries");
                        }
                    }
                }
            }
            debug!("memory store reaper stopped");
        });

        Self {
            state,
            closed,
            reaper_cancel: cancel,
        }
    }

    fn guard(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RateLimitError::StoreClosed);
        }
        Ok(())
    }

    fn read_live(state: &mut State, key: &str) -> Option<ValueEntry> {
        let now = Instant::now();
        match state.values.get(key) {
            Some(entry) if entry.is_expired(now) => {
                state.values.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    fn expiry_from(ttl: Duration) -> Option<Instant> {
        if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_string(&self, key: &str) -> Result<String> {
        self.guard()?;
        let mut state = self.state.lock();
        Ok(Self::read_live(&mut state, key)
            .map(|e| e.value)
            .unwrap_or_default())
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.guard()?;
        let mut state = self.state.lock();
        state.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Self::expiry_from(ttl),
            },
        );
        Ok(())
    }

    async fn get_int(&self, key: &str) -> Result<i64> {
        let raw = self.get_string(key).await?;
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse().map_err(|_| {
            RateLimitError::store(format!("value at {key} is not an integer: {raw}"))
        })
    }

    async fn set_int(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        self.set_string(key, &value.to_string(), ttl).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.guard()?;
        let mut state = self.state.lock();
        let existing = Self::read_live(&mut state, key);

        let current: i64 = match &existing {
            Some(entry) => entry.value.parse().map_err(|_| {
                RateLimitError::store(format!("value at {key} is not an integer"))
            })?,
            None => 0,
        };
        let next = current + delta;

        // Counters keep their TTL across increments.
        let expires_at = existing.and_then(|e| e.expires_at);
        state.values.insert(
            key.to_string(),
            ValueEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.incr_by(key, -delta).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.guard()?;
        let mut state = self.state.lock();
        if Self::read_live(&mut state, key).is_none() {
            return Ok(false);
        }
        let expires_at = Self::expiry_from(ttl);
        if let Some(entry) = state.values.get_mut(key) {
            entry.expires_at = expires_at;
        }
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.guard()?;
        let mut state = self.state.lock();
        Ok(Self::read_live(&mut state, key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.guard()?;
        let mut state = self.state.lock();
        state.values.remove(key);
        state.sets.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.guard()?;
        let mut state = self.state.lock();
        Ok(Self::read_live(&mut state, key).is_some() || state.sets.contains_key(key))
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()> {
        self.guard()?;
        let mut state = self.state.lock();
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert((score, member.to_string()));
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        self.guard()?;
        let mut state = self.state.lock();
        let Some(set) = state.sets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|(score, _)| *score < min || *score > max);
        Ok((before - set.len()) as u64)
    }

    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        self.guard()?;
        let state = self.state.lock();
        Ok(state
            .sets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(score, _)| *score >= min && *score <= max)
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn eval(
        &self,
        _script: &str,
        _keys: &[&str],
        _args: &[&str],
    ) -> Result<serde_json::Value> {
        self.guard()?;
        Err(RateLimitError::unsupported("eval"))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.reaper_cancel.cancel();
        let mut state = self.state.lock();
        state.values.clear();
        state.sets.clear();
        debug!("memory store closed");
        Ok(())
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.reaper_cancel.cancel();
    }
}
