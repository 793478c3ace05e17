//! In-process store. Expiry is checked lazily on access, which is enough for
//! single-node development and tests.

use super::KvStore;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

enum Slot {
    Text(String),
    Sorted(Vec<(f64, String)>),
}

struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| AppError::Store("memory store lock poisoned".to_string()))?;
        let now = Instant::now();
        data.retain(|_, entry| entry.is_live(now));
        Ok(data)
    }
}

fn wrong_type(key: &str) -> AppError {
    AppError::Store(format!("WRONGTYPE operation against key {}", key))
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == candidate;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !candidate.starts_with(first) || !candidate[first.len()..].ends_with(last) {
        return false;
    }

    let mut rest = &candidate[first.len()..candidate.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    candidate.len() >= first.len() + last.len()
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self.lock()?;
        match data.get(key).map(|e| &e.slot) {
            None => Ok(None),
            Some(Slot::Text(value)) => Ok(Some(value.clone())),
            Some(Slot::Sorted(_)) => Err(wrong_type(key)),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut data = self.lock()?;
        data.insert(
            key.to_string(),
            Entry {
                slot: Slot::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut data = self.lock()?;
        Ok(keys.iter().filter(|k| data.remove(k.as_str()).is_some()).count() as u64)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let data = self.lock()?;
        let mut keys: Vec<String> = data
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut data = self.lock()?;
        let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Text("0".to_string()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::Text(value) => {
                let current: i64 = value.parse().map_err(|_| {
                    AppError::Store(format!("value at {} is not an integer", key))
                })?;
                let next = current + delta;
                *value = next.to_string();
                Ok(next)
            }
            Slot::Sorted(_) => Err(wrong_type(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut data = self.lock()?;
        if let Some(entry) = data.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut data = self.lock()?;
        let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Sorted(Vec::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::Sorted(members) => {
                members.retain(|(_, m)| m != member);
                members.push((score, member.to_string()));
                members.sort_by(|a, b| a.0.total_cmp(&b.0));
                Ok(())
            }
            Slot::Text(_) => Err(wrong_type(key)),
        }
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut data = self.lock()?;
        let Some(entry) = data.get_mut(key) else {
            return Ok(0);
        };
        let removed = match &mut entry.slot {
            Slot::Sorted(members) => {
                let before = members.len();
                members.retain(|(score, _)| *score < min || *score > max);
                (before - members.len()) as u64
            }
            Slot::Text(_) => return Err(wrong_type(key)),
        };
        if matches!(&entry.slot, Slot::Sorted(m) if m.is_empty()) {
            data.remove(key);
        }
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let data = self.lock()?;
        match data.get(key).map(|e| &e.slot) {
            None => Ok(0),
            Some(Slot::Sorted(members)) => Ok(members.len() as u64),
            Some(Slot::Text(_)) => Err(wrong_type(key)),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        assert!(glob_match("conversation:abc:*", "conversation:abc:123"));
        assert!(!glob_match("conversation:abc:*", "conversation:abd:123"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("a*c*e", "abde"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("ab*ba", "aba"));
    }

    #[tokio::test]
    async fn counters_and_expiry() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("n", 1).await.unwrap(), 1);
        assert_eq!(store.incr("n", 2).await.unwrap(), 3);
        assert_eq!(store.get("n").await.unwrap().as_deref(), Some("3"));

        store.expire("n", Duration::from_millis(0)).await.unwrap();
        assert_eq!(store.get("n").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sorted_set_pruning() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 10.0).await.unwrap();
        store.zadd("z", "b", 20.0).await.unwrap();
        store.zadd("z", "c", 30.0).await.unwrap();
        assert_eq!(store.zcard("z").await.unwrap(), 3);

        assert_eq!(store.zrem_range_by_score("z", 0.0, 20.0).await.unwrap(), 2);
        assert_eq!(store.zcard("z").await.unwrap(), 1);
        assert!(store.get("z").await.is_err());
    }

    #[tokio::test]
    async fn keys_and_delete() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set_ex("conversation:s1:a", "1", ttl).await.unwrap();
        store.set_ex("conversation:s1:b", "2", ttl).await.unwrap();
        store.set_ex("conversation:s2:a", "3", ttl).await.unwrap();

        let keys = store.keys("conversation:s1:*").await.unwrap();
        assert_eq!(keys, vec!["conversation:s1:a", "conversation:s1:b"]);
        assert_eq!(store.del(&keys).await.unwrap(), 2);
        assert_eq!(store.keys("conversation:*").await.unwrap().len(), 1);
    }
}
