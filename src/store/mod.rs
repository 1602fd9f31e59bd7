mod stream;

pub use stream::{EntryId, IdPattern, RangeBound, StreamEntry};

use std::collections::hash_map::Entry::{Occupied, Vacant};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

/// Errors surfaced to clients as RESP error lines, with the fixed message
/// texts the protocol promises.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    StreamIdMinimum,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidStreamId,

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
}

enum Entry {
    String {
        value: String,
        expiry_ms: Option<u64>,
    },
    Stream {
        entries: Vec<StreamEntry>,
    },
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        match self {
            Entry::String {
                expiry_ms: Some(expiry),
                ..
            } => *expiry < now,
            _ => false,
        }
    }
}

/// The shared in-memory map. All operations take the data mutex; stream
/// readers clone the matching entries before releasing it. Expiry is lazy:
/// the read path removes dead entries, so a missing key and an expired key
/// are indistinguishable.
pub struct Store {
    data: Mutex<HashMap<String, Entry>>,
    notifiers: Mutex<HashMap<String, Arc<Notify>>>,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

impl Store {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            notifiers: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, key: &str, value: &str, expiry_ms: Option<u64>) {
        let mut data = self.data.lock().unwrap();
        data.insert(
            key.to_string(),
            Entry::String {
                value: value.to_string(),
                expiry_ms,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut data = self.data.lock().unwrap();

        match data.entry(key.to_string()) {
            Vacant(_) => None,
            Occupied(entry) if entry.get().is_expired(now_ms()) => {
                entry.remove();
                None
            }
            Occupied(entry) => match entry.get() {
                Entry::String { value, .. } => Some(value.clone()),
                Entry::Stream { .. } => None,
            },
        }
    }

    pub fn remove(&self, key: &str) {
        self.data.lock().unwrap().remove(key);
    }

    pub fn exists(&self, key: &str) -> bool {
        let mut data = self.data.lock().unwrap();

        match data.entry(key.to_string()) {
            Vacant(_) => false,
            Occupied(entry) if entry.get().is_expired(now_ms()) => {
                entry.remove();
                false
            }
            Occupied(_) => true,
        }
    }

    /// Live keys only; expired entries found along the way are removed.
    pub fn keys(&self) -> Vec<String> {
        let mut data = self.data.lock().unwrap();
        let now = now_ms();

        data.retain(|_, entry| !entry.is_expired(now));
        data.keys().cloned().collect()
    }

    pub fn value_type(&self, key: &str) -> &'static str {
        let mut data = self.data.lock().unwrap();

        match data.entry(key.to_string()) {
            Vacant(_) => "none",
            Occupied(entry) if entry.get().is_expired(now_ms()) => {
                entry.remove();
                "none"
            }
            Occupied(entry) => match entry.get() {
                Entry::String { .. } => "string",
                Entry::Stream { .. } => "stream",
            },
        }
    }

    /// Missing keys start at 1; integer values increment in place with
    /// their TTL preserved.
    pub fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut data = self.data.lock().unwrap();

        let fresh = Entry::String {
            value: "1".to_string(),
            expiry_ms: None,
        };

        match data.entry(key.to_string()) {
            Vacant(entry) => {
                entry.insert(fresh);
                Ok(1)
            }
            Occupied(mut entry) if entry.get().is_expired(now_ms()) => {
                entry.insert(fresh);
                Ok(1)
            }
            Occupied(mut entry) => match entry.get_mut() {
                Entry::String { value, .. } => {
                    let number: i64 = value.parse().map_err(|_| StoreError::NotAnInteger)?;
                    let number = number + 1;
                    *value = number.to_string();
                    Ok(number)
                }
                Entry::Stream { .. } => Err(StoreError::NotAnInteger),
            },
        }
    }

    /// Append one entry, creating the stream if needed. Ids must move
    /// strictly forward and `0-0` is never accepted. Waiters blocked on
    /// this stream are woken after the entry is in place.
    pub fn append_stream(
        &self,
        key: &str,
        id: &str,
        fields: Vec<(String, String)>,
    ) -> Result<EntryId, StoreError> {
        let pattern = IdPattern::parse(id)?;

        let mut data = self.data.lock().unwrap();

        let entries = match data
            .entry(key.to_string())
            .or_insert_with(|| Entry::Stream { entries: Vec::new() })
        {
            Entry::Stream { entries } => entries,
            Entry::String { .. } => return Err(StoreError::WrongType),
        };

        let last = entries.last().map(|entry| entry.id);
        let id = pattern.resolve(last, now_ms());

        if id == EntryId::MIN {
            return Err(StoreError::StreamIdMinimum);
        }

        if let Some(last) = last {
            if id <= last {
                return Err(StoreError::StreamIdTooSmall);
            }
        }

        entries.push(StreamEntry {
            id,
            fields,
            arrival_ms: now_ms(),
        });
        drop(data);

        self.notifier(key).notify_waiters();
        Ok(id)
    }

    /// Entries within `[start, end]`, in storage order.
    pub fn range(&self, key: &str, start: &str, end: &str) -> Result<Vec<StreamEntry>, StoreError> {
        let start = RangeBound::parse_start(start)?;
        let end = RangeBound::parse_end(end)?;

        let data = self.data.lock().unwrap();

        match data.get(key) {
            Some(Entry::Stream { entries }) => Ok(entries
                .iter()
                .filter(|entry| {
                    start.admits_from_start(entry.id) && end.admits_until_end(entry.id)
                })
                .cloned()
                .collect()),
            Some(Entry::String { .. }) => Err(StoreError::WrongType),
            None => Ok(Vec::new()),
        }
    }

    /// Entries with id strictly greater than `after`, in storage order.
    pub fn entries_after(&self, key: &str, after: EntryId) -> Vec<StreamEntry> {
        let data = self.data.lock().unwrap();

        match data.get(key) {
            Some(Entry::Stream { entries }) => entries
                .iter()
                .filter(|entry| entry.id > after)
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn last_entry(&self, key: &str) -> Option<StreamEntry> {
        let data = self.data.lock().unwrap();

        match data.get(key) {
            Some(Entry::Stream { entries }) => entries.last().cloned(),
            _ => None,
        }
    }

    fn notifier(&self, key: &str) -> Arc<Notify> {
        let mut notifiers = self.notifiers.lock().unwrap();
        notifiers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Cooperatively wait for an entry appended after the call began.
    /// `timeout_ms == 0` waits without bound. Returns the stream's newest
    /// entry once one arrives, or `None` when the timeout elapses.
    pub async fn wait_for_entry(&self, key: &str, timeout_ms: u64) -> Option<StreamEntry> {
        let started = now_ms();
        let deadline = match timeout_ms {
            0 => None,
            ms => Some(tokio::time::Instant::now() + Duration::from_millis(ms)),
        };
        let notify = self.notifier(key);

        loop {
            // Register interest before checking, so an append landing
            // between the check and the await still wakes this task.
            let notified = notify.notified();

            if let Some(last) = self.last_entry(key) {
                if last.arrival_ms > started {
                    return Some(last);
                }
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_round_trip() {
        let store = Store::new();
        store.set("key1", "value1", None);
        assert_eq!(store.get("key1"), Some("value1".to_string()));
    }

    #[test]
    fn get_missing() {
        let store = Store::new();
        assert_eq!(store.get("nope"), None);
    }

    #[test]
    fn expired_key_reads_as_missing() {
        let store = Store::new();
        store.set("gone", "x", Some(now_ms() - 1));
        assert_eq!(store.get("gone"), None);
        assert!(!store.exists("gone"));
        assert!(store.keys().is_empty());
    }

    #[test]
    fn future_expiry_still_live() {
        let store = Store::new();
        store.set("here", "x", Some(now_ms() + 60_000));
        assert_eq!(store.get("here"), Some("x".to_string()));
        assert!(store.exists("here"));
        assert_eq!(store.keys(), vec!["here".to_string()]);
    }

    #[test]
    fn remove_is_idempotent() {
        let store = Store::new();
        store.set("key", "v", None);
        store.remove("key");
        store.remove("key");
        assert_eq!(store.get("key"), None);
    }

    #[test]
    fn value_type_reports_kind() {
        let store = Store::new();
        store.set("text", "v", None);
        store.append_stream("log", "1-1", vec![]).unwrap();

        assert_eq!(store.value_type("text"), "string");
        assert_eq!(store.value_type("log"), "stream");
        assert_eq!(store.value_type("nothing"), "none");
    }

    #[test]
    fn incr_from_missing() {
        let store = Store::new();
        assert_eq!(store.incr("counter"), Ok(1));
        assert_eq!(store.get("counter"), Some("1".to_string()));
    }

    #[test]
    fn incr_existing_integer() {
        let store = Store::new();
        store.set("counter", "41", None);
        assert_eq!(store.incr("counter"), Ok(42));
    }

    #[test]
    fn incr_expired_counter_restarts() {
        let store = Store::new();
        store.set("counter", "41", Some(now_ms() - 1));
        assert_eq!(store.incr("counter"), Ok(1));
    }

    #[test]
    fn incr_preserves_ttl() {
        let store = Store::new();
        let expiry = now_ms() + 60_000;
        store.set("counter", "1", Some(expiry));
        store.incr("counter").unwrap();

        let data = store.data.lock().unwrap();
        match data.get("counter") {
            Some(Entry::String { value, expiry_ms }) => {
                assert_eq!(value, "2");
                assert_eq!(*expiry_ms, Some(expiry));
            }
            _ => panic!("expected string entry"),
        }
    }

    #[test]
    fn incr_non_integer() {
        let store = Store::new();
        store.set("word", "abc", None);
        assert_eq!(store.incr("word"), Err(StoreError::NotAnInteger));
    }

    #[test]
    fn xadd_rejects_zero_zero() {
        let store = Store::new();
        assert_eq!(
            store.append_stream("s", "0-0", vec![]),
            Err(StoreError::StreamIdMinimum)
        );
    }

    #[test]
    fn xadd_rejects_non_monotonic_id() {
        let store = Store::new();
        store.append_stream("s", "5-5", vec![]).unwrap();
        assert_eq!(
            store.append_stream("s", "5-5", vec![]),
            Err(StoreError::StreamIdTooSmall)
        );
        assert_eq!(
            store.append_stream("s", "4-9", vec![]),
            Err(StoreError::StreamIdTooSmall)
        );
    }

    #[test]
    fn xadd_on_string_key_is_wrong_type() {
        let store = Store::new();
        store.set("s", "text", None);
        assert_eq!(
            store.append_stream("s", "1-1", vec![]),
            Err(StoreError::WrongType)
        );
    }

    #[test]
    fn xadd_auto_sequence() {
        let store = Store::new();
        assert_eq!(
            store.append_stream("s", "5-*", vec![]),
            Ok(EntryId::new(5, 0))
        );
        assert_eq!(
            store.append_stream("s", "5-*", vec![]),
            Ok(EntryId::new(5, 1))
        );
        assert_eq!(
            store.append_stream("s", "6-*", vec![]),
            Ok(EntryId::new(6, 0))
        );
    }

    #[test]
    fn xadd_auto_ids_strictly_increase() {
        let store = Store::new();
        let mut last = EntryId::MIN;
        for _ in 0..5 {
            let id = store.append_stream("s", "*", vec![]).unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn range_full_and_bounded() {
        let store = Store::new();
        for seq in 1..=3 {
            let id = format!("1-{}", seq);
            store
                .append_stream("s", &id, vec![("a".to_string(), seq.to_string())])
                .unwrap();
        }

        let all = store.range("s", "-", "+").unwrap();
        assert_eq!(all.len(), 3);

        let tail = store.range("s", "1-2", "+").unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].id, EntryId::new(1, 2));

        let head = store.range("s", "-", "1-2").unwrap();
        assert_eq!(head.len(), 2);
        assert_eq!(head[1].id, EntryId::new(1, 2));
    }

    #[test]
    fn range_ms_only_bounds() {
        let store = Store::new();
        store.append_stream("s", "1-1", vec![]).unwrap();
        store.append_stream("s", "2-1", vec![]).unwrap();
        store.append_stream("s", "3-1", vec![]).unwrap();

        // A bare-ms start excludes that millisecond, a bare-ms end keeps it.
        let entries = store.range("s", "1", "3").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, EntryId::new(2, 1));
        assert_eq!(entries[1].id, EntryId::new(3, 1));
    }

    #[test]
    fn range_missing_stream_is_empty() {
        let store = Store::new();
        assert_eq!(store.range("none", "-", "+").unwrap(), Vec::new());
    }

    #[test]
    fn entries_after_is_exclusive() {
        let store = Store::new();
        store.append_stream("s", "1-1", vec![]).unwrap();
        store.append_stream("s", "1-2", vec![]).unwrap();

        let entries = store.entries_after("s", EntryId::new(1, 1));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, EntryId::new(1, 2));
    }

    #[tokio::test]
    async fn wait_for_entry_times_out() {
        let store = Store::new();
        let result = store.wait_for_entry("quiet", 20).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn wait_for_entry_sees_append() {
        let store = Arc::new(Store::new());

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.wait_for_entry("s", 1000).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .append_stream("s", "*", vec![("a".to_string(), "1".to_string())])
            .unwrap();

        let entry = waiter.await.unwrap().expect("waiter should see the append");
        assert_eq!(entry.fields, vec![("a".to_string(), "1".to_string())]);
    }

    #[tokio::test]
    async fn wait_for_entry_ignores_old_entries() {
        let store = Store::new();
        store.append_stream("s", "1-1", vec![]).unwrap();

        // A pre-existing entry is not "new" for a waiter starting now, so
        // this times out rather than returning 1-1.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = store.wait_for_entry("s", 20).await;
        assert!(result.is_none());
    }
}
