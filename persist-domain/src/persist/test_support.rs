//! 单元测试用的脚本化后端，可模拟违反协议的行为
//!
use crate::{
    error::{PersistError, PersistResult},
    persist::{EventQuery, EventStream, PersistedEvent, PersistedSnapshot, PersistenceEngine},
};
use async_trait::async_trait;
use futures_util::stream;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;

pub(crate) const NO_TAGS: &[String] = &[];

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn event(key: &str, seq: u64, tags: &[&str]) -> PersistedEvent {
    PersistedEvent::builder()
        .data(json!({ "seq": seq }))
        .sequence_number(seq)
        .key(key)
        .tags(tags.iter().map(|t| t.to_string()).collect())
        .build()
        .unwrap()
}

pub(crate) fn snapshot(key: &str, seq: u64) -> PersistedSnapshot {
    PersistedSnapshot::builder()
        .data(json!({ "upto": seq }))
        .sequence_number(seq)
        .key(key)
        .build()
        .unwrap()
}

#[derive(Default)]
pub(crate) struct ScriptedEngine {
    events: Mutex<HashMap<String, Vec<PersistedEvent>>>,
    snapshots: Mutex<HashMap<String, PersistedSnapshot>>,
    reversed_reads: bool,
    skipped: Option<u64>,
    ignore_limit: bool,
    rewritten_key: Option<String>,
}

impl ScriptedEngine {
    pub(crate) fn with_reversed_reads(mut self) -> Self {
        self.reversed_reads = true;
        self
    }

    pub(crate) fn with_skipped(mut self, seq: u64) -> Self {
        self.skipped = Some(seq);
        self
    }

    pub(crate) fn with_ignored_limit(mut self) -> Self {
        self.ignore_limit = true;
        self
    }

    /// 写入照常落盘，但返回给调用方的事件与快照换成另一个键
    pub(crate) fn with_rewritten_key(mut self, key: &str) -> Self {
        self.rewritten_key = Some(key.to_string());
        self
    }

    fn rekey_event(&self, event: PersistedEvent) -> PersistedEvent {
        match &self.rewritten_key {
            Some(key) => PersistedEvent::builder()
                .data(event.data().clone())
                .sequence_number(event.sequence_number())
                .key(key.as_str())
                .tags(event.tags().to_vec())
                .created_at(event.created_at())
                .build()
                .unwrap(),
            None => event,
        }
    }

    fn rekey_snapshot(&self, snapshot: PersistedSnapshot) -> PersistedSnapshot {
        match &self.rewritten_key {
            Some(key) => PersistedSnapshot::builder()
                .data(snapshot.data().clone())
                .sequence_number(snapshot.sequence_number())
                .key(key.as_str())
                .created_at(snapshot.created_at())
                .build()
                .unwrap(),
            None => snapshot,
        }
    }

    pub(crate) fn events_of(&self, key: &str) -> Vec<PersistedEvent> {
        self.events
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PersistenceEngine for ScriptedEngine {
    async fn persist(&self, event: PersistedEvent) -> PersistResult<PersistedEvent> {
        let mut events = self.events.lock().unwrap();
        let log = events.entry(event.key().to_string()).or_default();
        let expected = log.last().map_or(1, |e| e.sequence_number() + 1);
        if event.sequence_number() != expected {
            return Err(PersistError::SequenceConflict {
                key: event.key().to_string(),
                expected,
                actual: event.sequence_number(),
            });
        }
        log.push(event.clone());
        Ok(self.rekey_event(event))
    }

    fn events<'a>(
        &'a self,
        key: &'a str,
        offset: u64,
        limit: usize,
        tags: &'a [String],
    ) -> EventStream<'a> {
        let query = EventQuery::new(key, offset, limit, tags);
        let mut selected: Vec<PersistedEvent> = self
            .events_of(key)
            .into_iter()
            .filter(|e| query.matches(e))
            .filter(|e| Some(e.sequence_number()) != self.skipped)
            .collect();
        if !self.ignore_limit {
            selected.truncate(limit);
        }
        if self.reversed_reads {
            selected.reverse();
        }
        Box::pin(stream::iter(selected.into_iter().map(Ok)))
    }

    async fn latest_snapshot(&self, key: &str) -> PersistResult<Option<PersistedSnapshot>> {
        let snapshot = self.snapshots.lock().unwrap().get(key).cloned();
        Ok(snapshot.map(|s| self.rekey_snapshot(s)))
    }

    async fn take_snapshot(&self, snapshot: PersistedSnapshot) -> PersistResult<PersistedSnapshot> {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.key().to_string(), snapshot.clone());
        Ok(self.rekey_snapshot(snapshot))
    }
}
