use crate::config::InMemoryEngineConfig;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream;
use persist_domain::error::{PersistError, PersistResult};
use persist_domain::persist::{
    EventQuery, EventStream, PersistedEvent, PersistedSnapshot, PersistenceEngine,
};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// 基于内存的持久化引擎
/// - 每个键一份独立日志，不同键之间互不阻塞
/// - 同键追加在日志写锁内完成“校验序列号 + 追加”，保证无空洞、无重复
/// - 查询按游标逐条读取，日志只追加，已可见的事件不会再消失
#[derive(Clone, Default)]
pub struct InMemoryEngine {
    journals: Arc<DashMap<String, Arc<KeyJournal>>>,
    config: InMemoryEngineConfig,
}

#[derive(Default)]
struct KeyJournal {
    events: RwLock<Vec<PersistedEvent>>,
    /// 按序列号升序
    snapshots: RwLock<Vec<PersistedSnapshot>>,
}

impl KeyJournal {
    fn read_events(&self) -> PersistResult<RwLockReadGuard<'_, Vec<PersistedEvent>>> {
        self.events
            .read()
            .map_err(|_| PersistError::backend("event log lock poisoned"))
    }

    fn write_events(&self) -> PersistResult<RwLockWriteGuard<'_, Vec<PersistedEvent>>> {
        self.events
            .write()
            .map_err(|_| PersistError::backend("event log lock poisoned"))
    }

    fn read_snapshots(&self) -> PersistResult<RwLockReadGuard<'_, Vec<PersistedSnapshot>>> {
        self.snapshots
            .read()
            .map_err(|_| PersistError::backend("snapshot lock poisoned"))
    }

    fn write_snapshots(&self) -> PersistResult<RwLockWriteGuard<'_, Vec<PersistedSnapshot>>> {
        self.snapshots
            .write()
            .map_err(|_| PersistError::backend("snapshot lock poisoned"))
    }

    fn last_sequence_number(&self) -> PersistResult<u64> {
        Ok(self
            .read_events()?
            .last()
            .map_or(0, PersistedEvent::sequence_number))
    }

    /// `after` 之后第一条满足查询的事件
    fn next_matching(&self, query: &EventQuery, after: u64) -> PersistResult<Option<PersistedEvent>> {
        let events = self.read_events()?;
        // 序列号从 1 开始连续，序列号 n 位于下标 n - 1
        let start = usize::try_from(after).unwrap_or(usize::MAX).min(events.len());

        Ok(events[start..]
            .iter()
            .find(|event| query.matches(event))
            .cloned())
    }
}

struct Cursor {
    query: EventQuery,
    after: u64,
    emitted: usize,
    done: bool,
}

impl InMemoryEngine {
    pub fn new(config: InMemoryEngineConfig) -> Self {
        Self {
            journals: Arc::default(),
            config,
        }
    }

    pub fn config(&self) -> &InMemoryEngineConfig {
        &self.config
    }

    /// 当前持有事件的键
    pub fn keys(&self) -> Vec<String> {
        self.journals
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// 某键保留的全部快照（含被更新快照取代的历史快照）
    pub fn snapshots(&self, key: &str) -> PersistResult<Vec<PersistedSnapshot>> {
        match self.journal(key) {
            Some(journal) => Ok(journal.read_snapshots()?.clone()),
            None => Ok(Vec::new()),
        }
    }

    fn journal(&self, key: &str) -> Option<Arc<KeyJournal>> {
        self.journals.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn journal_or_create(&self, key: &str) -> Arc<KeyJournal> {
        if let Some(journal) = self.journal(key) {
            return journal;
        }
        Arc::clone(self.journals.entry(key.to_string()).or_default().value())
    }
}

#[async_trait]
impl PersistenceEngine for InMemoryEngine {
    async fn persist(&self, event: PersistedEvent) -> PersistResult<PersistedEvent> {
        let journal = self.journal_or_create(event.key());
        let mut events = journal.write_events()?;

        let expected = events.last().map_or(1, |last| last.sequence_number() + 1);
        if event.sequence_number() != expected {
            tracing::warn!(
                key = event.key(),
                expected,
                actual = event.sequence_number(),
                "sequence conflict"
            );
            return Err(PersistError::SequenceConflict {
                key: event.key().to_string(),
                expected,
                actual: event.sequence_number(),
            });
        }

        events.push(event.clone());
        tracing::debug!(
            key = event.key(),
            sequence_number = event.sequence_number(),
            tags = ?event.tags(),
            "persisted event"
        );

        Ok(event)
    }

    fn events<'a>(
        &'a self,
        key: &'a str,
        offset: u64,
        limit: usize,
        tags: &'a [String],
    ) -> EventStream<'a> {
        let cursor = Cursor {
            query: EventQuery::new(key, offset, limit, tags),
            after: offset,
            emitted: 0,
            done: false,
        };

        Box::pin(stream::unfold(cursor, move |mut cursor| async move {
            if cursor.done || cursor.emitted >= cursor.query.limit() {
                return None;
            }

            let journal = self.journal(cursor.query.key())?;
            match journal.next_matching(&cursor.query, cursor.after) {
                Ok(Some(event)) => {
                    cursor.after = event.sequence_number();
                    cursor.emitted += 1;
                    Some((Ok(event), cursor))
                }
                Ok(None) => None,
                Err(err) => {
                    cursor.done = true;
                    Some((Err(err), cursor))
                }
            }
        }))
    }

    async fn latest_snapshot(&self, key: &str) -> PersistResult<Option<PersistedSnapshot>> {
        match self.journal(key) {
            Some(journal) => Ok(journal.read_snapshots()?.last().cloned()),
            None => Ok(None),
        }
    }

    async fn take_snapshot(&self, snapshot: PersistedSnapshot) -> PersistResult<PersistedSnapshot> {
        let key = snapshot.key();
        let sequence_number = snapshot.sequence_number();
        let last_sequence_number = match self.journal(key) {
            Some(journal) => journal.last_sequence_number()?,
            None => 0,
        };

        if sequence_number == 0 || sequence_number > last_sequence_number {
            tracing::warn!(
                %key,
                sequence_number,
                last_sequence_number,
                "snapshot ahead of the event log"
            );
            return Err(PersistError::UnpersistedSnapshot {
                key: key.to_string(),
                sequence_number,
                last_sequence_number,
            });
        }

        let journal = self.journal_or_create(key);
        let mut snapshots = journal.write_snapshots()?;

        // 同一序列号以新快照替换旧快照
        match snapshots.binary_search_by_key(&sequence_number, PersistedSnapshot::sequence_number) {
            Ok(index) => snapshots[index] = snapshot.clone(),
            Err(index) => snapshots.insert(index, snapshot.clone()),
        }

        if let Some(retain) = self.config.snapshot_retention {
            let excess = snapshots.len().saturating_sub(retain.max(1));
            snapshots.drain(..excess);
        }

        tracing::debug!(
            %key,
            sequence_number,
            retained = snapshots.len(),
            "took snapshot"
        );

        Ok(snapshot)
    }

    async fn last_sequence_number(&self, key: &str) -> PersistResult<u64> {
        match self.journal(key) {
            Some(journal) => journal.last_sequence_number(),
            None => Ok(0),
        }
    }
}
