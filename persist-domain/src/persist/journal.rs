//! 事件日志编排器（EventJournal）
//!
//! 面向聚合/投影运行时的入口，在 `ValidatingEngine` 之上封装：
//! - 由引擎分配序列号的追加（乐观并发，冲突时按配置重试）；
//! - 按页惰性回放；
//! - “最新快照 + 增量事件”的重建折叠；
//! - 按策略落盘快照。
//!
use crate::{
    clock::{Clock, SystemClock},
    error::{PersistError, PersistResult},
    persist::{
        EventStream, PersistedEvent, PersistedSnapshot, PersistenceEngine, SnapshotPolicy,
        ValidatingEngine,
    },
};
use bon::bon;
use futures_util::{TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const NO_TAGS: &[String] = &[];

/// EventJournal 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// 追加发生序列号冲突时的最大重试次数
    pub append_retries: usize,
    /// 回放时每页读取的事件数
    pub page_size: usize,
    /// 快照落盘策略
    pub snapshot_policy: SnapshotPolicy,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            append_retries: 8,
            page_size: 256,
            snapshot_policy: SnapshotPolicy::Never,
        }
    }
}

/// 重建结果
#[derive(Debug, Clone, PartialEq)]
pub struct Rehydrated<S> {
    pub state: S,
    /// 已折叠的最后一条事件（或快照）的序列号
    pub sequence_number: u64,
    pub snapshot_sequence_number: Option<u64>,
    /// 快照之后回放的事件数
    pub replayed: usize,
}

pub struct EventJournal<E> {
    engine: ValidatingEngine<E>,
    config: JournalConfig,
    clock: Arc<dyn Clock>,
}

#[bon]
impl<E> EventJournal<E>
where
    E: PersistenceEngine,
{
    #[builder]
    pub fn new(
        engine: E,
        #[builder(default)] config: JournalConfig,
        #[builder(default = SystemClock::shared())] clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine: ValidatingEngine::new(engine),
            config,
            clock,
        }
    }
}

impl<E> EventJournal<E>
where
    E: PersistenceEngine,
{
    pub fn engine(&self) -> &ValidatingEngine<E> {
        &self.engine
    }

    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// 追加事件，序列号取当前最大值加一。
    ///
    /// 并发追加导致冲突时重新读取最大序列号并重试，超过 `append_retries` 后返回冲突错误。
    pub async fn append(
        &self,
        key: &str,
        data: Value,
        tags: Vec<String>,
    ) -> PersistResult<PersistedEvent> {
        let mut attempt = 0;

        loop {
            let last = self.engine.last_sequence_number(key).await?;
            let event = PersistedEvent::builder()
                .data(data.clone())
                .sequence_number(last + 1)
                .key(key)
                .tags(tags.clone())
                .created_at(self.clock.now())
                .build()?;

            match self.engine.persist(event).await {
                Err(err) if err.is_conflict() && attempt < self.config.append_retries => {
                    attempt += 1;
                    tracing::warn!(%key, attempt, error = %err, "append conflicted, retrying");
                }
                Ok(event) => {
                    tracing::debug!(
                        %key,
                        sequence_number = event.sequence_number(),
                        attempt,
                        "appended event"
                    );
                    return Ok(event);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// 追加调用方已分配序列号的事件
    pub async fn persist(&self, event: PersistedEvent) -> PersistResult<PersistedEvent> {
        self.engine.persist(event).await
    }

    pub fn events<'a>(
        &'a self,
        key: &'a str,
        offset: u64,
        limit: usize,
        tags: &'a [String],
    ) -> EventStream<'a> {
        self.engine.events(key, offset, limit, tags)
    }

    /// 回放 `after` 之后的全部匹配事件，按 `page_size` 分页惰性读取
    pub fn replay<'a>(&'a self, key: &'a str, after: u64, tags: &'a [String]) -> EventStream<'a> {
        let page_size = self.config.page_size.max(1);

        let pages = stream::unfold(Some(after), move |cursor| async move {
            let cursor = cursor?;
            let page: Vec<PersistedEvent> = match self
                .engine
                .events(key, cursor, page_size, tags)
                .try_collect()
                .await
            {
                Ok(page) => page,
                Err(err) => return Some((Err(err), None)),
            };

            let next = match page.last() {
                Some(tail) if page.len() == page_size => Some(tail.sequence_number()),
                Some(_) => None,
                None => return None,
            };
            Some((Ok(page), next))
        });

        Box::pin(
            pages
                .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, PersistError>)))
                .try_flatten(),
        )
    }

    /// 以最新快照为起点，折叠其后的全部事件重建状态
    pub async fn rehydrate<S, I, F>(
        &self,
        key: &str,
        init: I,
        mut apply: F,
    ) -> PersistResult<Rehydrated<S>>
    where
        I: FnOnce(Option<&PersistedSnapshot>) -> PersistResult<S>,
        F: FnMut(S, &PersistedEvent) -> PersistResult<S>,
    {
        let snapshot = self.engine.latest_snapshot(key).await?;
        let snapshot_sequence_number = snapshot.as_ref().map(PersistedSnapshot::sequence_number);

        let mut state = init(snapshot.as_ref())?;
        let mut sequence_number = snapshot_sequence_number.unwrap_or(0);
        let mut replayed = 0;

        let mut events = self.replay(key, sequence_number, NO_TAGS);
        while let Some(event) = events.try_next().await? {
            state = apply(state, &event)?;
            sequence_number = event.sequence_number();
            replayed += 1;
        }

        tracing::debug!(%key, sequence_number, replayed, "rehydrated");

        Ok(Rehydrated {
            state,
            sequence_number,
            snapshot_sequence_number,
            replayed,
        })
    }

    pub async fn latest_snapshot(&self, key: &str) -> PersistResult<Option<PersistedSnapshot>> {
        self.engine.latest_snapshot(key).await
    }

    pub async fn take_snapshot(
        &self,
        snapshot: PersistedSnapshot,
    ) -> PersistResult<PersistedSnapshot> {
        self.engine.take_snapshot(snapshot).await
    }

    /// 立即以当前时钟时间落盘快照
    pub async fn snapshot_now(
        &self,
        key: &str,
        sequence_number: u64,
        data: Value,
    ) -> PersistResult<PersistedSnapshot> {
        let snapshot = PersistedSnapshot::builder()
            .data(data)
            .sequence_number(sequence_number)
            .key(key)
            .created_at(self.clock.now())
            .build()?;

        self.engine.take_snapshot(snapshot).await
    }

    /// 按 `snapshot_policy` 落盘快照，距最新快照未满间隔时返回 `None`
    pub async fn snapshot(
        &self,
        key: &str,
        sequence_number: u64,
        data: Value,
    ) -> PersistResult<Option<PersistedSnapshot>> {
        let policy = self.config.snapshot_policy;
        if !policy.is_enabled() {
            return Ok(None);
        }

        let latest = self
            .engine
            .latest_snapshot(key)
            .await?
            .map(|snapshot| snapshot.sequence_number());
        if !policy.is_due(sequence_number, latest) {
            return Ok(None);
        }

        self.snapshot_now(key, sequence_number, data).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{ErrorKind, RecordError};
    use crate::persist::EventStream;
    use crate::persist::test_support::ScriptedEngine;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn journal(config: JournalConfig) -> EventJournal<ScriptedEngine> {
        EventJournal::builder()
            .engine(ScriptedEngine::default())
            .config(config)
            .build()
    }

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// 前 `stale` 次读取最大序列号时返回 0，模拟并发写入者抢先追加
    struct StaleReads {
        inner: ScriptedEngine,
        stale: AtomicUsize,
    }

    #[async_trait]
    impl PersistenceEngine for StaleReads {
        async fn persist(&self, event: PersistedEvent) -> PersistResult<PersistedEvent> {
            self.inner.persist(event).await
        }

        fn events<'a>(
            &'a self,
            key: &'a str,
            offset: u64,
            limit: usize,
            tags: &'a [String],
        ) -> EventStream<'a> {
            self.inner.events(key, offset, limit, tags)
        }

        async fn latest_snapshot(&self, key: &str) -> PersistResult<Option<PersistedSnapshot>> {
            self.inner.latest_snapshot(key).await
        }

        async fn take_snapshot(
            &self,
            snapshot: PersistedSnapshot,
        ) -> PersistResult<PersistedSnapshot> {
            self.inner.take_snapshot(snapshot).await
        }

        async fn last_sequence_number(&self, key: &str) -> PersistResult<u64> {
            let remaining = self.stale.load(Ordering::SeqCst);
            if remaining > 0 {
                self.stale.store(remaining - 1, Ordering::SeqCst);
                return Ok(0);
            }
            self.inner.last_sequence_number(key).await
        }
    }

    #[tokio::test]
    async fn append_assigns_gapless_sequence_numbers() -> anyhow::Result<()> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let journal = EventJournal::builder()
            .engine(ScriptedEngine::default())
            .clock(clock.clone())
            .build();

        let mut seqs = Vec::new();
        for amount in [10, 20, 30] {
            let event = journal
                .append("acct-1", json!({ "amount": amount }), tags(&["debit"]))
                .await?;
            seqs.push(event.sequence_number());
            clock.advance(Duration::seconds(1));
        }
        assert_eq!(seqs, vec![1, 2, 3]);

        let events: Vec<_> = journal.events("acct-1", 0, 10, &[]).try_collect().await?;
        assert_eq!(events[0].created_at(), start);
        assert_eq!(events[2].created_at(), start + Duration::seconds(2));

        let other = journal.append("acct-2", json!({ "amount": 1 }), vec![]).await?;
        assert_eq!(other.sequence_number(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn append_rejects_null_payload() {
        let journal = journal(JournalConfig::default());
        let err = journal
            .append("acct-1", Value::Null, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::Record(RecordError::DataRequired)));
    }

    #[tokio::test]
    async fn append_retries_after_conflict() -> anyhow::Result<()> {
        let journal = EventJournal::builder()
            .engine(StaleReads {
                inner: ScriptedEngine::default(),
                stale: AtomicUsize::new(0),
            })
            .build();
        journal.append("acct-1", json!(1), vec![]).await?;

        journal.engine().inner().stale.store(2, Ordering::SeqCst);
        let event = journal.append("acct-1", json!(2), vec![]).await?;
        assert_eq!(event.sequence_number(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn append_gives_up_after_configured_retries() -> anyhow::Result<()> {
        let journal = EventJournal::builder()
            .engine(StaleReads {
                inner: ScriptedEngine::default(),
                stale: AtomicUsize::new(0),
            })
            .config(JournalConfig {
                append_retries: 1,
                ..JournalConfig::default()
            })
            .build();
        journal.append("acct-1", json!(1), vec![]).await?;

        journal.engine().inner().stale.store(5, Ordering::SeqCst);
        let err = journal.append("acct-1", json!(2), vec![]).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(err.kind(), ErrorKind::Ordering);
        Ok(())
    }

    #[tokio::test]
    async fn replay_crosses_page_boundaries() -> anyhow::Result<()> {
        let journal = journal(JournalConfig {
            page_size: 2,
            ..JournalConfig::default()
        });
        for seq in 1..=5 {
            let t: &[&str] = if seq % 2 == 1 { &["debit"] } else { &[] };
            journal.append("acct-1", json!({ "seq": seq }), tags(t)).await?;
        }

        let all: Vec<u64> = journal
            .replay("acct-1", 0, &[])
            .map_ok(|e| e.sequence_number())
            .try_collect()
            .await?;
        assert_eq!(all, vec![1, 2, 3, 4, 5]);

        let after: Vec<u64> = journal
            .replay("acct-1", 3, &[])
            .map_ok(|e| e.sequence_number())
            .try_collect()
            .await?;
        assert_eq!(after, vec![4, 5]);

        let debit = tags(&["debit"]);
        let debits: Vec<u64> = journal
            .replay("acct-1", 0, &debit)
            .map_ok(|e| e.sequence_number())
            .try_collect()
            .await?;
        assert_eq!(debits, vec![1, 3, 5]);
        Ok(())
    }

    #[tokio::test]
    async fn rehydrate_folds_events_after_snapshot() -> anyhow::Result<()> {
        let journal = journal(JournalConfig {
            page_size: 3,
            ..JournalConfig::default()
        });
        for amount in 1..=7 {
            journal
                .append("acct-1", json!({ "amount": amount }), vec![])
                .await?;
        }

        let balance = |state: i64, event: &PersistedEvent| -> PersistResult<i64> {
            Ok(state + event.data()["amount"].as_i64().unwrap_or_default())
        };

        let full = journal
            .rehydrate("acct-1", |_| Ok(0_i64), balance)
            .await?;
        assert_eq!(full.state, 28);
        assert_eq!(full.sequence_number, 7);
        assert_eq!(full.snapshot_sequence_number, None);
        assert_eq!(full.replayed, 7);

        journal
            .snapshot_now("acct-1", 4, json!({ "balance": 10 }))
            .await?;
        let resumed = journal
            .rehydrate(
                "acct-1",
                |snapshot| {
                    Ok(snapshot
                        .and_then(|s| s.data()["balance"].as_i64())
                        .unwrap_or_default())
                },
                balance,
            )
            .await?;
        assert_eq!(resumed.state, 28);
        assert_eq!(resumed.snapshot_sequence_number, Some(4));
        assert_eq!(resumed.replayed, 3);
        Ok(())
    }

    #[tokio::test]
    async fn rehydrate_of_unknown_key_is_empty() -> anyhow::Result<()> {
        let journal = journal(JournalConfig::default());
        let rehydrated = journal
            .rehydrate("nobody", |_| Ok(Vec::<u64>::new()), |mut s, e| {
                s.push(e.sequence_number());
                Ok(s)
            })
            .await?;
        assert!(rehydrated.state.is_empty());
        assert_eq!(rehydrated.sequence_number, 0);
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_follows_policy() -> anyhow::Result<()> {
        let journal = journal(JournalConfig {
            snapshot_policy: SnapshotPolicy::Every(2),
            ..JournalConfig::default()
        });
        for seq in 1..=4 {
            let event = journal.append("acct-1", json!(seq), vec![]).await?;
            journal
                .snapshot("acct-1", event.sequence_number(), json!({ "upto": seq }))
                .await?;
        }

        let latest = journal.latest_snapshot("acct-1").await?.unwrap();
        assert_eq!(latest.sequence_number(), 4);

        assert!(journal.snapshot("acct-1", 3, json!({})).await?.is_none());
        let err = journal
            .snapshot("acct-1", 6, json!({ "upto": 6 }))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::UnpersistedSnapshot { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_interval_restarts_from_latest_snapshot() -> anyhow::Result<()> {
        let journal = journal(JournalConfig {
            snapshot_policy: SnapshotPolicy::Every(3),
            ..JournalConfig::default()
        });
        for seq in 1..=7 {
            journal.append("acct-1", json!(seq), vec![]).await?;
        }

        // 3 处的检查点被跳过，4 处补上
        let taken = journal.snapshot("acct-1", 4, json!({ "upto": 4 })).await?;
        assert_eq!(taken.map(|s| s.sequence_number()), Some(4));

        assert!(journal.snapshot("acct-1", 6, json!({ "upto": 6 })).await?.is_none());
        let taken = journal.snapshot("acct-1", 7, json!({ "upto": 7 })).await?;
        assert_eq!(taken.map(|s| s.sequence_number()), Some(7));
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_time_comes_from_injected_clock() -> anyhow::Result<()> {
        let start = Utc.with_ymd_and_hms(2030, 6, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let journal = EventJournal::builder()
            .engine(ScriptedEngine::default())
            .clock(clock.clone())
            .build();
        journal.append("acct-1", json!(1), vec![]).await?;

        clock.set(start + Duration::minutes(5));
        let snapshot = journal.snapshot_now("acct-1", 1, json!({ "upto": 1 })).await?;
        assert_eq!(snapshot.created_at(), start + Duration::minutes(5));
        Ok(())
    }

    #[tokio::test]
    async fn disabled_policy_skips_snapshots() -> anyhow::Result<()> {
        let journal = journal(JournalConfig::default());
        assert!(journal.snapshot("acct-1", 10, json!({})).await?.is_none());
        Ok(())
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: JournalConfig = serde_json::from_str(r#"{"page_size": 64}"#).unwrap();
        assert_eq!(config.page_size, 64);
        assert_eq!(config.append_retries, 8);
        assert_eq!(config.snapshot_policy, SnapshotPolicy::Never);
    }
}
