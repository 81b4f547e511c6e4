//! 不变量校验装饰器（ValidatingEngine）
//!
//! 包装任意后端，在委托前后校验协议约束：
//! - 追加：序列号从 1 开始，后端返回的事件与请求一致；
//! - 查询：键、下界、升序、条数上限、标签过滤，以及无过滤时的连续性；
//! - 快照：序列号必须指向已持久化的事件。
//!
//! 后端违背约束视为引擎缺陷，以 `PersistError::Invariant` 上报；
//! 调用方输入导致的问题仍以校验或顺序错误返回。
//!
use crate::{
    error::{PersistError, PersistResult},
    persist::{EventQuery, EventStream, PersistedEvent, PersistedSnapshot, PersistenceEngine},
};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt, stream};

pub struct ValidatingEngine<E> {
    inner: E,
}

impl<E> ValidatingEngine<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

#[async_trait]
impl<E> PersistenceEngine for ValidatingEngine<E>
where
    E: PersistenceEngine,
{
    async fn persist(&self, event: PersistedEvent) -> PersistResult<PersistedEvent> {
        if event.sequence_number() == 0 {
            return Err(PersistError::invariant("sequence numbers start at 1"));
        }

        let key = event.key().to_string();
        let sequence_number = event.sequence_number();
        let stored = self.inner.persist(event).await?;

        if stored.key() != key || stored.sequence_number() != sequence_number {
            tracing::error!(
                %key,
                sequence_number,
                stored_key = stored.key(),
                stored_sequence_number = stored.sequence_number(),
                "backend stored a different event than requested"
            );
            return Err(PersistError::invariant(format!(
                "backend stored {}#{} for {key}#{sequence_number}",
                stored.key(),
                stored.sequence_number()
            )));
        }

        Ok(stored)
    }

    fn events<'a>(
        &'a self,
        key: &'a str,
        offset: u64,
        limit: usize,
        tags: &'a [String],
    ) -> EventStream<'a> {
        if limit == 0 {
            return Box::pin(stream::empty());
        }

        let guard = StreamGuard::new(EventQuery::new(key, offset, limit, tags));
        let inner = self.inner.events(key, offset, limit, tags);

        // 首个错误之后终止流
        Box::pin(stream::unfold(
            (inner, guard, false),
            |(mut inner, mut guard, done)| async move {
                if done {
                    return None;
                }
                match inner.next().await? {
                    Ok(event) => match guard.check(event) {
                        Ok(event) => Some((Ok(event), (inner, guard, false))),
                        Err(err) => Some((Err(err), (inner, guard, true))),
                    },
                    Err(err) => Some((Err(err), (inner, guard, true))),
                }
            },
        ))
    }

    async fn latest_snapshot(&self, key: &str) -> PersistResult<Option<PersistedSnapshot>> {
        let snapshot = self.inner.latest_snapshot(key).await?;

        if let Some(found) = &snapshot {
            if found.key() != key {
                tracing::error!(%key, found_key = found.key(), "backend returned foreign snapshot");
                return Err(PersistError::invariant(format!(
                    "snapshot for {} returned for {key}",
                    found.key()
                )));
            }
        }

        Ok(snapshot)
    }

    async fn take_snapshot(&self, snapshot: PersistedSnapshot) -> PersistResult<PersistedSnapshot> {
        let key = snapshot.key().to_string();
        let sequence_number = snapshot.sequence_number();

        let covered = match sequence_number {
            0 => None,
            n => self.inner.events(&key, n - 1, 1, &[]).try_next().await?,
        };

        if covered.map(|event| event.sequence_number()) != Some(sequence_number) {
            let last_sequence_number = self.inner.last_sequence_number(&key).await?;
            tracing::warn!(
                %key,
                sequence_number,
                last_sequence_number,
                "rejected snapshot ahead of the event log"
            );
            return Err(PersistError::UnpersistedSnapshot {
                key,
                sequence_number,
                last_sequence_number,
            });
        }

        let stored = self.inner.take_snapshot(snapshot).await?;
        if stored.key() != key || stored.sequence_number() != sequence_number {
            tracing::error!(
                %key,
                sequence_number,
                stored_key = stored.key(),
                stored_sequence_number = stored.sequence_number(),
                "backend stored a different snapshot than requested"
            );
            return Err(PersistError::invariant(format!(
                "backend stored snapshot {}#{} for {key}#{sequence_number}",
                stored.key(),
                stored.sequence_number()
            )));
        }

        Ok(stored)
    }

    async fn last_sequence_number(&self, key: &str) -> PersistResult<u64> {
        self.inner.last_sequence_number(key).await
    }
}

/// 逐条校验后端返回的事件流
struct StreamGuard {
    query: EventQuery,
    last: Option<u64>,
    emitted: usize,
}

impl StreamGuard {
    fn new(query: EventQuery) -> Self {
        Self {
            query,
            last: None,
            emitted: 0,
        }
    }

    fn check(&mut self, event: PersistedEvent) -> PersistResult<PersistedEvent> {
        let sequence_number = event.sequence_number();
        let previous = self.last.unwrap_or(self.query.offset());

        if self.emitted >= self.query.limit() {
            return Err(self.violation(&event, "more events than the limit"));
        }
        if event.key() != self.query.key() {
            return Err(self.violation(&event, "event from another key"));
        }
        if sequence_number <= previous {
            return Err(self.violation(&event, "event out of sequence order"));
        }
        if !self.query.is_filtered() && sequence_number != previous + 1 {
            return Err(self.violation(&event, "gap in sequence numbers"));
        }
        if !self.query.matches(&event) {
            return Err(self.violation(&event, "event does not match the tag filter"));
        }

        self.last = Some(sequence_number);
        self.emitted += 1;
        Ok(event)
    }

    fn violation(&self, event: &PersistedEvent, reason: &str) -> PersistError {
        tracing::error!(
            key = self.query.key(),
            offset = self.query.offset(),
            limit = self.query.limit(),
            sequence_number = event.sequence_number(),
            reason,
            "backend violated the event stream contract"
        );
        PersistError::invariant(format!(
            "{reason}: {}#{} (key={}, offset={}, limit={})",
            event.key(),
            event.sequence_number(),
            self.query.key(),
            self.query.offset(),
            self.query.limit()
        ))
    }
}
