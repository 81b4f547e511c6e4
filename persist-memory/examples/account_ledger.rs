use futures_util::TryStreamExt;
use persist_domain::persist::{
    EventJournal, JournalConfig, PersistedEvent, PersistedSnapshot, SnapshotPolicy,
};
use persist_domain::error::PersistResult;
use persist_memory::{InMemoryEngine, InMemoryEngineConfig};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AccountEvent {
    Opened { initial_balance: i64 },
    Deposited { amount: i64 },
    Withdrawn { amount: i64 },
}

impl AccountEvent {
    fn tag(&self) -> &'static str {
        match self {
            AccountEvent::Opened { .. } => "account.opened",
            AccountEvent::Deposited { .. } => "account.deposited",
            AccountEvent::Withdrawn { .. } => "account.withdrawn",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Account {
    balance: i64,
}

impl Account {
    fn from_snapshot(snapshot: Option<&PersistedSnapshot>) -> PersistResult<Self> {
        match snapshot {
            Some(snapshot) => Ok(serde_json::from_value(snapshot.data().clone())?),
            None => Ok(Self::default()),
        }
    }

    fn apply(mut self, event: &PersistedEvent) -> PersistResult<Self> {
        match serde_json::from_value(event.data().clone())? {
            AccountEvent::Opened { initial_balance } => self.balance = initial_balance,
            AccountEvent::Deposited { amount } => self.balance += amount,
            AccountEvent::Withdrawn { amount } => self.balance -= amount,
        }
        Ok(self)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let engine = InMemoryEngine::new(InMemoryEngineConfig {
        snapshot_retention: Some(2),
    });
    let journal = EventJournal::builder()
        .engine(engine.clone())
        .config(JournalConfig {
            snapshot_policy: SnapshotPolicy::Every(3),
            ..JournalConfig::default()
        })
        .build();

    let key = format!("account-{}", Ulid::new());
    let commands = [
        AccountEvent::Opened { initial_balance: 100 },
        AccountEvent::Deposited { amount: 50 },
        AccountEvent::Withdrawn { amount: 30 },
        AccountEvent::Deposited { amount: 5 },
        AccountEvent::Withdrawn { amount: 25 },
    ];

    let mut account = Account::default();
    for change in commands {
        let tag = change.tag().to_string();
        let event = journal
            .append(&key, serde_json::to_value(&change)?, vec![tag])
            .await?;
        account = account.apply(&event)?;

        if let Some(snapshot) = journal
            .snapshot(&key, event.sequence_number(), serde_json::to_value(&account)?)
            .await?
        {
            tracing::info!(
                %key,
                sequence_number = snapshot.sequence_number(),
                balance = account.balance,
                "snapshot taken"
            );
        }
    }

    let withdrawals = vec!["account.withdrawn".to_string()];
    let withdrawn: Vec<_> = journal
        .events(&key, 0, 10, &withdrawals)
        .try_collect()
        .await?;
    tracing::info!(%key, count = withdrawn.len(), "withdrawals");

    let rehydrated = journal
        .rehydrate(&key, Account::from_snapshot, Account::apply)
        .await?;
    tracing::info!(
        %key,
        balance = rehydrated.state.balance,
        sequence_number = rehydrated.sequence_number,
        snapshot = ?rehydrated.snapshot_sequence_number,
        replayed = rehydrated.replayed,
        "rehydrated account"
    );

    assert_eq!(rehydrated.state.balance, account.balance);
    tracing::info!(keys = ?engine.keys(), "engine keys");
    Ok(())
}
