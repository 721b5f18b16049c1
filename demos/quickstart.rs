//! A minimal walk through saving, loading and snapshotting an aggregate.
//!
//! Run with: `RUST_LOG=chronicle_core=debug cargo run --example quickstart`

use std::time::Duration;

use chronicle::{
    Aggregate, DomainEvent, EventSet, Registry, Repository, Root, SaveError, UnhandledEvent,
    store::inmemory,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Clone, Debug, Serialize, Deserialize, DomainEvent)]
#[event(kind = "account.opened")]
pub struct AccountOpened {
    pub owner: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, DomainEvent)]
#[event(kind = "account.deposited")]
pub struct FundsDeposited {
    pub amount: u64,
}

#[derive(Clone, Debug, EventSet)]
pub enum AccountEvent {
    Opened(AccountOpened),
    Deposited(FundsDeposited),
}

#[derive(Serialize, Deserialize, DomainEvent)]
#[event(kind = "account.snapshot")]
pub struct AccountSnapshot {
    owner: String,
    balance: u64,
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account is not open")]
    NotOpen,
    #[error("amount must be positive")]
    ZeroAmount,
    #[error(transparent)]
    Unhandled(#[from] UnhandledEvent),
}

#[derive(Default)]
pub struct Account {
    root: Root<AccountEvent>,
    owner: Option<String>,
    balance: u64,
}

impl Account {
    pub fn open(&mut self, owner: &str) -> Result<(), AccountError> {
        self.apply(AccountOpened {
            owner: owner.to_string(),
        })?;
        Ok(())
    }

    pub fn deposit(&mut self, amount: u64) -> Result<(), AccountError> {
        if self.owner.is_none() {
            return Err(AccountError::NotOpen);
        }
        if amount == 0 {
            return Err(AccountError::ZeroAmount);
        }
        self.apply(FundsDeposited { amount })?;
        Ok(())
    }
}

impl Aggregate for Account {
    type Event = AccountEvent;
    type Snapshot = AccountSnapshot;

    const KIND: &'static str = "account";

    fn root(&self) -> &Root<AccountEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut Root<AccountEvent> {
        &mut self.root
    }

    fn mutate(&mut self, event: &AccountEvent) -> Result<(), UnhandledEvent> {
        match event {
            AccountEvent::Opened(e) => self.owner = Some(e.owner.clone()),
            AccountEvent::Deposited(e) => self.balance += e.amount,
        }
        Ok(())
    }

    fn take_snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            owner: self.owner.clone().unwrap_or_default(),
            balance: self.balance,
        }
    }

    fn restore_snapshot(&mut self, snapshot: AccountSnapshot) {
        self.owner = Some(snapshot.owner);
        self.balance = snapshot.balance;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = Registry::default()
        .with::<AccountOpened>()
        .with::<FundsDeposited>();
    let repository: Repository<Account, inmemory::Store> =
        Repository::new(inmemory::Store::new(), registry);
    let repository = repository.with_listener(|header, events, _| {
        tracing::info!(
            id = %header.id,
            version = header.version,
            events = events.len(),
            "committed"
        );
    });
    let snapshotter = repository
        .snapshotter(3, Duration::from_millis(100))
        .ok_or("snapshotter already installed")?;

    // Open an account and make a few deposits
    let mut account = repository.aggregate();
    account.open("ada")?;
    repository.save(&mut account).await?;
    for amount in [10, 20, 30] {
        account.deposit(amount)?;
        repository.save(&mut account).await?;
    }
    let id = account.root().id().to_string();

    // Give the snapshotter a pass, then load from the snapshot
    tokio::time::sleep(Duration::from_millis(250)).await;
    let loaded = repository.load(&id).await?;
    println!("balance of {id}: {}", loaded.balance);
    assert_eq!(loaded.balance, 60);

    // A writer holding a stale copy is rejected
    let mut stale = repository.load(&id).await?;
    account.deposit(5)?;
    repository.save(&mut account).await?;
    stale.deposit(7)?;
    match repository.save(&mut stale).await {
        Err(SaveError::Conflict(conflict)) => println!("stale save rejected: {conflict}"),
        other => println!("unexpected outcome: {other:?}"),
    }

    snapshotter.stop().await?;
    Ok(())
}
