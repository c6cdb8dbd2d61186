//! Command queue in front of the [`Journal`].
//!
//! The service task is the only owner of the trades. Each command runs to
//! completion before the next is taken, so a price or portfolio callback and
//! the rollup it triggers are observed together or not at all.
//!
//! Saving writes a snapshot on the blocking pool. The service waits for it,
//! so no command interleaves with a save.

use super::{save_journal, Journal, JournalError, StoreError, SubscriptionRequest};
use crate::domain::{Decimal, TickerId, Trade, TradeId, Transaction};
use crate::engine::reconcile::LocalPosition;
use crate::market::PortfolioUpdate;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 256;

#[derive(Debug)]
pub enum JournalCommand {
    Trades {
        reply: oneshot::Sender<Vec<Trade>>,
    },
    AddTrade {
        trade: Trade,
        reply: oneshot::Sender<TradeId>,
    },
    RecordTransaction {
        trade: TradeId,
        transaction: Transaction,
        reply: oneshot::Sender<Result<(), JournalError>>,
    },
    PendingSubscriptions {
        reply: oneshot::Sender<Vec<SubscriptionRequest>>,
    },
    MarkSubscribed {
        trade: TradeId,
        ticker_id: Option<TickerId>,
    },
    ClearSubscriptions,
    ApplyPrices {
        trade: TradeId,
        last: Decimal,
        close: Decimal,
    },
    ApplyPortfolio {
        update: PortfolioUpdate,
    },
    LocalPositions {
        reply: oneshot::Sender<Vec<LocalPosition>>,
    },
    Save {
        reply: oneshot::Sender<Result<bool, JournalError>>,
    },
}

/// Cloneable sender side of the journal service.
#[derive(Debug, Clone)]
pub struct JournalHandle {
    tx: mpsc::Sender<JournalCommand>,
}

/// Start the service task. `path` is where `save` writes; `None` disables saving.
pub fn spawn_journal_service(journal: Journal, path: Option<PathBuf>) -> (JournalHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(run(journal, path, rx));
    (JournalHandle { tx }, task)
}

async fn run(mut journal: Journal, path: Option<PathBuf>, mut rx: mpsc::Receiver<JournalCommand>) {
    info!(trades = journal.trades().len(), "Journal service started");
    while let Some(cmd) = rx.recv().await {
        handle(&mut journal, path.as_ref(), cmd).await;
    }
    info!("Journal service stopped");
}

async fn handle(journal: &mut Journal, path: Option<&PathBuf>, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Trades { reply } => {
            let _ = reply.send(journal.trades().to_vec());
        }
        JournalCommand::AddTrade { trade, reply } => {
            let _ = reply.send(journal.add_trade(trade));
        }
        JournalCommand::RecordTransaction {
            trade,
            transaction,
            reply,
        } => {
            let _ = reply.send(journal.record_transaction(trade, transaction));
        }
        JournalCommand::PendingSubscriptions { reply } => {
            let _ = reply.send(journal.pending_subscriptions());
        }
        JournalCommand::MarkSubscribed { trade, ticker_id } => {
            if let Err(e) = journal.mark_subscribed(trade, ticker_id) {
                warn!(error = %e, "Failed to mark subscription");
            }
        }
        JournalCommand::ClearSubscriptions => journal.clear_subscriptions(),
        JournalCommand::ApplyPrices { trade, last, close } => {
            if let Err(e) = journal.apply_prices(trade, last, close) {
                warn!(error = %e, "Failed to apply prices");
            }
        }
        JournalCommand::ApplyPortfolio { update } => {
            if let Some(trade) = journal.apply_portfolio(&update) {
                debug!(trade = %trade, contract_id = update.contract_id.0, "Portfolio update applied");
            }
        }
        JournalCommand::LocalPositions { reply } => {
            let _ = reply.send(journal.local_positions());
        }
        JournalCommand::Save { reply } => {
            let _ = reply.send(save(journal, path).await);
        }
    }
}

async fn save(journal: &mut Journal, path: Option<&PathBuf>) -> Result<bool, JournalError> {
    let Some(path) = path.filter(|_| journal.is_dirty()).cloned() else {
        return Ok(false);
    };
    let trades = journal.trades().to_vec();
    tokio::task::spawn_blocking(move || save_journal(&path, &trades))
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
    journal.mark_saved();
    Ok(true)
}

impl JournalHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> JournalCommand) -> Result<T, JournalError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| JournalError::Closed)?;
        rx.await.map_err(|_| JournalError::Closed)
    }

    async fn notify(&self, cmd: JournalCommand) {
        if self.tx.send(cmd).await.is_err() {
            warn!("Journal service stopped, command dropped");
        }
    }

    /// Snapshot of every trade.
    pub async fn trades(&self) -> Result<Vec<Trade>, JournalError> {
        self.request(|reply| JournalCommand::Trades { reply }).await
    }

    pub async fn add_trade(&self, trade: Trade) -> Result<TradeId, JournalError> {
        self.request(|reply| JournalCommand::AddTrade { trade, reply })
            .await
    }

    pub async fn record_transaction(&self, trade: TradeId, transaction: Transaction) -> Result<(), JournalError> {
        self.request(|reply| JournalCommand::RecordTransaction {
            trade,
            transaction,
            reply,
        })
        .await?
    }

    pub async fn pending_subscriptions(&self) -> Result<Vec<SubscriptionRequest>, JournalError> {
        self.request(|reply| JournalCommand::PendingSubscriptions { reply })
            .await
    }

    pub async fn mark_subscribed(&self, trade: TradeId, ticker_id: Option<TickerId>) {
        self.notify(JournalCommand::MarkSubscribed { trade, ticker_id })
            .await
    }

    pub async fn clear_subscriptions(&self) {
        self.notify(JournalCommand::ClearSubscriptions).await
    }

    pub async fn apply_prices(&self, trade: TradeId, last: Decimal, close: Decimal) {
        self.notify(JournalCommand::ApplyPrices { trade, last, close })
            .await
    }

    pub async fn apply_portfolio(&self, update: PortfolioUpdate) {
        self.notify(JournalCommand::ApplyPortfolio { update }).await
    }

    pub async fn local_positions(&self) -> Result<Vec<LocalPosition>, JournalError> {
        self.request(|reply| JournalCommand::LocalPositions { reply })
            .await
    }

    /// Persist the journal if it changed. Returns whether a file was written.
    pub async fn save(&self) -> Result<bool, JournalError> {
        self.request(|reply| JournalCommand::Save { reply }).await?
    }
}
