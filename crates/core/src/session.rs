//! Wallet session: which account is connected and on which network.
//!
//! [`SessionManager`] owns the current [`Session`] and publishes it through a
//! `watch` channel, so the poller and anything else interested can react to
//! connects, disconnects, account switches, and network switches. The signer
//! does not push changes, so [`SessionManager::spawn_refresh`] re-reads it on
//! an interval for as long as the returned [`SessionRefresher`] lives.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::address::Address;
use crate::chain::{ChainError, WalletSession};

/// What the signer last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Session {
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
}

impl Session {
    pub fn status(&self, expected_chain_id: u64) -> SessionStatus {
        match (self.account, self.chain_id) {
            (None, _) | (_, None) => SessionStatus::Disconnected,
            (Some(_), Some(actual)) if actual != expected_chain_id => SessionStatus::WrongNetwork {
                expected: expected_chain_id,
                actual,
            },
            (Some(account), Some(_)) => SessionStatus::Ready { account },
        }
    }
}

/// Whether actions and polling may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    /// Connected, but to a network other than the configured one.
    WrongNetwork { expected: u64, actual: u64 },
    Ready { account: Address },
}

impl SessionStatus {
    pub fn account(&self) -> Option<Address> {
        match self {
            Self::Ready { account } => Some(*account),
            _ => None,
        }
    }
}

/// Tracks the wallet connection and publishes changes. Clones share the
/// same published session.
pub struct SessionManager<W: WalletSession> {
    wallet: Arc<W>,
    expected_chain_id: u64,
    account_override: Option<Address>,
    tx: Arc<watch::Sender<Session>>,
}

impl<W: WalletSession> Clone for SessionManager<W> {
    fn clone(&self) -> Self {
        Self {
            wallet: self.wallet.clone(),
            expected_chain_id: self.expected_chain_id,
            account_override: self.account_override,
            tx: self.tx.clone(),
        }
    }
}

impl<W: WalletSession> SessionManager<W> {
    pub fn new(wallet: Arc<W>, expected_chain_id: u64) -> Self {
        let (tx, _) = watch::channel(Session::default());
        Self {
            wallet,
            expected_chain_id,
            account_override: None,
            tx: Arc::new(tx),
        }
    }

    /// Act as `account` instead of the signer's first account.
    pub fn with_account(mut self, account: Option<Address>) -> Self {
        self.account_override = account;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Session {
        *self.tx.borrow()
    }

    pub fn status(&self) -> SessionStatus {
        self.current().status(self.expected_chain_id)
    }

    /// Ask the signer for its account and network and publish the result.
    pub async fn connect(&self) -> Result<SessionStatus, ChainError> {
        let session = self.read_session().await?;
        self.publish(session);
        let status = self.status();
        self.log_status(status);
        Ok(status)
    }

    /// Re-read account and network, publishing only if something changed.
    /// A failed read leaves the last known session in place.
    pub async fn refresh(&self) -> Result<SessionStatus, ChainError> {
        if self.current().account.is_none() {
            return Ok(SessionStatus::Disconnected);
        }
        let session = self.read_session().await?;
        let status = session.status(self.expected_chain_id);
        if self.publish(session) {
            self.log_status(status);
        }
        Ok(status)
    }

    /// Re-read the signer every `period` until the returned handle is stopped
    /// or dropped. A failed read keeps the last session; a disconnected
    /// session stays disconnected.
    pub fn spawn_refresh(&self, period: Duration) -> SessionRefresher {
        let manager = self.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = manager.refresh().await {
                    tracing::warn!(error = %e, "session refresh failed, keeping last session");
                }
            }
        });
        SessionRefresher { task: Some(task) }
    }

    pub fn disconnect(&self) {
        if self.publish(Session::default()) {
            tracing::info!("wallet disconnected");
        }
    }

    /// Native balance of the connected account.
    pub async fn balance(&self) -> Result<Option<u128>, ChainError> {
        match self.current().account {
            Some(account) => Ok(Some(self.wallet.balance(account).await?)),
            None => Ok(None),
        }
    }

    fn log_status(&self, status: SessionStatus) {
        match status {
            SessionStatus::Ready { account } => {
                tracing::info!(%account, chain_id = self.expected_chain_id, "wallet connected");
            }
            SessionStatus::WrongNetwork { expected, actual } => {
                tracing::warn!(expected, actual, "wallet connected to the wrong network");
            }
            SessionStatus::Disconnected => {}
        }
    }

    async fn read_session(&self) -> Result<Session, ChainError> {
        let chain_id = self.wallet.chain_id().await?;
        let account = match self.account_override {
            Some(account) => account,
            None => self
                .wallet
                .accounts()
                .await?
                .into_iter()
                .next()
                .ok_or(ChainError::NoAccount)?,
        };
        Ok(Session {
            account: Some(account),
            chain_id: Some(chain_id),
        })
    }

    fn publish(&self, session: Session) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == session {
                false
            } else {
                *current = session;
                true
            }
        })
    }
}

/// Background session refresh started by [`SessionManager::spawn_refresh`].
/// Dropping it stops the task.
pub struct SessionRefresher {
    task: Option<JoinHandle<()>>,
}

impl SessionRefresher {
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for SessionRefresher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
