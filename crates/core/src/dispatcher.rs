//! Submission of the three mutating contract calls.
//!
//! Every action is checked locally first: the session must be ready, inputs
//! well formed, and the caller entitled to act on the stream. Only then is it
//! handed to the signer. Checks that fail never reach the signer.
//!
//! In-flight actions are tracked per target ([`ActionTarget`]): one pending
//! action per stream, plus one pending creation. Actions on different streams
//! proceed concurrently. Once the signer has accepted a transaction its
//! target stays pending until the transaction settles, even if the caller
//! stops waiting. Nothing is retried automatically; after a failure the
//! caller may simply invoke the action again.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::address::{Address, AddressError};
use crate::chain::{ChainError, ContractCall, StreamContract, TxHash};
use crate::session::{Session, SessionStatus};
use crate::stream::{StreamId, StreamView};
use crate::units::{self, UnitsError};

/// EIP-1193 "user rejected request".
pub const USER_REJECTED_CODE: i64 = 4001;

// =============================================================================
// Errors
// =============================================================================

/// Malformed input, caught before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid employee address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("{0} is a burn address; funds sent there are destroyed")]
    BurnAddress(Address),
    #[error("cannot stream to your own address")]
    SelfStream,
    #[error("amount must be greater than zero")]
    ZeroAmount,
    #[error("duration must be greater than zero")]
    ZeroDuration,
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] UnitsError),
}

/// Why an action did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("no wallet connected")]
    NotConnected,
    #[error("wrong network: connected to chain {actual}, expected {expected}")]
    WrongNetwork { expected: u64, actual: u64 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("an action on {0} is already pending")]
    AlreadyPending(ActionTarget),
    #[error("only the employee of stream {0} can withdraw")]
    NotEmployee(StreamId),
    #[error("only the employer of stream {0} can cancel")]
    NotEmployer(StreamId),
    #[error("stream {0} is not active")]
    StreamInactive(StreamId),
    #[error("nothing available to withdraw from stream {0}")]
    NothingToWithdraw(StreamId),
    #[error("transaction rejected by user")]
    UserRejected,
    #[error("insufficient funds for this transaction")]
    InsufficientFunds,
    #[error("transaction failed: {0}")]
    Generic(String),
}

impl ActionError {
    /// Map a signer or chain failure onto the user-facing taxonomy.
    ///
    /// Only error objects returned by the signer are inspected; transport,
    /// decoding and confirmation failures are always generic.
    pub fn classify(err: &ChainError) -> Self {
        let ChainError::Rpc { code, message } = err else {
            return Self::Generic(err.to_string());
        };
        if *code == USER_REJECTED_CODE {
            return Self::UserRejected;
        }
        let lower = message.to_lowercase();
        if lower.contains("rejected") || lower.contains("denied") {
            Self::UserRejected
        } else if lower.contains("insufficient") {
            Self::InsufficientFunds
        } else {
            Self::Generic(err.to_string())
        }
    }

    /// Whether the error was raised before anything reached the signer.
    pub fn is_local(&self) -> bool {
        !matches!(
            self,
            Self::UserRejected | Self::InsufficientFunds | Self::Generic(_)
        )
    }
}

impl From<SessionStatus> for ActionError {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::WrongNetwork { expected, actual } => Self::WrongNetwork { expected, actual },
            SessionStatus::Disconnected | SessionStatus::Ready { .. } => Self::NotConnected,
        }
    }
}

// =============================================================================
// Pending state
// =============================================================================

/// What an action is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionTarget {
    /// A new stream.
    Create,
    Stream(StreamId),
}

impl fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("stream creation"),
            Self::Stream(id) => write!(f, "stream {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    Pending,
    Confirmed(TxHash),
    Failed(ActionError),
}

type ActionMap = Arc<Mutex<HashMap<ActionTarget, ActionStatus>>>;

/// Marks a target pending for as long as it lives. Dropped without a
/// recorded outcome (the caller gave up before anything was submitted), the
/// target is released.
struct PendingGuard {
    actions: ActionMap,
    target: ActionTarget,
    done: bool,
}

impl PendingGuard {
    fn acquire(actions: &ActionMap, target: ActionTarget) -> Result<Self, ActionError> {
        let mut map = actions.lock();
        if matches!(map.get(&target), Some(ActionStatus::Pending)) {
            return Err(ActionError::AlreadyPending(target));
        }
        map.insert(target, ActionStatus::Pending);
        Ok(Self {
            actions: actions.clone(),
            target,
            done: false,
        })
    }

    fn finish(mut self, status: ActionStatus) {
        self.actions.lock().insert(self.target, status);
        self.done = true;
    }

    fn fail(self, call: ContractCall, err: &ChainError) -> ActionError {
        let error = ActionError::classify(err);
        let target = self.target;
        tracing::warn!(%target, call = call.name(), error = %err, "action failed");
        self.finish(ActionStatus::Failed(error.clone()));
        error
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.done {
            self.actions.lock().remove(&self.target);
        }
    }
}

// =============================================================================
// ActionDispatcher
// =============================================================================

pub struct ActionDispatcher<C: StreamContract> {
    contract: Arc<C>,
    session: watch::Receiver<Session>,
    expected_chain_id: u64,
    actions: ActionMap,
}

impl<C: StreamContract> Clone for ActionDispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            contract: self.contract.clone(),
            session: self.session.clone(),
            expected_chain_id: self.expected_chain_id,
            actions: self.actions.clone(),
        }
    }
}

impl<C: StreamContract> ActionDispatcher<C> {
    pub fn new(contract: Arc<C>, session: watch::Receiver<Session>, expected_chain_id: u64) -> Self {
        Self {
            contract,
            session,
            expected_chain_id,
            actions: Arc::default(),
        }
    }

    /// Last known status of the action on `target`.
    pub fn status(&self, target: ActionTarget) -> Option<ActionStatus> {
        self.actions.lock().get(&target).cloned()
    }

    pub fn is_pending(&self, target: ActionTarget) -> bool {
        matches!(self.status(target), Some(ActionStatus::Pending))
    }

    /// Targets with an action in flight.
    pub fn pending(&self) -> Vec<ActionTarget> {
        self.actions
            .lock()
            .iter()
            .filter(|(_, status)| matches!(status, ActionStatus::Pending))
            .map(|(target, _)| *target)
            .collect()
    }

    fn ready_account(&self) -> Result<Address, ActionError> {
        let status = self.session.borrow().status(self.expected_chain_id);
        status.account().ok_or_else(|| status.into())
    }

    /// Validate a prospective stream without submitting it.
    pub fn validate_create(
        employer: &Address,
        employee: &str,
        amount: u128,
        duration_secs: u64,
    ) -> Result<Address, ValidationError> {
        let employee: Address = employee.parse()?;
        if employee.is_burn() {
            return Err(ValidationError::BurnAddress(employee));
        }
        if employee == *employer {
            return Err(ValidationError::SelfStream);
        }
        if amount == 0 {
            return Err(ValidationError::ZeroAmount);
        }
        if duration_secs == 0 {
            return Err(ValidationError::ZeroDuration);
        }
        Ok(employee)
    }

    /// Create a stream paying `amount` wei to `employee` over `duration_secs`.
    pub async fn create_stream(
        &self,
        employee: &str,
        amount: u128,
        duration_secs: u64,
    ) -> Result<TxHash, ActionError> {
        let from = self.ready_account()?;
        let employee = Self::validate_create(&from, employee, amount, duration_secs)?;
        let call = ContractCall::CreateStream {
            employee,
            duration_secs,
            value: amount,
        };
        self.execute(ActionTarget::Create, from, call).await
    }

    /// [`Self::create_stream`] with a decimal CELO amount such as `"1.5"`.
    pub async fn create_stream_from_decimal(
        &self,
        employee: &str,
        amount: &str,
        duration_secs: u64,
    ) -> Result<TxHash, ActionError> {
        let wei = units::parse_units(amount).map_err(ValidationError::from)?;
        self.create_stream(employee, wei, duration_secs).await
    }

    /// Withdraw everything currently available from a stream.
    pub async fn withdraw(&self, stream: &StreamView) -> Result<TxHash, ActionError> {
        let from = self.ready_account()?;
        let id = stream.id();
        if stream.stream.employee != from {
            return Err(ActionError::NotEmployee(id));
        }
        if !stream.is_active() {
            return Err(ActionError::StreamInactive(id));
        }
        if stream.available == 0 {
            return Err(ActionError::NothingToWithdraw(id));
        }
        self.execute(ActionTarget::Stream(id), from, ContractCall::Withdraw(id))
            .await
    }

    /// Cancel a stream the connected account employs.
    pub async fn cancel_stream(&self, stream: &StreamView) -> Result<TxHash, ActionError> {
        let from = self.ready_account()?;
        let id = stream.id();
        if stream.stream.employer != from {
            return Err(ActionError::NotEmployer(id));
        }
        if !stream.is_active() {
            return Err(ActionError::StreamInactive(id));
        }
        self.execute(ActionTarget::Stream(id), from, ContractCall::CancelStream(id))
            .await
    }

    async fn execute(
        &self,
        target: ActionTarget,
        from: Address,
        call: ContractCall,
    ) -> Result<TxHash, ActionError> {
        let guard = PendingGuard::acquire(&self.actions, target)?;

        let tx = match self.contract.submit(from, call).await {
            Ok(tx) => tx,
            Err(e) => return Err(guard.fail(call, &e)),
        };
        tracing::info!(%target, call = call.name(), tx_hash = %tx, "transaction submitted");

        // The transaction is out of our hands now; the guard moves into a
        // task that outlives this future and records the outcome.
        let contract = self.contract.clone();
        let confirmation = tokio::spawn(async move {
            match contract.wait_for_confirmation(tx).await {
                Ok(()) => {
                    tracing::info!(%target, call = call.name(), tx_hash = %tx, "transaction confirmed");
                    guard.finish(ActionStatus::Confirmed(tx));
                    Ok(tx)
                }
                Err(e) => Err(guard.fail(call, &e)),
            }
        });
        confirmation
            .await
            .unwrap_or_else(|e| Err(ActionError::Generic(format!("confirmation of {tx} aborted: {e}"))))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::InMemoryStreamContract;
    use crate::stream::Stream;
    use crate::time_source::{ManualClock, TimeSource};
    use rstest::rstest;
    use std::time::Duration;
    use testresult::TestResult;

    const CHAIN: u64 = 44_787;
    const T: u64 = 1_700_000_000;

    struct Fixture {
        contract: Arc<InMemoryStreamContract>,
        clock: ManualClock,
        session: watch::Sender<Session>,
        employer: Address,
        employee: Address,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = ManualClock::new(T);
            let contract = Arc::new(InMemoryStreamContract::new(CHAIN, clock.clone()));
            let employer = Address::repeat_byte(1);
            let employee = Address::repeat_byte(2);
            contract.fund(employer, 1_000_000);
            for _ in 0..2 {
                contract.insert_stream(Stream {
                    id: 0,
                    employer,
                    employee,
                    total_amount: 1_000,
                    start_time: T,
                    duration: 1_000,
                    withdrawn_amount: 0,
                    is_active: true,
                });
            }
            let (session, _) = watch::channel(Session::default());
            Self {
                contract,
                clock,
                session,
                employer,
                employee,
            }
        }

        fn act_as(&self, account: Address) -> ActionDispatcher<InMemoryStreamContract> {
            self.session.send_replace(Session {
                account: Some(account),
                chain_id: Some(CHAIN),
            });
            ActionDispatcher::new(self.contract.clone(), self.session.subscribe(), CHAIN)
        }

        fn view(&self, id: StreamId) -> StreamView {
            self.contract
                .stream_record(id)
                .unwrap()
                .view(self.clock.now_secs(), None)
                .unwrap()
        }
    }

    #[rstest]
    #[case("0x1234", ValidationError::InvalidAddress(AddressError::InvalidLength(4)))]
    #[case(
        "0x000000000000000000000000000000000000dead",
        ValidationError::BurnAddress(Address::DEAD)
    )]
    #[case("0x0101010101010101010101010101010101010101", ValidationError::SelfStream)]
    fn test_validate_create_address(#[case] employee: &str, #[case] expected: ValidationError) {
        let employer = Address::repeat_byte(1);
        assert_eq!(
            ActionDispatcher::<InMemoryStreamContract>::validate_create(&employer, employee, 1, 1),
            Err(expected)
        );
    }

    #[tokio::test]
    async fn test_create_stream_rejects_bad_input_without_submitting() {
        let f = Fixture::new();
        let d = f.act_as(f.employer);
        let employee = f.employee.to_string();

        assert_eq!(
            d.create_stream(&employee, 0, 60).await,
            Err(ActionError::Validation(ValidationError::ZeroAmount))
        );
        assert_eq!(
            d.create_stream(&employee, 10, 0).await,
            Err(ActionError::Validation(ValidationError::ZeroDuration))
        );
        assert!(matches!(
            d.create_stream_from_decimal(&employee, "1.x", 60).await,
            Err(ActionError::Validation(ValidationError::InvalidAmount(_)))
        ));
        assert_eq!(f.contract.submissions(), 0);
    }

    #[tokio::test]
    async fn test_create_stream_confirms() -> TestResult {
        let f = Fixture::new();
        let d = f.act_as(f.employer);
        let tx = d
            .create_stream_from_decimal(&f.employee.to_string(), "0.0000000000000005", 3_600)
            .await?;
        assert_eq!(d.status(ActionTarget::Create), Some(ActionStatus::Confirmed(tx)));
        let created = f.contract.stream_record(2).expect("created");
        assert_eq!(created.total_amount, 500);
        assert_eq!(created.employer, f.employer);
        Ok(())
    }

    #[tokio::test]
    async fn test_withdraw_with_nothing_available_never_submits() {
        let f = Fixture::new();
        let d = f.act_as(f.employee);
        let view = f.view(0);
        assert_eq!(view.available, 0);
        assert_eq!(d.withdraw(&view).await, Err(ActionError::NothingToWithdraw(0)));
        assert_eq!(f.contract.submissions(), 0);
    }

    #[tokio::test]
    async fn test_withdraw_preconditions() {
        let f = Fixture::new();
        f.clock.advance(100);

        let as_employer = f.act_as(f.employer);
        assert_eq!(
            as_employer.withdraw(&f.view(0)).await,
            Err(ActionError::NotEmployee(0))
        );

        let as_employee = f.act_as(f.employee);
        let mut cancelled = f.view(1);
        cancelled.stream.is_active = false;
        assert_eq!(
            as_employee.withdraw(&cancelled).await,
            Err(ActionError::StreamInactive(1))
        );
        assert_eq!(
            as_employee.cancel_stream(&f.view(0)).await,
            Err(ActionError::NotEmployer(0))
        );
        assert_eq!(f.contract.submissions(), 0);
    }

    #[tokio::test]
    async fn test_session_gates_actions() {
        let f = Fixture::new();
        let d = ActionDispatcher::new(f.contract.clone(), f.session.subscribe(), CHAIN);
        assert_eq!(d.withdraw(&f.view(0)).await, Err(ActionError::NotConnected));

        f.session.send_replace(Session {
            account: Some(f.employee),
            chain_id: Some(42_220),
        });
        assert_eq!(
            d.withdraw(&f.view(0)).await,
            Err(ActionError::WrongNetwork {
                expected: CHAIN,
                actual: 42_220
            })
        );
        assert_eq!(f.contract.submissions(), 0);
    }

    #[tokio::test]
    async fn test_withdraw_and_cancel_succeed() -> TestResult {
        let f = Fixture::new();
        f.clock.advance(300);

        let as_employee = f.act_as(f.employee);
        as_employee.withdraw(&f.view(0)).await?;
        assert_eq!(f.contract.stream_record(0).unwrap().withdrawn_amount, 300);

        let as_employer = f.act_as(f.employer);
        let tx = as_employer.cancel_stream(&f.view(0)).await?;
        assert!(!f.contract.stream_record(0).unwrap().is_active);
        assert_eq!(
            as_employer.status(ActionTarget::Stream(0)),
            Some(ActionStatus::Confirmed(tx))
        );
        Ok(())
    }

    #[rstest]
    #[case(4001, "anything", ActionError::UserRejected)]
    #[case(-32000, "User denied transaction signature", ActionError::UserRejected)]
    #[case(-32000, "insufficient funds for gas * price + value", ActionError::InsufficientFunds)]
    #[case(
        -32603,
        "nonce too low",
        ActionError::Generic("RPC error -32603: nonce too low".into())
    )]
    fn test_classify(#[case] code: i64, #[case] message: &str, #[case] expected: ActionError) {
        let err = ChainError::Rpc {
            code,
            message: message.to_string(),
        };
        assert_eq!(ActionError::classify(&err), expected);
    }

    #[rstest]
    #[case(ChainError::Transport("permission denied (os error 13)".into()))]
    #[case(ChainError::Decode("insufficient data for word 2".into()))]
    #[case(ChainError::Reverted(TxHash([1; 32])))]
    fn test_classify_non_rpc_is_generic(#[case] err: ChainError) {
        assert_eq!(ActionError::classify(&err), ActionError::Generic(err.to_string()));
    }

    #[tokio::test]
    async fn test_user_rejection_allows_retry() -> TestResult {
        let f = Fixture::new();
        f.clock.advance(100);
        let d = f.act_as(f.employee);

        f.contract.reject_next_submission(4001, "User rejected the request.");
        assert_eq!(d.withdraw(&f.view(0)).await, Err(ActionError::UserRejected));
        assert_eq!(
            d.status(ActionTarget::Stream(0)),
            Some(ActionStatus::Failed(ActionError::UserRejected))
        );
        assert!(!d.is_pending(ActionTarget::Stream(0)));

        d.withdraw(&f.view(0)).await?;
        assert_eq!(f.contract.stream_record(0).unwrap().withdrawn_amount, 100);
        Ok(())
    }

    #[tokio::test]
    async fn test_insufficient_funds_classified() {
        let f = Fixture::new();
        let d = f.act_as(f.employer);
        let result = d.create_stream(&f.employee.to_string(), 10_000_000, 60).await;
        assert_eq!(result, Err(ActionError::InsufficientFunds));
        assert!(!result.unwrap_err().is_local());
    }

    #[test_log::test(tokio::test)]
    async fn test_pending_is_per_stream() -> TestResult {
        let f = Fixture::new();
        f.clock.advance(100);
        let d = f.act_as(f.employee);
        f.contract.hold_confirmations(true);

        let first = tokio::spawn({
            let d = d.clone();
            let view = f.view(0);
            async move { d.withdraw(&view).await }
        });
        let other = tokio::spawn({
            let d = d.clone();
            let view = f.view(1);
            async move { d.withdraw(&view).await }
        });
        while d.pending().len() < 2 {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            d.withdraw(&f.view(0)).await,
            Err(ActionError::AlreadyPending(ActionTarget::Stream(0)))
        );

        f.contract.hold_confirmations(false);
        first.await??;
        other.await??;
        assert!(d.pending().is_empty());
        assert_eq!(f.contract.submissions(), 2);
        Ok(())
    }

    #[test]
    fn test_guard_dropped_before_submission_releases_target() {
        let actions = ActionMap::default();
        let guard = PendingGuard::acquire(&actions, ActionTarget::Stream(4)).unwrap();
        assert!(matches!(
            PendingGuard::acquire(&actions, ActionTarget::Stream(4)),
            Err(ActionError::AlreadyPending(ActionTarget::Stream(4)))
        ));
        drop(guard);
        assert!(actions.lock().get(&ActionTarget::Stream(4)).is_none());
        assert!(PendingGuard::acquire(&actions, ActionTarget::Stream(4)).is_ok());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_abandoned_action_stays_pending_until_settled() -> TestResult {
        let f = Fixture::new();
        f.clock.advance(100);
        let d = f.act_as(f.employee);
        f.contract.hold_confirmations(true);

        let view = f.view(0);
        let gave_up = tokio::time::timeout(Duration::from_millis(20), d.withdraw(&view)).await;
        assert!(gave_up.is_err());
        assert_eq!(f.contract.submissions(), 1);
        assert!(d.is_pending(ActionTarget::Stream(0)));

        assert_eq!(
            d.withdraw(&view).await,
            Err(ActionError::AlreadyPending(ActionTarget::Stream(0)))
        );
        assert_eq!(f.contract.submissions(), 1);

        f.contract.hold_confirmations(false);
        while d.is_pending(ActionTarget::Stream(0)) {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            d.status(ActionTarget::Stream(0)),
            Some(ActionStatus::Confirmed(_))
        ));
        assert_eq!(f.contract.stream_record(0).unwrap().withdrawn_amount, 100);
        Ok(())
    }
}
