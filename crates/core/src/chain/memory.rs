//! In-memory streaming contract and wallet (test / testing feature).
//!
//! Applies the contract's rules directly to local state. Transactions are
//! mined as soon as they are submitted; confirmation can be held back with
//! [`InMemoryStreamContract::hold_confirmations`] to observe in-flight
//! actions. Failure injection covers read outages, per-stream read failures,
//! and signer errors.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::{ChainError, ChainFuture, ContractCall, StreamContract, TxHash, WalletSession};
use crate::address::Address;
use crate::stream::{accrual, Stream, StreamId};
use crate::time_source::TimeSource;

/// JSON-RPC code nodes use for `execution reverted`.
const REVERT_CODE: i64 = 3;
/// JSON-RPC code nodes use for generic server-side failures.
const SERVER_ERROR_CODE: i64 = -32000;

#[derive(Default)]
struct State {
    streams: Vec<Stream>,
    balances: HashMap<Address, u128>,
    accounts: Vec<Address>,
    chain_id: u64,
    mined: HashSet<TxHash>,
    tx_counter: u64,
    fail_reads: bool,
    failing_streams: HashSet<StreamId>,
    next_submit_error: Option<(i64, String)>,
    read_delay: Option<Duration>,
}

pub struct InMemoryStreamContract {
    state: Mutex<State>,
    clock: Box<dyn TimeSource>,
    hold: watch::Sender<bool>,
    submissions: AtomicUsize,
    count_reads: AtomicUsize,
    active_count_reads: AtomicUsize,
    peak_count_reads: AtomicUsize,
    active_stream_reads: AtomicUsize,
    peak_stream_reads: AtomicUsize,
}

impl InMemoryStreamContract {
    pub fn new(chain_id: u64, clock: impl TimeSource) -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            state: Mutex::new(State {
                chain_id,
                ..State::default()
            }),
            clock: Box::new(clock),
            hold,
            submissions: AtomicUsize::new(0),
            count_reads: AtomicUsize::new(0),
            active_count_reads: AtomicUsize::new(0),
            peak_count_reads: AtomicUsize::new(0),
            active_stream_reads: AtomicUsize::new(0),
            peak_stream_reads: AtomicUsize::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Setup
    // -------------------------------------------------------------------------

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state.lock().accounts = accounts;
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().chain_id = chain_id;
    }

    pub fn fund(&self, account: Address, amount: u128) {
        *self.state.lock().balances.entry(account).or_default() += amount;
    }

    /// Insert a stream record as-is, bypassing the contract rules. Its id is
    /// reassigned to the next sequential id, which is returned.
    pub fn insert_stream(&self, mut stream: Stream) -> StreamId {
        let mut state = self.state.lock();
        stream.id = state.streams.len() as StreamId;
        let id = stream.id;
        state.streams.push(stream);
        id
    }

    // -------------------------------------------------------------------------
    // Failure injection and inspection
    // -------------------------------------------------------------------------

    /// Make every read fail until turned off.
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Make reads of one stream fail until turned off.
    pub fn fail_stream(&self, id: StreamId, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing_streams.insert(id);
        } else {
            state.failing_streams.remove(&id);
        }
    }

    /// The next submission fails with this JSON-RPC error instead of being
    /// signed.
    pub fn reject_next_submission(&self, code: i64, message: impl Into<String>) {
        self.state.lock().next_submit_error = Some((code, message.into()));
    }

    /// Delay every read by `delay`.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.state.lock().read_delay = delay;
    }

    /// While held, `wait_for_confirmation` does not resolve.
    pub fn hold_confirmations(&self, hold: bool) {
        self.hold.send_replace(hold);
    }

    /// Number of transactions handed to the signer, including rejected ones.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of `next_stream_id` reads served.
    pub fn count_reads(&self) -> usize {
        self.count_reads.load(Ordering::SeqCst)
    }

    /// Most `next_stream_id` reads ever in progress at once.
    pub fn peak_concurrent_count_reads(&self) -> usize {
        self.peak_count_reads.load(Ordering::SeqCst)
    }

    /// Most `stream` record reads ever in progress at once.
    pub fn peak_concurrent_stream_reads(&self) -> usize {
        self.peak_stream_reads.load(Ordering::SeqCst)
    }

    pub fn balance_of(&self, account: &Address) -> u128 {
        self.state
            .lock()
            .balances
            .get(account)
            .copied()
            .unwrap_or(0)
    }

    pub fn stream_record(&self, id: StreamId) -> Option<Stream> {
        self.state.lock().streams.get(id as usize).cloned()
    }

    // -------------------------------------------------------------------------
    // Contract rules
    // -------------------------------------------------------------------------

    fn read_guard(state: &State, id: Option<StreamId>) -> Result<(), ChainError> {
        if state.fail_reads {
            return Err(ChainError::Transport("connection refused".to_string()));
        }
        if let Some(id) = id {
            if state.failing_streams.contains(&id) {
                return Err(ChainError::Transport(format!("read of stream {id} failed")));
            }
        }
        Ok(())
    }

    fn read_delay(&self) -> Option<Duration> {
        self.state.lock().read_delay
    }

    fn contract_available(stream: &Stream, now: u64) -> Result<u128, ChainError> {
        if !stream.is_active {
            return Ok(0);
        }
        accrual::available(
            stream.total_amount,
            stream.start_time,
            stream.duration,
            stream.withdrawn_amount,
            now,
        )
        .map_err(|e| revert(&e.to_string()))
    }

    fn apply(&self, state: &mut State, from: Address, call: ContractCall) -> Result<(), ChainError> {
        let now = self.clock.now_secs();
        match call {
            ContractCall::CreateStream {
                employee,
                duration_secs,
                value,
            } => {
                if employee == Address::ZERO {
                    return Err(revert("Invalid employee address"));
                }
                if value == 0 {
                    return Err(revert("Amount must be greater than 0"));
                }
                if duration_secs == 0 {
                    return Err(revert("Duration must be greater than 0"));
                }
                let balance = state.balances.entry(from).or_default();
                if *balance < value {
                    return Err(ChainError::Rpc {
                        code: SERVER_ERROR_CODE,
                        message: "insufficient funds for gas * price + value".to_string(),
                    });
                }
                *balance -= value;
                let id = state.streams.len() as StreamId;
                state.streams.push(Stream {
                    id,
                    employer: from,
                    employee,
                    total_amount: value,
                    start_time: now,
                    duration: duration_secs,
                    withdrawn_amount: 0,
                    is_active: true,
                });
            }
            ContractCall::Withdraw(id) => {
                let stream = state
                    .streams
                    .get_mut(id as usize)
                    .ok_or_else(|| revert("Stream does not exist"))?;
                if stream.employee != from {
                    return Err(revert("Only employee can withdraw"));
                }
                if !stream.is_active {
                    return Err(revert("Stream is not active"));
                }
                let amount = Self::contract_available(stream, now)?;
                if amount == 0 {
                    return Err(revert("No funds available"));
                }
                stream.withdrawn_amount += amount;
                *state.balances.entry(from).or_default() += amount;
            }
            ContractCall::CancelStream(id) => {
                let stream = state
                    .streams
                    .get_mut(id as usize)
                    .ok_or_else(|| revert("Stream does not exist"))?;
                if stream.employer != from {
                    return Err(revert("Only employer can cancel"));
                }
                if !stream.is_active {
                    return Err(revert("Stream is not active"));
                }
                // Pay out what has vested, refund the rest.
                let owed = Self::contract_available(stream, now)?;
                stream.withdrawn_amount += owed;
                stream.is_active = false;
                let refund = stream.total_amount - stream.withdrawn_amount;
                let (employee, employer) = (stream.employee, stream.employer);
                *state.balances.entry(employee).or_default() += owed;
                *state.balances.entry(employer).or_default() += refund;
            }
        }
        Ok(())
    }
}

fn revert(reason: &str) -> ChainError {
    ChainError::Rpc {
        code: REVERT_CODE,
        message: format!("execution reverted: {reason}"),
    }
}

impl StreamContract for InMemoryStreamContract {
    fn next_stream_id(&self) -> ChainFuture<'_, StreamId> {
        Box::pin(async move {
            let active = self.active_count_reads.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_count_reads.fetch_max(active, Ordering::SeqCst);
            if let Some(delay) = self.read_delay() {
                tokio::time::sleep(delay).await;
            }
            self.active_count_reads.fetch_sub(1, Ordering::SeqCst);
            self.count_reads.fetch_add(1, Ordering::SeqCst);
            let state = self.state.lock();
            Self::read_guard(&state, None)?;
            Ok(state.streams.len() as StreamId)
        })
    }

    fn stream(&self, id: StreamId) -> ChainFuture<'_, Stream> {
        Box::pin(async move {
            let active = self.active_stream_reads.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_stream_reads.fetch_max(active, Ordering::SeqCst);
            if let Some(delay) = self.read_delay() {
                tokio::time::sleep(delay).await;
            }
            self.active_stream_reads.fetch_sub(1, Ordering::SeqCst);
            let state = self.state.lock();
            Self::read_guard(&state, Some(id))?;
            state
                .streams
                .get(id as usize)
                .cloned()
                .ok_or(ChainError::UnknownStream(id))
        })
    }

    fn available(&self, id: StreamId) -> ChainFuture<'_, u128> {
        Box::pin(async move {
            if let Some(delay) = self.read_delay() {
                tokio::time::sleep(delay).await;
            }
            let state = self.state.lock();
            Self::read_guard(&state, Some(id))?;
            let stream = state
                .streams
                .get(id as usize)
                .ok_or(ChainError::UnknownStream(id))?;
            Self::contract_available(stream, self.clock.now_secs())
        })
    }

    fn submit(&self, from: Address, call: ContractCall) -> ChainFuture<'_, TxHash> {
        Box::pin(async move {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            let mut state = self.state.lock();
            if let Some((code, message)) = state.next_submit_error.take() {
                return Err(ChainError::Rpc { code, message });
            }
            self.apply(&mut state, from, call)?;

            state.tx_counter += 1;
            let mut hash = [0u8; 32];
            hash[24..].copy_from_slice(&state.tx_counter.to_be_bytes());
            let tx = TxHash(hash);
            state.mined.insert(tx);
            tracing::debug!(tx_hash = %tx, call = call.name(), "in-memory transaction mined");
            Ok(tx)
        })
    }

    fn wait_for_confirmation(&self, tx: TxHash) -> ChainFuture<'_, ()> {
        Box::pin(async move {
            let mut hold = self.hold.subscribe();
            // The sender lives as long as `self`.
            let _ = hold.wait_for(|held| !*held).await;
            if self.state.lock().mined.contains(&tx) {
                Ok(())
            } else {
                Err(ChainError::ConfirmationTimeout(tx))
            }
        })
    }
}

impl WalletSession for InMemoryStreamContract {
    fn accounts(&self) -> ChainFuture<'_, Vec<Address>> {
        Box::pin(async move { Ok(self.state.lock().accounts.clone()) })
    }

    fn chain_id(&self) -> ChainFuture<'_, u64> {
        Box::pin(async move {
            let state = self.state.lock();
            Self::read_guard(&state, None)?;
            Ok(state.chain_id)
        })
    }

    fn balance(&self, account: Address) -> ChainFuture<'_, u128> {
        Box::pin(async move { Ok(self.balance_of(&account)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_source::ManualClock;
    use testresult::TestResult;

    const T: u64 = 1_700_000_000;

    fn setup() -> (InMemoryStreamContract, ManualClock, Address, Address) {
        let clock = ManualClock::new(T);
        let contract = InMemoryStreamContract::new(44_787, clock.clone());
        let employer = Address::repeat_byte(1);
        let employee = Address::repeat_byte(2);
        contract.fund(employer, 10_000);
        (contract, clock, employer, employee)
    }

    fn create(employee: Address, value: u128) -> ContractCall {
        ContractCall::CreateStream {
            employee,
            duration_secs: 1_000,
            value,
        }
    }

    #[tokio::test]
    async fn test_create_withdraw_cancel_lifecycle() -> TestResult {
        let (contract, clock, employer, employee) = setup();

        let tx = contract.submit(employer, create(employee, 1_000)).await?;
        contract.wait_for_confirmation(tx).await?;
        assert_eq!(contract.next_stream_id().await?, 1);
        assert_eq!(contract.balance_of(&employer), 9_000);

        clock.advance(250);
        assert_eq!(contract.available(0).await?, 250);
        contract.submit(employee, ContractCall::Withdraw(0)).await?;
        assert_eq!(contract.stream(0).await?.withdrawn_amount, 250);
        assert_eq!(contract.balance_of(&employee), 250);

        clock.advance(250);
        contract.submit(employer, ContractCall::CancelStream(0)).await?;
        let stream = contract.stream(0).await?;
        assert!(!stream.is_active);
        assert_eq!(stream.withdrawn_amount, 500);
        assert_eq!(contract.balance_of(&employee), 500);
        assert_eq!(contract.balance_of(&employer), 9_500);

        clock.advance(250);
        assert_eq!(contract.available(0).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_access_control_reverts() -> TestResult {
        let (contract, clock, employer, employee) = setup();
        contract.submit(employer, create(employee, 1_000)).await?;
        clock.advance(10);

        let err = contract
            .submit(employer, ContractCall::Withdraw(0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Only employee"));

        let err = contract
            .submit(employee, ContractCall::CancelStream(0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Only employer"));
        Ok(())
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let (contract, _, employer, employee) = setup();
        let err = contract
            .submit(employer, create(employee, 20_000))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("insufficient funds"));
    }

    #[tokio::test]
    async fn test_injected_failures() -> TestResult {
        let (contract, _, employer, employee) = setup();
        contract.submit(employer, create(employee, 1_000)).await?;

        contract.fail_stream(0, true);
        assert!(contract.stream(0).await.is_err());
        assert!(contract.next_stream_id().await.is_ok());
        contract.fail_stream(0, false);

        contract.fail_reads(true);
        assert!(contract.next_stream_id().await.is_err());
        assert!(contract.chain_id().await.is_err());
        contract.fail_reads(false);

        contract.reject_next_submission(4001, "User rejected the request.");
        let err = contract
            .submit(employer, create(employee, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Rpc { code: 4001, .. }));
        assert_eq!(contract.submissions(), 2);
        assert_eq!(contract.next_stream_id().await?, 1);
        Ok(())
    }
}
