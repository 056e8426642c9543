//! `celoflow`: command-line client for CeloFlow salary streams.
//!
//! ```bash
//! export CELOFLOW_CONTRACT_ADDRESS=0x...
//! celoflow status
//! celoflow streams --status active
//! celoflow create --employee 0x... --amount 1.5 --days 30
//! celoflow withdraw 3
//! celoflow export --format csv --perspective employer > streams.csv
//! ```
//!
//! The JSON-RPC endpoint is also the signer: `eth_sendTransaction` must be
//! accepted for the acting account (a dev node with unlocked accounts, or a
//! wallet bridge).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use celoflow::chain::rpc::{RpcClient, RpcStreamContract};
use celoflow::config::network_name;
use celoflow::dispatcher::ActionDispatcher;
use celoflow::poller::{Poller, RefreshCache};
use celoflow::session::SessionManager;
use celoflow::stream::aggregate::{StatusFilter, StreamFilter};
use celoflow::stream::export::{self, Perspective};
use celoflow::time_source::SystemClock;
use celoflow::units;
use celoflow::{ClientConfig, DashboardSnapshot, SessionStatus, StreamId, StreamView};

const SECS_PER_DAY: f64 = 86_400.0;

#[derive(Parser, Debug)]
#[command(name = "celoflow", about = "Salary streams on Celo", version)]
struct Cli {
    /// JSON-RPC endpoint (overrides CELOFLOW_RPC_URL)
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// Streaming contract address (overrides CELOFLOW_CONTRACT_ADDRESS)
    #[arg(long, global = true)]
    contract: Option<String>,

    /// Expected chain id (overrides CELOFLOW_CHAIN_ID)
    #[arg(long, global = true)]
    chain_id: Option<u64>,

    /// Account to act as (overrides CELOFLOW_ACCOUNT)
    #[arg(long, global = true)]
    account: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show configuration, network, and wallet status
    Status,
    /// List the connected account's streams
    Streams {
        #[arg(long, default_value_t = StatusFilter::All)]
        status: StatusFilter,
        /// Case-insensitive match on id, employer, or employee
        #[arg(long, default_value = "")]
        search: String,
        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Refresh the dashboard continuously until interrupted
    Watch {
        /// Refresh period in milliseconds (overrides CELOFLOW_POLL_INTERVAL_MS)
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Create a stream funded with the given amount
    Create {
        #[arg(long)]
        employee: String,
        /// Total amount in CELO, e.g. 1.5
        #[arg(long)]
        amount: String,
        /// Duration in days
        #[arg(long, conflicts_with = "seconds", required_unless_present = "seconds")]
        days: Option<f64>,
        /// Duration in seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Withdraw everything available from a stream
    Withdraw { id: StreamId },
    /// Cancel a stream you fund
    Cancel { id: StreamId },
    /// Export the connected account's streams
    Export {
        #[arg(long, value_enum, default_value_t = Format::Csv)]
        format: Format,
        #[arg(long, value_enum, default_value_t = Side::Employer)]
        perspective: Side,
        #[arg(long, default_value_t = StatusFilter::All)]
        status: StatusFilter,
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Show the connected account's native balance
    Balance,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Csv,
    Text,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Side {
    Employer,
    Employee,
}

impl From<Side> for Perspective {
    fn from(side: Side) -> Self {
        match side {
            Side::Employer => Perspective::Employer,
            Side::Employee => Perspective::Employee,
        }
    }
}

struct App {
    config: ClientConfig,
    contract: Arc<RpcStreamContract>,
    session: SessionManager<RpcStreamContract>,
}

impl App {
    fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let address = config.contract_address()?;
        let client = RpcClient::new(&config)?;
        let contract = Arc::new(RpcStreamContract::new(client, address));
        let session = SessionManager::new(contract.clone(), config.chain_id)
            .with_account(config.account_override()?);
        Ok(Self {
            config,
            contract,
            session,
        })
    }

    /// Connect and insist on a usable session.
    async fn ready(&self) -> anyhow::Result<celoflow::Address> {
        match self.session.connect().await.context("wallet connection failed")? {
            SessionStatus::Ready { account } => Ok(account),
            SessionStatus::WrongNetwork { expected, actual } => bail!(
                "wallet is on {} ({actual}); switch to {} ({expected})",
                network_name(actual),
                network_name(expected)
            ),
            SessionStatus::Disconnected => bail!("no wallet connected"),
        }
    }

    async fn snapshot(&self) -> anyhow::Result<DashboardSnapshot> {
        let account = self.ready().await?;
        let poller = Poller::new(self.contract.clone(), SystemClock, &self.config);
        let snapshot = poller
            .refresh(account, &mut RefreshCache::default())
            .await
            .context("failed to read streams")?;
        Ok(snapshot)
    }

    fn dispatcher(&self) -> ActionDispatcher<RpcStreamContract> {
        ActionDispatcher::new(self.contract.clone(), self.session.subscribe(), self.config.chain_id)
    }

    async fn stream(&self, id: StreamId) -> anyhow::Result<StreamView> {
        let snapshot = self.snapshot().await?;
        match snapshot.get(id) {
            Some(view) => Ok(view.clone()),
            None => bail!("stream {id} does not involve {}", snapshot.account),
        }
    }
}

fn apply_overrides(config: &mut ClientConfig, cli: &Cli) {
    if let Some(url) = &cli.rpc_url {
        config.rpc_url = url.clone();
    }
    if let Some(contract) = &cli.contract {
        config.contract_address = Some(contract.clone());
    }
    if let Some(chain_id) = cli.chain_id {
        config.chain_id = chain_id;
    }
    if let Some(account) = &cli.account {
        config.account = Some(account.clone());
    }
    if let Command::Watch {
        interval_ms: Some(ms),
    } = cli.command
    {
        if ms > 0 {
            config.poll_interval = Duration::from_millis(ms);
        }
    }
}

fn print_status(config: &ClientConfig) {
    let status = config.status();
    println!("Contract: {}", status.display_address());
    println!("Network:  {} ({})", status.network, status.chain_id);
    println!("RPC:      {}", config.rpc_url);
    for warning in &status.warnings {
        println!("warning: {warning}");
    }
    for error in &status.errors {
        println!("error: {error}");
    }
}

fn print_snapshot(snapshot: &DashboardSnapshot, filter: &StreamFilter) {
    let totals = &snapshot.totals;
    println!("Account: {}", snapshot.account);
    println!(
        "Created {} ({} active), {} CELO streamed, {} CELO withdrawn, {} CELO available to you",
        totals.streams_created,
        totals.active_streams,
        units::format_fixed(totals.total_amount, 4),
        units::format_fixed(totals.total_withdrawn, 4),
        units::format_fixed(totals.employee_available, 4),
    );
    for view in filter.apply(&snapshot.streams) {
        let role = if view.stream.employer == snapshot.account {
            "paying"
        } else {
            "paid by"
        };
        let counterparty = if view.stream.employer == snapshot.account {
            view.stream.employee
        } else {
            view.stream.employer
        };
        println!(
            "#{:<4} {role:<7} {} {:>12} CELO  {:>10} CELO/day  {:>6.2}%  available {} CELO  {}",
            view.id(),
            counterparty.shorten(),
            units::format_fixed(view.stream.total_amount, 4),
            units::format_fixed(view.rates.per_day, 4),
            f64::from(view.progress_bps) / 100.0,
            units::format_fixed(view.available, 4),
            if view.is_active() { "Active" } else { "Cancelled" },
        );
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ClientConfig::from_env();
    apply_overrides(&mut config, &cli);

    match cli.command {
        Command::Status => {
            print_status(&config);
            if config.status().configured {
                let app = App::new(config)?;
                match app.session.connect().await {
                    Ok(SessionStatus::Ready { account }) => println!("Wallet:   {account}"),
                    Ok(SessionStatus::WrongNetwork { actual, .. }) => {
                        println!("Wallet:   wrong network ({})", network_name(actual))
                    }
                    Ok(SessionStatus::Disconnected) => println!("Wallet:   not connected"),
                    Err(e) => println!("Wallet:   unavailable ({e})"),
                }
            }
        }
        Command::Streams {
            status,
            search,
            json,
        } => {
            let app = App::new(config)?;
            let snapshot = app.snapshot().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_snapshot(&snapshot, &StreamFilter::new(status, search));
            }
        }
        Command::Watch { .. } => {
            let app = App::new(config)?;
            app.ready().await?;
            // Follow wallet account and network switches at the poll cadence.
            let refresher = app.session.spawn_refresh(app.config.poll_interval);
            let poller = Poller::new(app.contract.clone(), SystemClock, &app.config);
            let handle = poller.spawn(app.session.subscribe());
            let mut snapshots = handle.subscribe();
            let filter = StreamFilter::default();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if let Some(snapshot) = snapshots.borrow_and_update().clone() {
                            println!();
                            print_snapshot(&snapshot, &filter);
                        }
                    }
                }
            }
            handle.stop().await;
            refresher.stop().await;
        }
        Command::Create {
            employee,
            amount,
            days,
            seconds,
        } => {
            let app = App::new(config)?;
            app.ready().await?;
            let duration_secs = match (seconds, days) {
                (Some(secs), _) => secs,
                (None, Some(days)) if days.is_finite() && days > 0.0 => (days * SECS_PER_DAY).round() as u64,
                _ => bail!("duration must be greater than zero"),
            };
            let tx = app
                .dispatcher()
                .create_stream_from_decimal(&employee, &amount, duration_secs)
                .await?;
            println!("Stream created: {tx}");
        }
        Command::Withdraw { id } => {
            let app = App::new(config)?;
            let view = app.stream(id).await?;
            let available = view.available;
            let tx = app.dispatcher().withdraw(&view).await?;
            println!("Withdrew {} CELO from stream {id}: {tx}", units::format_units(available));
        }
        Command::Cancel { id } => {
            let app = App::new(config)?;
            let view = app.stream(id).await?;
            let tx = app.dispatcher().cancel_stream(&view).await?;
            println!("Stream {id} cancelled: {tx}");
        }
        Command::Export {
            format,
            perspective,
            status,
            search,
        } => {
            let app = App::new(config)?;
            let snapshot = app.snapshot().await?;
            let perspective = Perspective::from(perspective);
            let side: Vec<StreamView> = match perspective {
                Perspective::Employer => snapshot.employer_streams().cloned().collect(),
                Perspective::Employee => snapshot.employee_streams().cloned().collect(),
            };
            let visible: Vec<StreamView> = StreamFilter::new(status, search)
                .apply(&side)
                .into_iter()
                .cloned()
                .collect();
            let out = match format {
                Format::Csv => export::to_csv(&visible, perspective),
                Format::Text => export::to_plain_text(&visible, perspective),
            };
            println!("{out}");
        }
        Command::Balance => {
            let app = App::new(config)?;
            let account = app.ready().await?;
            let balance = app.session.balance().await?.unwrap_or_default();
            println!("{account}: {} CELO", units::format_units(balance));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run(Cli::parse()).await
}
