use cashier::application::cashier::Cashier;
use cashier::config::Settings;
use cashier::domain::cash::CashOutcome;
use cashier::infrastructure::in_memory::{InMemoryCurrencyAuthority, InMemoryLockProvider};
use cashier::infrastructure::sqlite::SqliteStore;
use cashier::interfaces::csv::balance_writer::BalanceWriter;
use cashier::interfaces::csv::request_reader::RequestReader;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input requests CSV file
    input: PathBuf,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database file, overrides `[database] path`. In-memory when neither is set.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Register unknown currencies on first use
    #[arg(long)]
    user_create: bool,

    /// Log filter, e.g. `warn` or `cashier=debug`
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal()),
        )
        .init();

    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path).into_diagnostic()?,
        None => Settings::default(),
    };
    if cli.user_create {
        settings.cashier.user_create = true;
    }

    let store = match cli.db_path.or(settings.database.path) {
        Some(path) => {
            info!(path = %path.display(), "opening database");
            SqliteStore::open(path).into_diagnostic()?
        }
        None => SqliteStore::in_memory().into_diagnostic()?,
    };
    let cashier = Cashier::new(
        &settings.cashier,
        store,
        Box::new(InMemoryCurrencyAuthority::new()),
        Box::new(InMemoryLockProvider::new()),
    );

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = RequestReader::new(file);
    for request in reader.requests() {
        match request {
            Ok(command) => match cashier.dispatch(command).await {
                Ok(CashOutcome::Note(note)) => {
                    info!(user = note.user_serial, name = %note.name, value = note.value, "note cashed out")
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "Error processing request"),
            },
            Err(err) => warn!(%err, "Error reading request"),
        }
    }

    let balances = cashier.balances().into_diagnostic()?;
    cashier.close();

    let stdout = io::stdout();
    let mut writer = BalanceWriter::new(stdout.lock());
    writer.write_balances(&balances).into_diagnostic()?;

    Ok(())
}
