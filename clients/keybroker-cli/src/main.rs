//! keybroker - PKCS#11 key lifecycle command line interface

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use keybroker::{
    BrokerConfig, BrokerResult, ConnectionStatus, Credential, DeleteOutcome, KeyBroker, KeyDetail,
    KeyClass, KeyFilter, KeyQuery, KeyRecord, KeySpec, KeyType, LIBRARY_ENV, Pkcs11Token,
};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the vendor PKCS#11 module
    #[arg(long, env = LIBRARY_ENV, global = true)]
    library: Option<PathBuf>,

    /// Token user name
    #[arg(short, long, env = "HSM_USERNAME", global = true)]
    username: Option<String>,

    /// Token user secret, joined with the user name to form the PIN
    #[arg(short, long, env = "HSM_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log line format (logs go to stderr)
    #[arg(long, value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open and close a session without logging in
    Check,

    /// Verify the credential against the token
    Login,

    /// List every object on the token
    List,

    /// List objects matching all given fields
    Filter(QueryArgs),

    /// Show the first matching object with its flags
    Find(QueryArgs),

    /// Generate a key (AES) or key pair (RSA)
    Create(CreateArgs),

    /// Destroy every matching object
    Delete(QueryArgs),
}

#[derive(Args, Debug, Default)]
struct QueryArgs {
    /// Object class (SECRET_KEY, PRIVATE_KEY, PUBLIC_KEY)
    #[arg(long)]
    class: Option<String>,

    /// Key type (AES, RSA, EC)
    #[arg(long = "type")]
    key_type: Option<String>,

    #[arg(long)]
    label: Option<String>,

    /// Object id as hex
    #[arg(long)]
    id: Option<String>,
}

impl QueryArgs {
    fn to_query(&self) -> KeyQuery {
        KeyQuery {
            key_class: self.class.clone(),
            key_type: self.key_type.clone(),
            label: self.label.clone(),
            key_id: self.id.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[arg(long)]
    label: String,

    /// Object class (SECRET_KEY, PRIVATE_KEY, PUBLIC_KEY)
    #[arg(long)]
    class: String,

    /// Key type (AES, RSA)
    #[arg(long = "type")]
    key_type: String,

    /// Bytes for AES, modulus bits for RSA
    #[arg(long)]
    size: Option<u64>,

    /// Object id as hex, stamped on every generated object
    #[arg(long)]
    id: Option<String>,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    token: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    private: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    sensitive: bool,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    extractable: bool,

    #[arg(long)]
    encrypt: Option<bool>,

    #[arg(long)]
    decrypt: Option<bool>,

    #[arg(long)]
    sign: Option<bool>,

    #[arg(long)]
    verify: Option<bool>,
}

impl CreateArgs {
    fn to_spec(&self) -> Result<KeySpec> {
        let class: KeyClass = self.class.parse()?;
        let key_type: KeyType = self.key_type.parse()?;

        let mut spec = KeySpec::new(self.label.clone(), class, key_type);
        spec.key_size = self.size;
        spec.id = self.id.clone();
        spec.token = self.token;
        spec.private = self.private;
        spec.sensitive = self.sensitive;
        spec.extractable = self.extractable;
        spec.encrypt = self.encrypt;
        spec.decrypt = self.decrypt;
        spec.sign = self.sign;
        spec.verify = self.verify;
        Ok(spec)
    }
}

type Broker = Arc<KeyBroker<Pkcs11Token>>;

fn init_tracing(format: LogFormat) {
    let json = format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keybroker=info".into()),
        )
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn broker_config(cli: &Cli) -> BrokerConfig {
    match &cli.library {
        Some(path) => BrokerConfig::new(path.clone()),
        None => BrokerConfig::from_env(),
    }
}

fn credential(cli: &Cli) -> Result<Credential> {
    let username = cli
        .username
        .clone()
        .context("A user name is required (--username or HSM_USERNAME)")?;
    let password = cli
        .password
        .clone()
        .context("A password is required (--password or HSM_PASSWORD)")?;
    Ok(Credential::new(username, password))
}

/// Run a broker call on the blocking pool; token I/O never runs on the async workers.
async fn blocking<T, F>(broker: &Broker, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&KeyBroker<Pkcs11Token>) -> BrokerResult<T> + Send + 'static,
{
    let broker = Arc::clone(broker);
    let result = tokio::task::spawn_blocking(move || work(&broker))
        .await
        .context("Broker task failed")?;

    result.map_err(|e| match e.diagnostic() {
        Some(diagnostic) => anyhow!("{} ({})", e, diagnostic),
        None => anyhow!(e),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_record(record: &KeyRecord) {
    println!(
        "  {} [{} {}]{}",
        record.label.as_deref().unwrap_or("<no label>").cyan(),
        record.class,
        record.key_type,
        record
            .id
            .as_deref()
            .map(|id| format!(" id={}", id))
            .unwrap_or_default()
    );
}

// ==================== Commands ====================

async fn cmd_check(cli: &Cli, broker: &Broker) -> Result<()> {
    let broker = Arc::clone(broker);
    let status: ConnectionStatus = tokio::task::spawn_blocking(move || broker.check_connection())
        .await
        .context("Broker task failed")?;

    if cli.json {
        return print_json(&status);
    }

    if status.connected {
        println!("{}", "Token reachable".green().bold());
        println!("  Slots with token: {}", status.slots);
    } else {
        println!("{}", "Token unreachable".red().bold());
        if let Some(error) = &status.error {
            println!("  Error: {}", error);
        }
    }
    Ok(())
}

async fn cmd_login(cli: &Cli, broker: &Broker) -> Result<()> {
    let credential = credential(cli)?;
    let username = credential.username().to_string();
    blocking(broker, move |b| b.authenticate(&credential)).await?;

    if cli.json {
        return print_json(&serde_json::json!({ "authenticated": true, "username": username }));
    }
    println!("{}", format!("Authenticated as {}", username).green().bold());
    Ok(())
}

async fn cmd_list(cli: &Cli, broker: &Broker, filter: Option<KeyFilter>) -> Result<()> {
    let credential = credential(cli)?;
    let records = match filter {
        Some(filter) => blocking(broker, move |b| b.filter(&credential, &filter)).await?,
        None => blocking(broker, move |b| b.list(&credential)).await?,
    };

    if cli.json {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("{}", "No keys found.".yellow());
        return Ok(());
    }
    println!("{}", format!("Keys ({}):", records.len()).cyan().bold());
    for record in &records {
        print_record(record);
    }
    Ok(())
}

async fn cmd_find(cli: &Cli, broker: &Broker, filter: KeyFilter) -> Result<()> {
    let credential = credential(cli)?;
    let detail: KeyDetail = blocking(broker, move |b| b.find_one(&credential, &filter)).await?;

    if cli.json {
        return print_json(&detail);
    }

    println!("{}", "Key:".cyan().bold());
    print_record(&detail.record);
    let flags = &detail.flags;
    for (name, value) in [
        ("token", flags.token),
        ("private", flags.private),
        ("sensitive", flags.sensitive),
        ("extractable", flags.extractable),
        ("local", flags.local),
        ("modifiable", flags.modifiable),
        ("destroyable", flags.destroyable),
    ] {
        let shown = if value { "yes".green() } else { "no".dimmed() };
        println!("    {:<12} {}", name, shown);
    }
    Ok(())
}

async fn cmd_create(cli: &Cli, broker: &Broker, args: &CreateArgs) -> Result<()> {
    let spec = args.to_spec()?;
    let credential = credential(cli)?;
    let record = blocking(broker, move |b| b.create(&credential, &spec)).await?;

    if cli.json {
        return print_json(&record);
    }
    println!("{}", "Key created successfully!".green().bold());
    print_record(&record);
    Ok(())
}

async fn cmd_delete(cli: &Cli, broker: &Broker, filter: KeyFilter) -> Result<()> {
    if filter.is_empty() && !cli.json {
        println!(
            "{}",
            "WARNING: No filter given, every object on the token matches.".red()
        );
    }

    let credential = credential(cli)?;
    let outcome: DeleteOutcome = blocking(broker, move |b| b.delete(&credential, &filter)).await?;

    if cli.json {
        return print_json(&outcome);
    }

    let summary = format!("Deleted {} of {} matching objects", outcome.deleted, outcome.matched);
    if outcome.deleted == outcome.matched {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.yellow().bold());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = broker_config(&cli);
    tracing::info!(
        library = %config.library_path.display(),
        command = ?cli.command,
        "Starting keybroker"
    );
    let broker: Broker = Arc::new(
        KeyBroker::from_config(&config)
            .with_context(|| format!("Failed to load {}", config.library_path.display()))?,
    );

    match &cli.command {
        Commands::Check => cmd_check(&cli, &broker).await,
        Commands::Login => cmd_login(&cli, &broker).await,
        Commands::List => cmd_list(&cli, &broker, None).await,
        Commands::Filter(args) => {
            let filter = KeyFilter::parse(&args.to_query())?;
            cmd_list(&cli, &broker, Some(filter)).await
        }
        Commands::Find(args) => cmd_find(&cli, &broker, KeyFilter::parse(&args.to_query())?).await,
        Commands::Create(args) => cmd_create(&cli, &broker, args).await,
        Commands::Delete(args) => {
            cmd_delete(&cli, &broker, KeyFilter::parse(&args.to_query())?).await
        }
    }
}
