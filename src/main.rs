use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sqlsrv_adapter::db::{available_drivers, ConnectionConfig, DriverKind, QueryOutcome};
use sqlsrv_adapter::{DatabaseAdapter, SqlSrvAdapter};

/// Inspect and query a SQL Server database through the adapter
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Use a saved connection by name
    #[arg(long = "connect", global = true)]
    connect: Option<String>,

    #[arg(long, global = true)]
    database: Option<String>,

    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    /// SQL login; Windows authentication when omitted
    #[arg(long, global = true)]
    login: Option<String>,

    /// Backend to use: sqlsrv or mssql
    #[arg(long, global = true)]
    driver: Option<DriverKind>,

    #[arg(long, global = true)]
    encrypted: bool,

    /// Login timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// List backends available on this host
    Drivers,
    /// List tables
    Sources,
    /// Describe a table's columns
    Describe { table: String },
    /// Execute a statement and print rows as JSON
    Query { sql: String },
}

fn resolve_config(args: &ConnectionArgs) -> Result<ConnectionConfig> {
    let mut config = match &args.connect {
        Some(name) => {
            let saved = ConnectionConfig::load_saved_connections().unwrap_or_default();
            match saved.into_iter().find(|c| c.name.eq_ignore_ascii_case(name)) {
                Some(config) => config,
                None => bail!(
                    "no saved connection named {:?} in {}",
                    name,
                    ConnectionConfig::get_config_path().display()
                ),
            }
        }
        None => ConnectionConfig::default(),
    };

    if let Some(database) = &args.database {
        config.database = database.clone();
    }
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(login) = &args.login {
        config.login = Some(login.clone());
    }
    if args.driver.is_some() {
        config.driver = args.driver;
    }
    if args.timeout.is_some() {
        config.timeout = args.timeout;
    }
    config.encrypted |= args.encrypted;

    // Resolve password: SQLSRV_PASSWORD env var, then interactive prompt
    if config.login.is_some() && config.password.is_empty() {
        if let Ok(pw) = std::env::var("SQLSRV_PASSWORD") {
            config.password = pw;
        } else {
            let prompt = format!("Password for {}: ", config.display_string());
            config.password = rpassword::read_password_from_tty(Some(&prompt))?;
        }
    }

    Ok(config)
}

fn connect(args: &ConnectionArgs) -> Result<SqlSrvAdapter> {
    let config = resolve_config(args)?;
    let mut adapter = SqlSrvAdapter::new(config)?;
    adapter
        .try_connect()
        .with_context(|| format!("connecting to {}", adapter.config().display_string()))?;
    Ok(adapter)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Drivers => {
            let drivers: Vec<&str> = available_drivers().iter().map(DriverKind::name).collect();
            print_json(&serde_json::json!(drivers))?;
        }
        Command::Sources => {
            let mut adapter = connect(&cli.connection)?;
            print_json(&serde_json::json!(adapter.sources()?))?;
            adapter.disconnect();
        }
        Command::Describe { table } => {
            let mut adapter = connect(&cli.connection)?;
            let schema = adapter.describe(&table)?;
            if schema.is_empty() {
                bail!("table {:?} not found", table);
            }
            print_json(&serde_json::to_value(&schema)?)?;
            adapter.disconnect();
        }
        Command::Query { sql } => {
            let mut adapter = connect(&cli.connection)?;
            match adapter.execute(&sql)? {
                QueryOutcome::Rows(rows) => {
                    let rows: Vec<serde_json::Value> = rows.map(|row| row.to_json()).collect();
                    print_json(&serde_json::Value::Array(rows))?;
                }
                QueryOutcome::Done => eprintln!("OK"),
            }
            adapter.disconnect();
        }
    }

    Ok(())
}
