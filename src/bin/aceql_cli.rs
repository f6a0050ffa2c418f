//!
//! aceql CLI binary
//! ----------------
//! Runs SQL against a remote AceQL gateway, either one statement at a time
//! (`--query` / `--update`) or interactively (`--repl`). Results are printed as an
//! ASCII table, or as JSON when `ACEQL_OUTPUT=json`.

use std::env;
use std::io::{self, Write};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, error};

use aceql_client::cli::{json_output_forced, print_result_table, ReplCommand, ResultTable};
use aceql_client::{AceQLConnection, ConnectionOptions};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} --connection-string \"Server=...;Database=...;Username=...;Password=...\" --query \"<SQL>\"\n  {program} --server <url> --database <db> --user <u> --password <p> --update \"<SQL>\"\n  {program} --repl [connection flags]\n\nFlags:\n  --connection-string <cs>  AceQL connection string (default: env ACEQL_CONNECTION_STRING)\n  --server <url>            Gateway URL, e.g. http://localhost:9090/aceql\n  --database <db>           Remote database name\n  --user <u>                Username\n  --password <p>            Password\n  -q, --query <SQL>         Run a query and print its rows\n  -u, --update <SQL>        Run an update and print the affected row count\n  --repl                    Start interactive mode (default when no statement is given)\n  -h, --help                Show this help\n\nInteractive commands:\n  begin [isolation level <level>]   start a transaction\n  commit | rollback                 end the active transaction\n  status                            show session and transaction state\n  version                           show the gateway version\n  help                              show this help\n  quit | exit                       disconnect and exit\n  <SQL>                             SELECT/WITH/SHOW run as queries, anything else as an update\n\nEnvironment:\n  ACEQL_CONNECTION_STRING   default connection string\n  ACEQL_OUTPUT=json         print rows as JSON instead of a table\n  RUST_LOG                  log filter (default: info)"
    );
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut connection_string: Option<String> = env::var("ACEQL_CONNECTION_STRING").ok();
    let mut server: Option<String> = None;
    let mut database: Option<String> = None;
    let mut user: Option<String> = None;
    let mut password: Option<String> = None;
    let mut query: Option<String> = None;
    let mut update: Option<String> = None;
    let mut repl = false;

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let takes_value = matches!(
            flag,
            "--connection-string" | "--server" | "--database" | "--user" | "--password" | "--query" | "-q" | "--update" | "-u"
        );
        if takes_value && i + 1 >= args.len() {
            eprintln!("{} requires a value", flag);
            print_usage(&program);
            std::process::exit(2);
        }
        match flag {
            "--connection-string" => connection_string = Some(args[i + 1].clone()),
            "--server" => server = Some(args[i + 1].clone()),
            "--database" => database = Some(args[i + 1].clone()),
            "--user" => user = Some(args[i + 1].clone()),
            "--password" => password = Some(args[i + 1].clone()),
            "--query" | "-q" => query = Some(args[i + 1].clone()),
            "--update" | "-u" => update = Some(args[i + 1].clone()),
            "--repl" => repl = true,
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage(&program);
                std::process::exit(2);
            }
        }
        i += if takes_value { 2 } else { 1 };
    }

    let mut options = match connection_string.as_deref() {
        Some(cs) => ConnectionOptions::parse(cs).context("invalid connection string")?,
        None => ConnectionOptions::builder(),
    };
    if let Some(s) = server { options = options.with_server(s); }
    if let Some(d) = database { options = options.with_database(d); }
    if let Some(u) = user { options = options.with_username(u); }
    if let Some(p) = password { options = options.with_password(p); }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    rt.block_on(async move {
        let conn = AceQLConnection::open_with(options, std::sync::Arc::new(aceql_client::InMemorySessionStore::new()))
            .await
            .context("failed to open AceQL session")?;
        debug!(target: "aceql::cli", "session {} opened", conn.session_id());

        let one_shot = query.is_some() || update.is_some();
        let mut result = Ok(());
        if let Some(sql) = update {
            result = run_update(&conn, &sql).await;
        }
        if result.is_ok() {
            if let Some(sql) = query {
                result = run_query(&conn, &sql).await;
            }
        }
        if result.is_ok() && (repl || !one_shot) {
            result = run_repl(&conn).await;
        }
        conn.close().await;
        result
    })
}

async fn run_query(conn: &AceQLConnection, sql: &str) -> Result<()> {
    let started = Instant::now();
    let mut cmd = conn.create_command(sql);
    let reader = cmd.execute_query().await.context("query failed")?;
    let table = ResultTable::collect(reader, started).await.context("reading result rows failed")?;
    if !print_result_table(&table) {
        if json_output_forced() {
            println!("{}", serde_json::to_string_pretty(&table.to_json())?);
        } else {
            println!("(no rows)");
        }
    }
    Ok(())
}

async fn run_update(conn: &AceQLConnection, sql: &str) -> Result<()> {
    let mut cmd = conn.create_command(sql);
    let count = cmd.execute_update().await.context("update failed")?;
    if json_output_forced() {
        println!("{}", serde_json::json!({ "row_count": count }));
    } else {
        println!("{} row(s) affected", count);
    }
    Ok(())
}

async fn run_repl(conn: &AceQLConnection) -> Result<()> {
    println!("Connected to {} (session {}). Type 'help' for commands.", conn.options().server().unwrap_or_default(), conn.session_id());
    let stdin = io::stdin();
    loop {
        print!("aceql> ");
        io::stdout().flush().ok();
        let mut input = String::new();
        if stdin.read_line(&mut input).context("failed to read stdin")? == 0 {
            break;
        }
        let cmd = match ReplCommand::parse(&input) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {}", e);
                continue;
            }
        };
        let outcome: Result<()> = match cmd {
            ReplCommand::Empty => Ok(()),
            ReplCommand::Quit => break,
            ReplCommand::Help => {
                print_usage("aceql_cli");
                Ok(())
            }
            ReplCommand::Status => {
                println!("session: {}\ntransaction: {:?}", conn.session_id(), conn.transaction_state().await);
                Ok(())
            }
            ReplCommand::Version => conn.get_server_version().await.map(|v| println!("{}", v)).map_err(Into::into),
            ReplCommand::Begin(level) => conn.begin_transaction(level).await.map(|_| println!("transaction started")).map_err(Into::into),
            ReplCommand::Commit => conn.commit().await.map(|_| println!("committed")).map_err(Into::into),
            ReplCommand::Rollback => conn.rollback().await.map(|_| println!("rolled back")).map_err(Into::into),
            ReplCommand::Query(sql) => run_query(conn, &sql).await,
            ReplCommand::Update(sql) => run_update(conn, &sql).await,
        };
        if let Err(e) = outcome {
            error!(target: "aceql::cli", "{:#}", e);
        }
    }
    Ok(())
}
