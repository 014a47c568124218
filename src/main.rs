//! querymux - A query session multiplexer for SQL workbench frontends.
//!
//! The binary is a thin driver around the library: it opens one session,
//! runs one query, and prints the event stream that a frontend would
//! otherwise consume.

mod cli;

use cli::{Cli, OutputFormat};
use querymux::config::{Config, ConnectionConfig};
use querymux::credentials::{connection_password_id, CredentialStore, KeyringStore};
use querymux::error::{QueryMuxError, Result};
use querymux::events::{QueryEvent, RowPage};
use querymux::runner::{self, MockRunner, QueryInput, QueryRunner, RunSpec};
use querymux::session::SessionManager;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Load .env if present, then initialize logging
    dotenvy::dotenv().ok();
    querymux::logging::init_stderr_logging();

    if let Err(e) = run().await {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse_args();
    let output = cli.parse_output_format()?;
    let sql = cli.resolve_sql()?;

    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    let (runner, label): (Arc<dyn QueryRunner>, String) = if cli.mock {
        (Arc::new(MockRunner::new()), "mock".to_string())
    } else {
        let connection = resolve_connection(&cli, &config).await?.ok_or_else(|| {
            QueryMuxError::config(
                "No database connection configured. Use --help for usage information.",
            )
        })?;
        info!("Connection: {}", connection.display_string());
        let runner = runner::connect(&connection, config.workbench.runner_settings()).await?;
        (runner, connection.display_string())
    };

    let manager = SessionManager::new();
    let session = manager.open_session(label, runner);
    let mut subscription = manager.subscribe_session(session)?;
    manager.mark_sink_ready(session)?;

    manager.run_query(session, RunSpec::new(QueryInput::Text(sql)))?;

    while let Some(event) = subscription.events.recv().await {
        match output {
            OutputFormat::Json => {
                let json = serde_json::to_string(&event)
                    .map_err(|e| QueryMuxError::internal(format!("Serialization failed: {e}")))?;
                println!("{json}");
            }
            OutputFormat::Text => print_event_text(&manager, session, &event).await?,
        }
        if matches!(event, QueryEvent::Completed { .. }) {
            break;
        }
    }

    manager.close_session(session).await?;
    Ok(())
}

async fn print_event_text(
    manager: &Arc<SessionManager>,
    session: querymux::session::SessionId,
    event: &QueryEvent,
) -> Result<()> {
    match event {
        QueryEvent::Message(message) => println!("{}", message.text),
        QueryEvent::ResultSet(summary) => {
            let header: Vec<&str> = summary.columns.iter().map(|c| c.name.as_str()).collect();
            println!("{}", header.join("\t"));

            let subset = manager
                .query_rows(
                    session,
                    RowPage {
                        batch_id: summary.batch_id,
                        result_id: summary.result_id,
                        row_start: 0,
                        row_count: summary.row_count,
                    },
                )
                .await?;
            for row in &subset.rows {
                let cells: Vec<String> = row.iter().map(|v| v.to_display_string()).collect();
                println!("{}", cells.join("\t"));
            }
        }
        QueryEvent::Completed { elapsed } => {
            println!("Done in {:.3}s", elapsed.as_secs_f64());
        }
        QueryEvent::Started | QueryEvent::EditSessionReady { .. } => {}
    }
    Ok(())
}

/// Resolves the final connection configuration from CLI args, config file,
/// and environment, looking up a stored password when none was given.
async fn resolve_connection(cli: &Cli, config: &Config) -> Result<Option<ConnectionConfig>> {
    // Start with CLI connection config if provided
    let mut connection = cli.to_connection_config()?;

    // If no CLI connection, try named connection from config
    if connection.is_none() {
        if let Some(name) = cli.connection_name() {
            connection = config.get_connection(Some(name)).cloned();
            if connection.is_none() {
                return Err(QueryMuxError::config(format!(
                    "Connection '{name}' not found in config file"
                )));
            }
        }
    }

    // If still no connection, try default from config
    if connection.is_none() {
        connection = config.get_connection(None).cloned();
    }

    // Apply environment variable defaults
    if let Some(ref mut conn) = connection {
        conn.apply_env_defaults();

        if conn.password.is_none() {
            let name = cli.connection_name().unwrap_or("default");
            if let Some(password) = lookup_password(&config.credentials.service, name).await {
                conn.password = Some(password);
            }
        }
    }

    Ok(connection)
}

/// Reads a stored connection password from the OS keyring.
async fn lookup_password(service: &str, connection_name: &str) -> Option<String> {
    let store = KeyringStore::new(service);
    if !store.is_available() {
        return None;
    }

    let credential_id = connection_password_id(connection_name);
    store
        .read(&credential_id)
        .await
        .ok()
        .flatten()
        .map(|credential| credential.password)
}
