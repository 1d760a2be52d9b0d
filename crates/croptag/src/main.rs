//! `croptag` - CLI for RFID bag registration
//!
//! This binary runs scan sessions on the terminal, registers batches with the
//! marketplace backend, and queries the local registration log.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use croptag::cli::{
    Cli, Command, ConfigCommand, HistoryCommand, NormalizeCommand, RegisterCommand, ScanCommand,
    TraceCommand,
};
use croptag::console::{parse_line, ConsoleView};
use croptag::registration::{Receipt, RegistrationRequest};
use croptag::{
    init_logging, normalize, CommitOutcome, Config, Epc, Error, ExitReason, HttpBackend,
    InputEvent, RegistrationForm, ScanController, ScanSession, ScanSettings, Storage,
    SubmitError, Submitter, EPC_LEN,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // `config validate` reports problems instead of failing on them
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        return handle_validate(file.clone().or_else(|| cli.config.clone()));
    }

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Scan(cmd) => handle_scan(&config, cmd).await,
        Command::Register(cmd) => handle_register(&config, cmd).await,
        Command::Normalize(cmd) => {
            handle_normalize(&cmd);
            Ok(())
        }
        Command::History(cmd) => handle_history(&config, &cmd),
        Command::Trace(cmd) => handle_trace(&config, &cmd),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

async fn handle_scan(config: &Config, cmd: ScanCommand) -> anyhow::Result<()> {
    let mut form = RegistrationForm::from(cmd.form);
    let operator = config.operator();
    let submitter = Submitter::new(HttpBackend::from_config(&config.backend)?);
    let log = open_log(config);

    let session = ScanSession::open(form.expected_count().unwrap_or(0), config.scan_settings());
    let mut controller = ScanController::new(session, ConsoleView::stdout());
    let mut events = spawn_stdin_reader();

    println!("Scan tags now. Type :help for commands.");
    controller.render();

    loop {
        if controller.run(&mut events).await == ExitReason::Closed {
            info!(bags = controller.session().len(), "Scan session closed without registering");
            return Ok(());
        }

        let expected = controller.session().expected_count();
        if form.expected_count().is_some() || expected > 0 {
            form.total_bags = expected.to_string();
        }

        let request = match form.validate(&operator, controller.session()) {
            Ok(request) => request,
            Err(e) => {
                controller.notify(&SubmitError::from(e).notice());
                continue;
            }
        };

        let result = controller.submit(&submitter, &request, &mut events).await;
        journal(log.as_ref(), config, &request, &result);

        match result {
            Ok(receipt) => {
                controller.notify(&receipt.notice());
                return Ok(());
            }
            Err(e) => {
                // The session stays open so the operator can fix and resubmit.
                controller.notify(&e.notice());
                controller.render();
            }
        }
    }
}

async fn handle_register(config: &Config, cmd: RegisterCommand) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&cmd.file)
        .with_context(|| format!("failed to read {}", cmd.file.display()))?;

    let form = RegistrationForm::from(cmd.form);
    let settings = ScanSettings {
        duplicate_window: Duration::ZERO,
        ..config.scan_settings()
    };
    let mut session = ScanSession::open(form.expected_count().unwrap_or(0), settings);

    let now = Instant::now();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let epc = Epc::parse(&normalize(line))
            .map_err(|e| Error::invalid_epc(line, e))
            .with_context(|| format!("{}:{}", cmd.file.display(), line_no + 1))?;

        if let CommitOutcome::Rejected(rejection) = session.admit(epc, now) {
            let reason = rejection.message().unwrap_or_default();
            warn!(line = line_no + 1, "Skipped tag: {}", reason);
        }
    }

    let request = form
        .validate(&config.operator(), &session)
        .map_err(SubmitError::from)?;
    let submitter = Submitter::new(HttpBackend::from_config(&config.backend)?);
    let result = submitter.send(&request).await;
    journal(open_log(config).as_ref(), config, &request, &result);

    match result {
        Ok(Receipt { message, bags }) => {
            println!("{message} ({bags} bags)");
            Ok(())
        }
        Err(e) => bail!(e),
    }
}

fn handle_normalize(cmd: &NormalizeCommand) {
    for input in &cmd.inputs {
        let normalized = normalize(input);
        match Epc::from_normalized(&normalized) {
            Some(epc) => println!("{epc}  complete"),
            None => println!(
                "{normalized}  incomplete ({}/{EPC_LEN})",
                normalized.len()
            ),
        }
    }
}

fn handle_history(config: &Config, cmd: &HistoryCommand) -> anyhow::Result<()> {
    let Some(storage) = open_existing_log(config)? else {
        println!("No registrations recorded.");
        return Ok(());
    };
    let records = storage.recent(cmd.limit)?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let stats = storage.stats()?;
    println!(
        "{} registrations logged, {} accepted ({} bags)",
        stats.total_registrations, stats.accepted_registrations, stats.registered_bags
    );
    println!();
    for record in &records {
        println!(
            "{:>5}  {}  {:<9} {:<12} {:>4} bags  {}",
            record.id.unwrap_or_default(),
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.status.to_string(),
            record.crop_id,
            record.epc_count(),
            &record.batch_hash[..12.min(record.batch_hash.len())]
        );
    }
    Ok(())
}

fn handle_trace(config: &Config, cmd: &TraceCommand) -> anyhow::Result<()> {
    let epc = Epc::parse(&normalize(&cmd.epc)).map_err(|e| Error::invalid_epc(&cmd.epc, e))?;

    let Some(storage) = open_existing_log(config)? else {
        println!("No registrations recorded.");
        return Ok(());
    };

    let records = storage.find_by_epc(&epc, cmd.limit)?;
    if records.is_empty() {
        println!("{epc} does not appear in the registration log.");
        return Ok(());
    }

    println!("{epc} appears in {} registration(s):", records.len());
    for record in &records {
        let position = record.epcs.iter().position(|e| e == &epc).map_or(0, |p| p + 1);
        println!(
            "  #{} {} crop {} ({}), bag {} of {}, {}",
            record.id.unwrap_or_default(),
            record.timestamp.format("%Y-%m-%d %H:%M"),
            record.crop_id,
            record.crop_name.as_deref().unwrap_or("-"),
            position,
            record.epc_count(),
            record.status
        );
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Scanner]");
                println!("  Debounce (ms):         {}", config.scanner.debounce_ms);
                println!("  Echo window (ms):      {}", config.scanner.duplicate_window_ms);
                println!();
                println!("[Backend]");
                println!("  Base URL:              {}", config.backend.base_url);
                println!("  Register path:         {}", config.backend.register_path);
                println!("  Timeout (s):           {}", config.backend.timeout_secs);
                println!();
                println!("[Operator]");
                println!(
                    "  User id:               {}",
                    config.operator.user_id.as_deref().unwrap_or("(none)")
                );
                println!(
                    "  Session id:            {}",
                    config.operator.session_id.as_deref().unwrap_or("(generated)")
                );
                println!();
                println!("[Storage]");
                println!("  Enabled:               {}", config.storage.enabled);
                println!("  Database path:         {}", config.database_path().display());
                println!("  Max records:           {}", config.storage.max_records);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            return handle_validate(file);
        }
    }
    Ok(())
}

fn handle_validate(file: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    match Config::load_from(Some(path)) {
        Ok(_) => println!("Configuration is valid."),
        Err(e) => println!("Configuration error: {e}"),
    }
    Ok(())
}

/// Feed stdin lines to the scan controller.
///
/// The channel closes at end of input, which the controller treats as a
/// close.
fn spawn_stdin_reader() -> mpsc::Receiver<InputEvent> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(events) => {
                        for event in events {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => println!("{e}"),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read input");
                    break;
                }
            }
        }
    });
    rx
}

/// Open the registration log for writing. Failures only disable logging.
fn open_log(config: &Config) -> Option<Storage> {
    if !config.storage.enabled {
        return None;
    }
    match Storage::open(config.database_path()) {
        Ok(storage) => Some(storage),
        Err(e) => {
            warn!(error = %e, "Registration log unavailable, continuing without it");
            None
        }
    }
}

/// Open the registration log for reading, `None` if nothing was logged yet.
fn open_existing_log(config: &Config) -> anyhow::Result<Option<Storage>> {
    let path = config.database_path();
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(Storage::open(path)?))
}

fn journal(
    log: Option<&Storage>,
    config: &Config,
    request: &RegistrationRequest,
    result: &Result<Receipt, SubmitError>,
) {
    if let Some(storage) = log {
        if let Err(e) = storage.log_attempt(request, result, config.storage.max_records) {
            warn!(error = %e, "Failed to record registration");
        }
    }
}
