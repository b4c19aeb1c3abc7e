//! spendsense-runner: headless driver for the SpendSense decision core.
//!
//! Usage:
//!   spendsense-runner --data-dir ./data --db users.db --user U1 --window 30
//!   spendsense-runner --db users.db --import user.json --opt-in
//!   spendsense-runner --data-dir ./data --db users.db --ipc-mode

use anyhow::Result;
use chrono::NaiveDate;
use spendsense_core::{
    model::{ConsentStatus, UserData},
    store::DecisionStore,
    DecisionConfig, DecisionEngine, PipelineError,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Summary {
        user_id: String,
        reference_date: NaiveDate,
    },
    Persona {
        user_id: String,
        window_days: u32,
        reference_date: NaiveDate,
    },
    Recommend {
        user_id: String,
        window_days: u32,
        reference_date: NaiveDate,
        #[serde(default)]
        force_generate: bool,
    },
    Reload,
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let data_dir = arg_value(&args, "--data-dir").unwrap_or("./data");
    let db = arg_value(&args, "--db").unwrap_or(":memory:");
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let force = args.iter().any(|a| a == "--force");
    let window = parse_arg(&args, "--window", 30u32);
    let reference_date = match arg_value(&args, "--reference-date") {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| anyhow::anyhow!("invalid --reference-date '{raw}': {e}"))?,
        None => chrono::Utc::now().date_naive(),
    };

    let store = Arc::new(DecisionStore::open(db)?);
    store.migrate()?;

    if let Some(path) = arg_value(&args, "--import") {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let data: UserData = serde_json::from_str(&content)?;
        store.insert_user_data(&data)?;
        if args.iter().any(|a| a == "--opt-in") {
            store.set_consent(data.user_id(), ConsentStatus::OptedIn)?;
        }
        log::info!("imported user {} from {path}", data.user_id());
    }

    let config = DecisionConfig::load(data_dir)?;
    let engine = DecisionEngine::new(config, store.clone(), store.clone(), store.clone())?;

    if ipc_mode {
        return run_ipc_loop(&engine, data_dir);
    }

    let Some(user_id) = arg_value(&args, "--user") else {
        if arg_value(&args, "--import").is_none() {
            eprintln!("nothing to do: pass --user, --import or --ipc-mode");
        }
        return Ok(());
    };

    println!("SpendSense — spendsense-runner");
    println!("  user:            {user_id}");
    println!("  window:          {window}d");
    println!("  reference date:  {reference_date}");
    println!("  data_dir:        {data_dir}");
    println!("  db:              {db}");
    println!();

    match run_once(&engine, user_id, window, reference_date, force) {
        Ok(()) => Ok(()),
        Err(e) => {
            println!("{}", e.user_message());
            Err(e.into())
        }
    }
}

fn run_once(
    engine: &DecisionEngine,
    user_id: &str,
    window: u32,
    reference_date: NaiveDate,
    force: bool,
) -> Result<(), PipelineError> {
    let pair = engine.behavioral_summary(user_id, reference_date)?;
    println!("── Behavioral summary ──");
    println!("{}", serde_json::to_string_pretty(&pair)?);

    // The persona shown is the one `recommend` assigned and audited.
    let response = engine.recommend(user_id, window, reference_date, force)?;
    println!("── Persona ──");
    println!("  {} ({})", response.persona_name, response.persona_id);
    println!("  {}", response.persona_description);

    println!("── Recommendations ──");
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_ipc_loop(engine: &DecisionEngine, data_dir: &str) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Reload => DecisionConfig::load(data_dir)
                .map_err(PipelineError::from)
                .and_then(|config| engine.reload(config))
                .map(|()| serde_json::json!({ "reloaded": true })),
            IpcCommand::Summary { user_id, reference_date } => engine
                .behavioral_summary(&user_id, reference_date)
                .and_then(|v| Ok(serde_json::to_value(v)?)),
            IpcCommand::Persona { user_id, window_days, reference_date } => engine
                .assign_persona(&user_id, window_days, reference_date)
                .and_then(|v| Ok(serde_json::to_value(v)?)),
            IpcCommand::Recommend { user_id, window_days, reference_date, force_generate } => engine
                .recommend(&user_id, window_days, reference_date, force_generate)
                .and_then(|v| Ok(serde_json::to_value(v)?)),
        };

        let out = match reply {
            Ok(value) => value,
            Err(e) => serde_json::json!({
                "error": e.to_string(),
                "message": e.user_message(),
                "retryable": e.is_retryable(),
            }),
        };
        writeln!(stdout, "{out}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    arg_value(args, flag)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> Arc<DecisionStore> {
        let store = DecisionStore::in_memory().unwrap();
        store.migrate().unwrap();
        let user: UserData = serde_json::from_value(serde_json::json!({
            "profile": { "user_id": "u1", "history_start": "2024-01-01" },
            "accounts": [{
                "account_id": "chk",
                "account_type": "depository",
                "subtype": "checking",
                "balance_current": 1500.0
            }]
        }))
        .unwrap();
        store.insert_user_data(&user).unwrap();
        store.set_consent("u1", ConsentStatus::OptedIn).unwrap();
        Arc::new(store)
    }

    #[test]
    fn one_shot_run_audits_a_single_assignment() {
        let store = seeded_store();
        let engine = DecisionEngine::new(
            DecisionConfig::default_test(),
            store.clone(),
            store.clone(),
            store.clone(),
        )
        .unwrap();
        let reference_date = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();

        run_once(&engine, "u1", 30, reference_date, false).unwrap();

        assert_eq!(store.assignment_audit_for_user("u1").unwrap().len(), 1);
    }
}
