use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use commander_session_server::constants::MAX_PLAYERS;
use commander_session_server::directory::InMemoryDirectory;
use commander_session_server::session::{Session, SessionOptions};
use commander_session_server::sync::{SyncEngine, SyncOptions, Teardown};
use commander_session_server::types::{Player, PlayerId, SessionSnapshot, VitalsDelta};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Synchronized clients sharing the session.
    #[arg(long, default_value_t = 2)]
    clients: usize,
    /// Seats at the table.
    #[arg(long, default_value_t = 4)]
    players: usize,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = 50)]
    window_ms: u64,
    #[arg(long, default_value_t = 500)]
    max_steps: usize,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunConfig {
    clients: usize,
    players: usize,
    seed: u64,
    window_ms: u64,
    max_steps: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary {
    run_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    config: RunConfig,
    steps: usize,
    publish_count: u64,
    eliminations: usize,
    game_ended: bool,
    winner: Option<String>,
    converged: bool,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StructuredLogLine {
    timestamp_ms: u64,
    level: String,
    event: String,
    run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client: Option<usize>,
    details: Value,
}

struct RunOutcome {
    steps: usize,
    publish_count: u64,
    eliminations: usize,
    final_state: SessionSnapshot,
    converged: bool,
    anomalies: Vec<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let started_at_ms = now_ms();
    let config = resolve_config(&cli, started_at_ms);
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(config.seed, started_at_ms));

    emit_log("info", "run_started", &run_id, None, json!(config));
    let outcome = match run_simulation(&config, &run_id).await {
        Ok(outcome) => outcome,
        Err(error) => {
            emit_log(
                "error",
                "run_failed",
                &run_id,
                None,
                json!({ "error": error }),
            );
            std::process::exit(2);
        }
    };
    for anomaly in &outcome.anomalies {
        emit_log(
            "warn",
            "anomaly_detected",
            &run_id,
            None,
            json!({ "message": anomaly }),
        );
    }

    let summary = build_run_summary(run_id.clone(), started_at_ms, now_ms(), config, outcome);
    match serde_json::to_string(&summary) {
        Ok(line) => println!("{line}"),
        Err(error) => eprintln!("[simulate] failed to serialize summary: {error}"),
    }

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &run_id,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "run_finished",
        &run_id,
        None,
        json!({
            "steps": summary.steps,
            "publishCount": summary.publish_count,
            "gameEnded": summary.game_ended,
            "winner": summary.winner,
            "converged": summary.converged,
            "summaryOut": summary_out_written,
        }),
    );

    if !summary.anomalies.is_empty() {
        std::process::exit(1);
    }
}

fn resolve_config(cli: &Cli, started_at_ms: u64) -> RunConfig {
    RunConfig {
        clients: cli.clients.clamp(1, 8),
        players: cli.players.clamp(2, MAX_PLAYERS),
        seed: cli.seed.unwrap_or(started_at_ms),
        window_ms: cli.window_ms.clamp(1, 5_000),
        max_steps: cli.max_steps.clamp(1, 100_000),
    }
}

async fn run_simulation(config: &RunConfig, run_id: &str) -> Result<RunOutcome, String> {
    let window = Duration::from_millis(config.window_ms);
    let options = SyncOptions {
        publish_window: window,
        teardown: Teardown::Flush,
    };
    let directory = Arc::new(InMemoryDirectory::default());

    let mut table = Session::new(SessionOptions::default());
    for _ in 0..config.players {
        table.add_player();
    }
    let host = SyncEngine::host(directory.clone(), "client-0", table, options, None)
        .await
        .map_err(|error| error.to_string())?;
    let session_id = host.session_id().to_string();
    emit_log(
        "info",
        "session_hosted",
        run_id,
        Some(0),
        json!({ "sessionId": session_id }),
    );

    let mut clients = vec![host];
    for index in 1..config.clients {
        let participant = format!("client-{index}");
        let engine = SyncEngine::join(
            directory.clone(),
            &session_id,
            &participant,
            Session::default(),
            options,
            None,
        )
        .await
        .map_err(|error| error.to_string())?;
        emit_log("info", "client_joined", run_id, Some(index), json!({}));
        clients.push(engine);
    }
    tokio::time::sleep(window * 3).await;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut steps = 0usize;
    let mut eliminations = 0usize;
    while steps < config.max_steps {
        let client_index = rng.random_range(0..clients.len());
        let client = &clients[client_index];
        let view = client.snapshot().await;
        if view.game_ended {
            break;
        }
        let Some(target) = pick_target(&mut rng, &view.players) else {
            break;
        };
        let delta = pick_delta(&mut rng);
        steps += 1;
        if client.apply_vitals_delta(target, delta).await {
            let after = client.snapshot().await;
            if let Some(player) = after.players.iter().find(|player| player.id == target) {
                if player.is_dead {
                    eliminations += 1;
                    emit_log(
                        "info",
                        "player_eliminated",
                        run_id,
                        Some(client_index),
                        json!({ "player": player.name, "step": steps }),
                    );
                }
            }
        }
        let pause = rng.random_range(0..=config.window_ms.saturating_mul(2));
        tokio::time::sleep(Duration::from_millis(pause)).await;
    }

    for client in &clients {
        client.flush().await;
    }
    tokio::time::sleep(window * 3).await;

    let document = directory.document(&session_id).await.unwrap_or_default();
    let mut views = Vec::with_capacity(clients.len());
    for client in &clients {
        views.push(client.snapshot().await);
    }
    let publish_count = directory.publish_count(&session_id).await;
    for client in clients {
        client.disconnect().await;
    }

    let anomalies = collect_anomalies(&document, &views);
    Ok(RunOutcome {
        steps,
        publish_count,
        eliminations,
        converged: views.iter().all(|view| *view == document),
        final_state: document,
        anomalies,
    })
}

fn pick_target(rng: &mut StdRng, players: &[Player]) -> Option<PlayerId> {
    let alive: Vec<PlayerId> = players
        .iter()
        .filter(|player| !player.is_dead)
        .map(|player| player.id)
        .collect();
    if alive.is_empty() {
        return None;
    }
    Some(alive[rng.random_range(0..alive.len())])
}

fn pick_delta(rng: &mut StdRng) -> VitalsDelta {
    match rng.random_range(0..100) {
        0..=64 => VitalsDelta::Life(-rng.random_range(1..=10)),
        65..=74 => VitalsDelta::Life(rng.random_range(1..=5)),
        75..=94 => VitalsDelta::CommanderDamage(rng.random_range(1..=7)),
        _ => VitalsDelta::Poison(rng.random_range(1..=3)),
    }
}

fn collect_anomalies(document: &SessionSnapshot, views: &[SessionSnapshot]) -> Vec<String> {
    let mut anomalies = Vec::new();
    for (index, view) in views.iter().enumerate() {
        if view != document {
            anomalies.push(format!("client {index} diverged from the shared document"));
        }
    }
    for player in &document.players {
        if player.life < 0 || player.commander_damage < 0 || player.poison_counters < 0 {
            anomalies.push(format!("{} has negative vitals", player.name));
        }
    }
    let crowns = document
        .players
        .iter()
        .filter(|player| player.has_crown)
        .count();
    if document.game_ended && crowns != 1 {
        anomalies.push(format!("game ended with {crowns} crowned players"));
    }
    if !document.game_ended && crowns != 0 {
        anomalies.push("crown awarded in a running game".to_string());
    }
    anomalies
}

fn default_run_id(seed: u64, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    run_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    config: RunConfig,
    outcome: RunOutcome,
) -> RunSummary {
    let winner = outcome
        .final_state
        .players
        .iter()
        .find(|player| player.has_crown)
        .map(|player| player.name.clone());
    RunSummary {
        run_id,
        started_at_ms,
        finished_at_ms,
        config,
        steps: outcome.steps,
        publish_count: outcome.publish_count,
        eliminations: outcome.eliminations,
        game_ended: outcome.final_state.game_ended,
        winner,
        converged: outcome.converged,
        anomalies: outcome.anomalies,
    }
}

fn emit_log(level: &str, event: &str, run_id: &str, client: Option<usize>, details: Value) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        run_id: run_id.to_string(),
        client,
        details,
    };
    if let Ok(line) = serde_json::to_string(&log_line) {
        eprintln!("{line}");
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}
