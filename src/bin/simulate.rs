use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use blood_moon_rewards::config::RewardsConfig;
use blood_moon_rewards::event_clock::BloodMoonSchedule;
use blood_moon_rewards::ledger_store::{JsonLedger, PlayerLedger};
use blood_moon_rewards::notify::Outbox;
use blood_moon_rewards::server_utils::now_ms;
use blood_moon_rewards::service::RewardService;
use blood_moon_rewards::types::PlayerId;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};

const BLOOD_MOON_DAY: u32 = 7;
const DUSK_HOUR: u32 = 22;
const DAWN_HOUR: u32 = 4;
const NIGHT_HOURS: u32 = 6;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replays a synthetic blood moon night")]
struct Cli {
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = 6)]
    players: usize,
    #[arg(long, default_value_t = 40)]
    kills: usize,
    #[arg(long, default_value_t = 2)]
    parties: usize,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug)]
struct Night {
    seed: u64,
    players: usize,
    kills: usize,
    parties: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AwardLine {
    player_id: PlayerId,
    amount: u64,
    reasons: Vec<String>,
    balance: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NightSummary {
    run_id: String,
    seed: u64,
    players: usize,
    total_kills: u64,
    total_rp: u64,
    leaderboard: Vec<String>,
    awards: Vec<AwardLine>,
    errors: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StructuredLogLine {
    timestamp_ms: u64,
    level: String,
    event: String,
    run_id: String,
    details: Value,
}

fn main() {
    let cli = Cli::parse();
    let night = resolve_night(&cli);
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(night.seed, now_ms()));

    emit_log(
        "info",
        "night_started",
        &run_id,
        json!({
            "seed": night.seed,
            "players": night.players,
            "kills": night.kills,
            "parties": night.parties,
        }),
    );

    let summary = run_night(&night, run_id.clone());
    for error in &summary.errors {
        emit_log("warn", "reward_failed", &run_id, json!({ "error": error }));
    }

    println!(
        "{}",
        json!({ "event": "leaderboard", "lines": summary.leaderboard })
    );
    for award in &summary.awards {
        println!("{}", json!({ "event": "award", "award": award }));
    }

    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &run_id,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
    }

    emit_log(
        "info",
        "night_finished",
        &run_id,
        json!({
            "totalKills": summary.total_kills,
            "totalRp": summary.total_rp,
            "awarded": summary.awards.len(),
        }),
    );
}

fn resolve_night(cli: &Cli) -> Night {
    Night {
        seed: cli.seed.unwrap_or_else(rand::random::<u64>),
        players: cli.players.clamp(1, 64),
        kills: cli.kills.min(10_000),
        parties: cli.parties.min(cli.players),
    }
}

/// Players with index `i % (parties + 1) == 0` play solo; the rest share a
/// party numbered from 1.
fn party_of(index: usize, parties: usize) -> i64 {
    (index % (parties + 1)) as i64
}

fn at(day: u32, hour: u32) -> BloodMoonSchedule {
    BloodMoonSchedule {
        day,
        hour,
        blood_moon_day: BLOOD_MOON_DAY,
        dusk_hour: DUSK_HOUR,
        dawn_hour: DAWN_HOUR,
    }
}

fn run_night(night: &Night, run_id: String) -> NightSummary {
    let mut rng = StdRng::seed_from_u64(night.seed);
    let ledger = Arc::new(JsonLedger::ephemeral());
    let outbox = Arc::new(Outbox::default());
    let config = RewardsConfig::default();
    let tick_ms = config.accrual.tick_seconds().saturating_mul(1_000);
    let service = RewardService::new(config, ledger.clone(), outbox.clone());

    let roster: Vec<(PlayerId, String, i64)> = (0..night.players)
        .filter_map(|index| {
            let id = PlayerId::parse(&format!("sim_{index}"))?;
            Some((id, format!("Survivor{index}"), party_of(index, night.parties)))
        })
        .collect();
    let everyone: Vec<PlayerId> = roster.iter().map(|(id, _, _)| id.clone()).collect();

    let mut now = 0u64;
    service.on_tick(now, everyone.clone());
    service.on_clock(&at(BLOOD_MOON_DAY, DUSK_HOUR - 1));
    service.on_clock(&at(BLOOD_MOON_DAY, DUSK_HOUR));

    // The last hour is the dawn close below.
    let kills_per_hour = night.kills.div_ceil(NIGHT_HOURS as usize - 1).max(1);
    let mut remaining = night.kills;
    for hour in 1..NIGHT_HOURS {
        let online: Vec<PlayerId> = everyone
            .iter()
            .filter(|_| rng.random_bool(0.85))
            .cloned()
            .collect();
        for _ in 0..kills_per_hour.min(remaining) {
            if roster.is_empty() {
                break;
            }
            let (id, name, party) = &roster[rng.random_range(0..roster.len())];
            service.on_kill(id.as_str(), name, *party);
            remaining -= 1;
        }
        now += tick_ms;
        service.on_tick(now, online);

        let clock_hour = (DUSK_HOUR + hour) % 24;
        let day = if DUSK_HOUR + hour >= 24 {
            BLOOD_MOON_DAY + 1
        } else {
            BLOOD_MOON_DAY
        };
        service.on_clock(&at(day, clock_hour));
    }

    let report = service.on_clock(&at(BLOOD_MOON_DAY + 1, DAWN_HOUR)).report;
    let (leaderboard, awards, errors, total_kills, total_rp) = match report {
        Some(report) => {
            let awards = report
                .awarded
                .iter()
                .map(|award| AwardLine {
                    player_id: award.player_id.clone(),
                    amount: award.amount,
                    reasons: award.reasons.clone(),
                    balance: ledger.balance(&award.player_id),
                })
                .collect();
            (
                report.leaderboard,
                awards,
                report.errors.iter().map(ToString::to_string).collect(),
                report.snapshot.total_kills(),
                report.plan.total(),
            )
        }
        None => (Vec::new(), Vec::new(), Vec::new(), 0, 0),
    };

    NightSummary {
        run_id,
        seed: night.seed,
        players: roster.len(),
        total_kills,
        total_rp,
        leaderboard,
        awards,
        errors,
    }
}

fn default_run_id(seed: u64, timestamp_ms: u64) -> String {
    format!("night-{seed}-{timestamp_ms}")
}

fn emit_log(level: &str, event: &str, run_id: &str, details: Value) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        run_id: run_id.to_string(),
        details,
    };
    match serde_json::to_string(&log_line) {
        Ok(text) => eprintln!("{text}"),
        Err(error) => eprintln!("structured log failed: {error}"),
    }
}

fn write_summary(path: &Path, summary: &NightSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}
