use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use blood_moon_rewards::config::RewardsConfig;
use blood_moon_rewards::constants::HOST_TICK_MS;
use blood_moon_rewards::event_clock::BloodMoonSchedule;
use blood_moon_rewards::ledger_store::{JsonLedger, PlayerLedger};
use blood_moon_rewards::notify::{Notifier, Outbox};
use blood_moon_rewards::server_utils::{clip_display_name, now_ms, parse_player_ids};
use blood_moon_rewards::service::RewardService;
use blood_moon_rewards::shop::PurchaseRequest;
use blood_moon_rewards::types::PlayerId;
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

type SharedState = Arc<AppState>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Blood moon reward host bridge")]
struct Cli {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,
    #[arg(long, env = "LEDGER_PATH", default_value = ".data/player_data.json")]
    ledger: PathBuf,
    #[arg(long, env = "CONFIG_PATH", default_value = ".data/config.json")]
    config: PathBuf,
}

struct AppState {
    service: RewardService,
    ledger: Arc<JsonLedger>,
    outbox: Arc<Outbox>,
    connected: Mutex<Vec<PlayerId>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KillRequest {
    player_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    party_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuyRequest {
    player_id: String,
    item: usize,
    #[serde(default)]
    amount: Option<u64>,
    #[serde(default)]
    level: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisconnectRequest {
    player_id: String,
}

#[derive(Debug, Deserialize)]
struct PlayersRequest {
    players: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match RewardsConfig::load(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            warn!(%error, "config unusable; every feature disabled");
            RewardsConfig::from_value(&json!({}))
        }
    };

    let ledger = Arc::new(JsonLedger::open(cli.ledger.clone()));
    let state = build_state(config, ledger.clone());
    start_tick_loop(state.clone());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/event", get(event_handler))
        .route("/api/players/{id}", get(player_handler))
        .route("/api/shop", get(shop_handler))
        .route("/api/host/clock", post(clock_handler))
        .route("/api/host/kill", post(kill_handler))
        .route("/api/host/players", post(players_handler))
        .route("/api/host/disconnect", post(disconnect_handler))
        .route("/api/host/buy", post(buy_handler))
        .route("/api/host/outbox", get(outbox_handler))
        .with_state(state);

    let bind_addr = format!("0.0.0.0:{}", cli.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(bind_error) => {
            error!(%bind_error, addr = %bind_addr, "failed to bind server socket");
            return;
        }
    };

    info!(port = cli.port, ledger = %cli.ledger.display(), "listening");
    if let Err(serve_error) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(%serve_error, "server runtime failed");
    }

    if let Err(save_error) = ledger.save() {
        error!(%save_error, "final ledger save failed");
    }
}

fn build_state(config: RewardsConfig, ledger: Arc<JsonLedger>) -> SharedState {
    let outbox = Arc::new(Outbox::default());
    Arc::new(AppState {
        service: RewardService::new(config, ledger.clone(), outbox.clone()),
        ledger,
        outbox,
        connected: Mutex::new(Vec::new()),
    })
}

async fn shutdown_signal() {
    if let Err(signal_error) = tokio::signal::ctrl_c().await {
        warn!(%signal_error, "failed to listen for shutdown signal");
    }
}

fn start_tick_loop(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(HOST_TICK_MS));
        loop {
            interval.tick().await;
            let connected = state.connected.lock().await.clone();
            if let Some(tick) = state.service.on_tick(now_ms(), connected) {
                for (player, granted) in &tick.granted {
                    info!(%player, granted, "online time converted to RP");
                }
            }
        }
    });
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn event_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.service.aggregator().standings())
}

async fn player_handler(
    State(state): State<SharedState>,
    Path(raw_id): Path<String>,
) -> impl IntoResponse {
    let Some(player) = PlayerId::parse(&raw_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "player id must not be blank" })),
        );
    };
    let account = state.ledger.get(&player);
    (StatusCode::OK, Json(json!(account)))
}

async fn shop_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.service.shop().listing())
}

async fn clock_handler(
    State(state): State<SharedState>,
    Json(schedule): Json<BloodMoonSchedule>,
) -> impl IntoResponse {
    let outcome = state.service.on_clock(&schedule);
    Json(json!({
        "transition": outcome.transition,
        "report": outcome.report,
    }))
}

async fn kill_handler(
    State(state): State<SharedState>,
    Json(request): Json<KillRequest>,
) -> impl IntoResponse {
    state.service.on_kill(
        &request.player_id,
        &clip_display_name(&request.name),
        request.party_id,
    );
    StatusCode::NO_CONTENT
}

async fn players_handler(
    State(state): State<SharedState>,
    Json(request): Json<PlayersRequest>,
) -> impl IntoResponse {
    let ids = parse_player_ids(request.players.iter().map(String::as_str));
    let count = ids.len();
    *state.connected.lock().await = ids;
    Json(json!({ "connected": count }))
}

async fn disconnect_handler(
    State(state): State<SharedState>,
    Json(request): Json<DisconnectRequest>,
) -> impl IntoResponse {
    let Some(player) = PlayerId::parse(&request.player_id) else {
        return StatusCode::BAD_REQUEST;
    };
    state
        .connected
        .lock()
        .await
        .retain(|connected| *connected != player);
    state.service.on_disconnect(&player);
    StatusCode::NO_CONTENT
}

async fn buy_handler(
    State(state): State<SharedState>,
    Json(request): Json<BuyRequest>,
) -> impl IntoResponse {
    let Some(player) = PlayerId::parse(&request.player_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "player id must not be blank" })),
        );
    };
    let purchase = PurchaseRequest {
        player: &player,
        item_number: request.item,
        amount: request.amount,
        level: request.level,
    };
    let result = state
        .service
        .shop()
        .buy(state.service.ledger(), purchase, |key, amount| {
            state
                .outbox
                .send_private(&player, &format!("grant {key} {amount}"));
            true
        });
    match result {
        Ok(purchase) => (StatusCode::OK, Json(json!(purchase))),
        Err(shop_error) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": shop_error.to_string() })),
        ),
    }
}

async fn outbox_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.outbox.drain())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kill_request_defaults_party_and_name() {
        let request: KillRequest =
            serde_json::from_str(r#"{"playerId":"EOS_1"}"#).expect("kill request should parse");
        assert_eq!(request.player_id, "EOS_1");
        assert_eq!(request.name, "");
        assert_eq!(request.party_id, 0);
    }

    #[test]
    fn parse_kill_request_with_party() {
        let request: KillRequest =
            serde_json::from_str(r#"{"playerId":"EOS_1","name":"Ann","partyId":12}"#)
                .expect("kill request should parse");
        assert_eq!(request.party_id, 12);
        assert_eq!(request.name, "Ann");
    }

    #[test]
    fn parse_buy_request_without_amount() {
        let request: BuyRequest =
            serde_json::from_str(r#"{"playerId":"EOS_1","item":2,"level":15}"#)
                .expect("buy request should parse");
        assert_eq!(request.item, 2);
        assert_eq!(request.amount, None);
        assert_eq!(request.level, 15);
    }

    #[test]
    fn parse_clock_payload() {
        let schedule: BloodMoonSchedule = serde_json::from_str(
            r#"{"day":7,"hour":22,"bloodMoonDay":7,"duskHour":22,"dawnHour":4}"#,
        )
        .expect("clock payload should parse");
        assert_eq!(schedule.blood_moon_day, 7);
        assert_eq!(schedule.dawn_hour, 4);
    }

    fn night(day: u32, hour: u32) -> BloodMoonSchedule {
        BloodMoonSchedule {
            day,
            hour,
            blood_moon_day: 7,
            dusk_hour: 22,
            dawn_hour: 4,
        }
    }

    fn kill(player_id: &str, name: &str, party_id: i64) -> Json<KillRequest> {
        Json(KillRequest {
            player_id: player_id.to_string(),
            name: name.to_string(),
            party_id,
        })
    }

    #[tokio::test]
    async fn nameless_kills_keep_the_last_known_name() {
        let state = build_state(RewardsConfig::default(), Arc::new(JsonLedger::ephemeral()));
        state.service.on_clock(&night(7, 22));

        for request in [
            kill("EOS_a", "Alice", 1),
            kill("EOS_a", "", 1),
            kill("EOS_b", "   ", 0),
        ] {
            let response = kill_handler(State(state.clone()), request).await.into_response();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        let report = state
            .service
            .on_clock(&night(8, 4))
            .report
            .expect("window closed with a report");
        assert_eq!(
            report.leaderboard,
            vec![
                "Blood Moon ended!",
                "Total Kills",
                "1. Alice - 2 kills",
                "2. EOS_b - 1 kills",
                "Total kills: 3",
                "Party Results",
                "Party 1 (Alice) - 2 kills",
                "Solo (EOS_b) - 1 kills",
            ]
        );
    }

    #[test]
    fn cli_reads_flags() {
        let cli = Cli::parse_from(["server", "--port", "9001", "--ledger", "/tmp/ledger.json"]);
        assert_eq!(cli.port, 9001);
        assert_eq!(cli.ledger, PathBuf::from("/tmp/ledger.json"));
    }
}
