use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::db::Database;
use crate::error::{MissionError, RoomError, StoreError};
use crate::game::{self, GameRoom, MissionView};
use crate::mission::{GameEvent, MissionId, SyncMessage};
use crate::protocol::{self, ServerMessage};

// ============================================================================
// App State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub room: Arc<GameRoom>,
    pub db: Arc<Database>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Room(e @ RoomError::UnknownPlayer(_))
            | ApiError::Room(e @ RoomError::Mission(MissionError::UnknownMission(_))) => {
                (StatusCode::NOT_FOUND, game::error_code(e))
            }
            ApiError::Room(e) => (StatusCode::CONFLICT, game::error_code(e)),
            ApiError::Store(e) => {
                error!("Store error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "store_error")
            }
        };

        (
            status,
            Json(serde_json::json!({
                "error": self.to_string(),
                "code": code,
            })),
        )
            .into_response()
    }
}

/// Bring a player into the room from their saved records if needed
async fn ensure_joined(state: &AppState, player_id: &str) -> Result<(), ApiError> {
    if state.room.is_joined(player_id) {
        return Ok(());
    }
    let records = state.db.load_mission_records(player_id).await?;
    state.room.join(player_id, &records);
    Ok(())
}

// ============================================================================
// HTTP Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "players": state.room.player_count(),
        "missions": state.room.registry().len(),
        "tick": state.room.current_tick(),
        "timestamp": chrono::Utc::now().timestamp_millis()
    }))
}

async fn list_missions(
    Path(player_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<MissionView>>, ApiError> {
    ensure_joined(&state, &player_id).await?;
    Ok(Json(state.room.mission_views(&player_id)?))
}

async fn start_mission(
    Path((player_id, mission_id)): Path<(String, u32)>,
    State(state): State<AppState>,
) -> Result<Json<MissionView>, ApiError> {
    ensure_joined(&state, &player_id).await?;
    let id = MissionId(mission_id);
    state.room.start_mission(&player_id, id)?;
    Ok(Json(state.room.mission_view(&player_id, id)?))
}

async fn abandon_mission(
    Path((player_id, mission_id)): Path<(String, u32)>,
    State(state): State<AppState>,
) -> Result<Json<MissionView>, ApiError> {
    ensure_joined(&state, &player_id).await?;
    let id = MissionId(mission_id);
    state.room.abandon_mission(&player_id, id)?;
    Ok(Json(state.room.mission_view(&player_id, id)?))
}

async fn unlock_mission(
    Path((player_id, mission_id)): Path<(String, u32)>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ensure_joined(&state, &player_id).await?;
    let id = MissionId(mission_id);
    let changed = state.room.unlock_mission(&player_id, id)?;
    Ok(Json(serde_json::json!({
        "mission_id": id,
        "unlocked": changed,
    })))
}

async fn post_event(
    Path(player_id): Path<String>,
    State(state): State<AppState>,
    Json(event): Json<GameEvent>,
) -> Result<StatusCode, ApiError> {
    ensure_joined(&state, &player_id).await?;
    state.room.queue_event(&player_id, event);
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct AssignProviderRequest {
    npc_id: String,
    mission_id: MissionId,
}

async fn assign_provider(
    Path(player_id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<AssignProviderRequest>,
) -> Result<StatusCode, ApiError> {
    ensure_joined(&state, &player_id).await?;
    state.room.assign_provider(&player_id, &req.npc_id, req.mission_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// WebSocket Handler
// ============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(player_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if let Err(e) = ensure_joined(&state, &player_id).await {
        return e.into_response();
    }

    info!("WebSocket upgrade for {} from {}", player_id, addr);
    ws.on_upgrade(move |socket| handle_socket(socket, state, player_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, player_id: String) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing falls between the two
    let mut broadcast_rx = state.room.subscribe();

    let mut initial = vec![ServerMessage::Welcome {
        player_id: player_id.clone(),
    }];
    match state.room.records(&player_id) {
        Ok(records) => initial.extend(records.into_iter().map(|record| ServerMessage::MissionSync {
            message: SyncMessage::mission_progress(&player_id, record),
        })),
        Err(e) => warn!("No mission snapshot for {}: {}", player_id, e),
    }
    for msg in &initial {
        if let Ok(bytes) = protocol::encode_server_message(msg) {
            let _ = sender.send(Message::Binary(bytes)).await;
        }
    }

    // Forward this player's messages to the socket
    let target = player_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(outbound) if outbound.player_id == target => {
                    match protocol::encode_server_message(&outbound.message) {
                        Ok(bytes) => {
                            if sender.send(Message::Binary(bytes)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to encode {}: {}", outbound.message.msg_type(), e),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Connection for {} lagged, {} messages skipped", target, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Handle incoming messages
    let room = Arc::clone(&state.room);
    let sender_id = player_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Binary(data) => match protocol::decode_client_message(&data) {
                    Ok(message) => room.handle_client_message(&sender_id, message),
                    Err(e) => warn!("Error decoding message from {}: {}", sender_id, e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("Player {} disconnected", player_id);
    if let Some((records, experience)) = state.room.leave(&player_id) {
        if let Err(e) = state.db.save_player(&player_id, &records, experience).await {
            error!("Failed to save missions for {} on disconnect: {}", player_id, e);
            // Keep the state in the room so the auto-save retries it
            state.room.readmit(&player_id, &records, experience);
        } else {
            info!("Saved {} missions for {} on disconnect", records.len(), player_id);
        }
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Missions
        .route("/api/players/:player_id/missions", get(list_missions))
        .route("/api/players/:player_id/missions/:mission_id/start", post(start_mission))
        .route("/api/players/:player_id/missions/:mission_id/abandon", post(abandon_mission))
        .route("/api/players/:player_id/missions/:mission_id/unlock", post(unlock_mission))
        // Gameplay input
        .route("/api/players/:player_id/events", post(post_event))
        .route("/api/players/:player_id/providers", post(assign_provider))
        // WebSocket
        .route("/ws/:player_id", get(ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([axum::http::header::CONTENT_TYPE]),
        )
        .with_state(state)
}
