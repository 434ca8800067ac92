//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{PhysicsEngine, PlayerInput};
use crate::matchmaking::manager::MatchHandle;
use crate::platform::client::SessionInfo;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Platform session token
    pub token: String,
}

/// WebSocket upgrade handler. The session is verified against the platform
/// before upgrading; a collaborator failure is treated as a failed
/// authentication, never as a server fault.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    match state.platform.verify_session(&query.token).await {
        Ok(Some(session)) => {
            info!(player_id = %session.player_id, "WebSocket upgrade for verified session");
            ws.on_upgrade(move |socket| handle_socket(socket, session, state))
        }
        Ok(None) => unauthorized(),
        Err(e) => {
            error!(error = %e, "Session verification unavailable");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    Response::builder()
        .status(401)
        .body("Unauthorized".into())
        .unwrap_or_else(|_| Response::new("Unauthorized".into()))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, session: SessionInfo, state: AppState) {
    let player_id = session.player_id;
    let session_id = Uuid::new_v4();
    info!(player_id = %player_id, session_id = %session_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    // Matchmaking: join a waiting match or reconnect to a live one
    let handle = match state.manager.add_player_to_match(
        player_id,
        session_id,
        session.display_name.clone(),
        session.bet.clone(),
        unix_millis(),
    ) {
        Ok(handle) => handle,
        Err(e) => {
            warn!(player_id = %player_id, error = %e, "Join refused");
            let _ = send_msg(
                &mut ws_sink,
                &ServerMsg::Error {
                    code: "join_refused".to_string(),
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    let welcome = ServerMsg::Welcome {
        player_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(player_id = %player_id, error = %e, "Failed to send welcome");
        return;
    }

    let joined = {
        let game = handle.state.lock();
        ServerMsg::MatchJoined {
            match_id: game.id,
            player_id,
            seed_commitment: game.seed_commitment.clone(),
            players: game.player_infos(),
        }
    };
    let _ = send_msg(&mut ws_sink, &joined).await;

    let events_rx = handle.subscribe();
    run_session(player_id, handle, ws_sink, ws_stream, events_rx, state.clone()).await;

    // Cleanup on disconnect: soft or hard removal is the match's call
    let match_id = state
        .manager
        .match_for_player(&player_id)
        .map(|h| h.id)
        .unwrap_or_else(Uuid::nil);
    state.manager.remove_player_from_match(player_id, unix_millis());

    // Best-effort platform notice; gameplay never waits on it
    let platform = state.platform.clone();
    let platform_user_id = session.platform_user_id.clone();
    tokio::spawn(async move {
        platform
            .notify_player_disconnect(player_id, &platform_user_id, match_id)
            .await;
    });

    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    player_id: Uuid,
    handle: MatchHandle,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut events_rx: broadcast::Receiver<ServerMsg>,
    state: AppState,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Writer task: match events -> WebSocket
    let writer_player_id = player_id;
    let writer_handle = tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(msg) => {
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(player_id = %writer_player_id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        player_id = %writer_player_id,
                        lagged_count = n,
                        "Client lagged, skipping {} events", n
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(player_id = %writer_player_id, "Event channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> simulation
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check() {
                    warn!(player_id = %player_id, "Rate limited client message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        if handle_client_msg(player_id, &handle, &state, msg) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Dispatch one parsed client message. Returns true when the session
/// should end.
fn handle_client_msg(
    player_id: Uuid,
    handle: &MatchHandle,
    state: &AppState,
    msg: ClientMsg,
) -> bool {
    match msg {
        ClientMsg::Authenticate { .. } => {
            // Session was verified at upgrade time
            debug!(player_id = %player_id, "Redundant authenticate ignored");
            false
        }
        ClientMsg::Ready => {
            if state.manager.mark_player_ready(player_id) {
                state.manager.try_start_match(handle.id, unix_millis());
            }
            false
        }
        ClientMsg::Input { seq, action, timestamp } => {
            let input = PlayerInput { seq, action, timestamp };
            let mut game = handle.state.lock();
            // Identity comes from the session, never from the payload
            PhysicsEngine::process_player_input(&mut game, player_id, &input, unix_millis());
            false
        }
        ClientMsg::Ping { t } => {
            let _ = handle.events_tx.send(ServerMsg::Pong { t });
            false
        }
        ClientMsg::Leave => true,
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
