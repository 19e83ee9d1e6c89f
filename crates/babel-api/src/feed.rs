use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use babel_sync::store::{ChangeStream, FeedItem};

use crate::AppState;

/// Upgrade to a websocket that streams every change in `group_id`.
pub async fn feed_upgrade(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Subscribe before the upgrade completes so no commit is missed
    let changes = state.store.subscribe(group_id);
    ws.on_upgrade(move |socket| stream_changes(socket, group_id, changes))
}

/// Forward changes until either side goes away. A lagging client is
/// disconnected so it reconnects and reloads instead of missing rows.
async fn stream_changes(socket: WebSocket, group_id: Uuid, mut changes: ChangeStream) {
    let (mut sender, mut receiver) = socket.split();

    info!("Feed client connected to group {}", group_id);

    loop {
        tokio::select! {
            item = changes.next() => {
                let event = match item {
                    Some(FeedItem::Change(event)) => event,
                    Some(FeedItem::Lagged { skipped }) => {
                        warn!("Feed client for {} lagged by {} events, closing", group_id, skipped);
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                };

                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode change for {}: {}", group_id, e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                // Clients only listen; anything but a close is ignored
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!("Feed client disconnected from group {}", group_id);
}
