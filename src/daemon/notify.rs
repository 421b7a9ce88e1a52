//! aria2 WebSocket notifications.
//!
//! Notifications only wake status watchers early; correctness never depends
//! on receiving them, so the listener reconnects quietly and drops what it
//! cannot parse.

use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::daemon::TaskId;
use crate::error::Result;

/// Delay before reconnecting after the socket drops.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the notification channel.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Start,
    Pause,
    Stop,
    Complete,
    Error,
}

/// A notification about one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonEvent {
    pub task_id: TaskId,
    pub kind: NotificationKind,
}

#[derive(Debug, Deserialize)]
struct Notification {
    method: String,
    #[serde(default)]
    params: Vec<NotificationParam>,
}

#[derive(Debug, Deserialize)]
struct NotificationParam {
    gid: String,
}

/// Parse one WebSocket text frame into events.
pub fn parse_notification(text: &str) -> Vec<DaemonEvent> {
    let Ok(notification) = serde_json::from_str::<Notification>(text) else {
        return Vec::new();
    };

    let kind = match notification.method.as_str() {
        "aria2.onDownloadStart" => NotificationKind::Start,
        "aria2.onDownloadPause" => NotificationKind::Pause,
        "aria2.onDownloadStop" => NotificationKind::Stop,
        "aria2.onDownloadComplete" | "aria2.onBtDownloadComplete" => NotificationKind::Complete,
        "aria2.onDownloadError" => NotificationKind::Error,
        _ => return Vec::new(),
    };

    notification
        .params
        .into_iter()
        .map(|p| DaemonEvent {
            task_id: TaskId(p.gid),
            kind,
        })
        .collect()
}

/// Start listening on `ws_url`; events are published on the returned sender.
///
/// The listener runs until `cancel` fires.
pub fn spawn_listener(ws_url: String, cancel: CancellationToken) -> broadcast::Sender<DaemonEvent> {
    let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
    let sender = tx.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = listen_once(&ws_url, &sender) => {
                    match result {
                        Ok(()) => tracing::debug!(url = %ws_url, "Notification socket closed"),
                        Err(e) => tracing::warn!(url = %ws_url, error = %e, "Notification socket failed"),
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        tracing::debug!("Notification listener stopped");
    });

    tx
}

async fn listen_once(ws_url: &str, sender: &broadcast::Sender<DaemonEvent>) -> Result<()> {
    let (ws_stream, _) = connect_async(ws_url).await?;
    tracing::info!(url = %ws_url, "Connected to daemon notifications");
    let (_write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        if let Message::Text(text) = msg? {
            for event in parse_notification(&text) {
                tracing::trace!(task_id = %event.task_id, kind = ?event.kind, "Daemon notification");
                // No receivers is fine; watchers fall back to polling.
                let _ = sender.send(event);
            }
        }
    }

    Ok(())
}
