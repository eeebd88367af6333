//! Websocket client for the coordinator event feed.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::Node;
use crate::error::NodeError;
use crate::fetch::PackageFetcher;
use crate::ledger::Ledger;
use crate::runtime::ContainerRuntime;

/// Subscription sent right after connecting.
pub fn subscription_message() -> Value {
    json!({
        "filter": [
            { "event": { "event": "job_created" } },
            { "event": { "event": "job_retry" } },
            { "event": { "event": "job_completed" } }
        ],
        "secret": "execution_client"
    })
}

/// Consumes the feed until `shutdown` fires.
///
/// Each text frame is handled on its own task so a running job never blocks
/// the heartbeat or later events. Losing the connection is an error.
pub async fn consume<L, R, F>(node: Node<L, R, F>, shutdown: CancellationToken) -> Result<(), NodeError>
where
    L: Ledger,
    R: ContainerRuntime,
    F: PackageFetcher,
{
    let url = node.config().websocket_url.clone();
    let heartbeat = Duration::from_millis(node.config().heartbeat_interval_ms.max(1));

    let (socket, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = socket.split();
    sink.send(Message::text(subscription_message().to_string()))
        .await?;
    tracing::info!(url = %url, "Listening for jobs");

    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(running = handlers.len(), "Closing event feed");
                if let Err(err) = sink.send(Message::Close(None)).await {
                    tracing::debug!(error = %err, "Close frame not delivered");
                }
                break;
            }
            _ = ticker.tick() => {
                sink.send(Message::Ping(Default::default())).await?;
                tracing::trace!("Heartbeat sent");
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let node = node.clone();
                    let text = text.to_string();
                    handlers.spawn(async move { node.handle_message(&text).await });
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(NodeError::Feed(format!("feed closed by server: {frame:?}")));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
                None => return Err(NodeError::Feed("feed ended unexpectedly".into())),
            },
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "Event handler panicked");
                }
            }
        }
    }

    handlers.shutdown().await;
    Ok(())
}
