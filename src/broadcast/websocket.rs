//! WebSocket front end for a [`LiveHub`].
//!
//! Every accepted connection is registered with the hub and receives each
//! broadcast as a text frame. Clients only listen; anything they send other
//! than pings and close frames is ignored.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use super::LiveHub;

/// Accept connections until shutdown is signalled
pub async fn serve(listener: TcpListener, hub: Arc<LiveHub>, mut shutdown: broadcast::Receiver<()>) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "live update server listening");
    }

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(
                        stream,
                        peer,
                        hub.clone(),
                        shutdown.resubscribe(),
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
        }
    }

    tracing::info!("live update server stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<LiveHub>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = ws.split();
    let (id, mut updates) = hub.register();
    tracing::info!(%peer, subscriber = id, "live client connected");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            update = updates.recv() => match update {
                Some(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = source.next() => match incoming {
                // tungstenite queues the pong itself; push it out now
                Some(Ok(Message::Ping(_))) => {
                    if sink.flush().await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%peer, error = %e, "websocket read failed");
                    break;
                }
            },
        }
    }

    hub.unregister(id);
    tracing::info!(%peer, subscriber = id, "live client disconnected");
}
