use common::ExponentialBackoff;
use connector_core::{CommandReceiver, FeedCommand, FeedConfig, FeedError, MessageSender};
use futures_util::{SinkExt, StreamExt};
use metrics::SharedMetrics;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::parser::{build_subscribe_message, parse_message, ParsedMessage};

/// Duration of stable connection before resetting backoff.
const STABLE_CONNECTION_THRESHOLD: Duration = Duration::from_secs(300);

/// Timeout for WebSocket connection attempts.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum ConnectResult {
    Connected(FeedStream),
    Shutdown,
    Error(FeedError),
}

async fn connect_with_timeout(url: &str, shutdown_rx: &mut watch::Receiver<bool>) -> ConnectResult {
    let connect = tokio::time::timeout(CONNECTION_TIMEOUT, connect_async(url));
    tokio::pin!(connect);

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                // A dropped sender means nobody can ask us to stop any more.
                if changed.is_err() || *shutdown_rx.borrow() {
                    return ConnectResult::Shutdown;
                }
            }

            result = &mut connect => {
                return match result {
                    Ok(Ok((stream, _))) => ConnectResult::Connected(stream),
                    Ok(Err(e)) => ConnectResult::Error(FeedError::WebSocket(e.to_string())),
                    Err(_) => ConnectResult::Error(FeedError::WebSocket("connection timeout".to_string())),
                };
            }
        }
    }
}

/// Result of a session.
enum SessionResult {
    /// Shutdown was requested.
    Shutdown,
    /// Session was connected, then ended with `error` after `duration`.
    Connected {
        duration: Duration,
        error: FeedError,
    },
    /// Failed to connect or subscribe.
    ConnectFailed(FeedError),
}

/// State carried across sessions.
struct FeedState<'a> {
    config: &'a FeedConfig,
    products: Vec<String>,
    commands: &'a mut CommandReceiver,
    commands_open: bool,
}

impl FeedState<'_> {
    /// Records newly requested products, returning only the ones not already streamed.
    fn add_products(&mut self, requested: Vec<String>) -> Vec<String> {
        let mut added = Vec::new();
        for product_id in requested {
            if !self.products.contains(&product_id) && !added.contains(&product_id) {
                added.push(product_id);
            }
        }
        self.products.extend(added.iter().cloned());
        added
    }
}

/// Forward one parsed text frame. Returns `false` when the receiver is gone.
async fn handle_text(text: &str, sender: &MessageSender, metrics: &SharedMetrics) -> bool {
    metrics.inc_messages_received();
    match parse_message(text) {
        Ok(ParsedMessage::Book(message)) => {
            if sender.send(message).await.is_err() {
                info!("Receiver dropped, stopping feed");
                return false;
            }
        }
        Ok(ParsedMessage::Subscriptions(channels)) => {
            for channel in channels {
                info!(
                    channel = %channel.name,
                    products = ?channel.product_ids,
                    "Subscription confirmed"
                );
            }
        }
        Ok(ParsedMessage::Error { message, reason }) => {
            metrics.inc_websocket_errors();
            let error = FeedError::Exchange(match reason {
                Some(reason) => format!("{}: {}", message, reason),
                None => message,
            });
            warn!(error = %error, "Exchange reported an error");
        }
        Ok(ParsedMessage::Unknown) => {}
        Err(e) => {
            metrics.inc_parse_errors();
            warn!(error = %e, "Dropping malformed message");
        }
    }
    true
}

/// Run a single WebSocket connection session.
async fn run_session(
    state: &mut FeedState<'_>,
    sender: &MessageSender,
    shutdown_rx: &mut watch::Receiver<bool>,
    metrics: &SharedMetrics,
) -> SessionResult {
    let url = state.config.feed_url.as_str();
    info!(url = %url, "Connecting to Coinbase feed");

    let ws_stream = match connect_with_timeout(url, shutdown_rx).await {
        ConnectResult::Connected(stream) => stream,
        ConnectResult::Shutdown => return SessionResult::Shutdown,
        ConnectResult::Error(e) => return SessionResult::ConnectFailed(e),
    };

    let connected_at = Instant::now();
    let (mut write, mut read) = ws_stream.split();

    if !state.products.is_empty() {
        let subscribe = build_subscribe_message(&state.products, &state.config.channel);
        if let Err(e) = write.send(Message::Text(subscribe)).await {
            return SessionResult::ConnectFailed(FeedError::WebSocket(e.to_string()));
        }
    }
    info!(products = ?state.products, channel = %state.config.channel, "Subscribed to feed");

    let ended = |error: FeedError| SessionResult::Connected {
        duration: connected_at.elapsed(),
        error,
    };

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received, closing connection");
                    let _ = write.close().await;
                    return SessionResult::Shutdown;
                }
            }

            command = state.commands.recv(), if state.commands_open => {
                match command {
                    Some(FeedCommand::Subscribe(requested)) => {
                        let added = state.add_products(requested);
                        if added.is_empty() {
                            continue;
                        }
                        info!(products = ?added, "Subscribing to additional products");
                        let subscribe = build_subscribe_message(&added, &state.config.channel);
                        if let Err(e) = write.send(Message::Text(subscribe)).await {
                            metrics.inc_websocket_errors();
                            return ended(FeedError::WebSocket(e.to_string()));
                        }
                    }
                    None => {
                        debug!("Command channel closed");
                        state.commands_open = false;
                    }
                }
            }

            msg_opt = read.next() => {
                let msg = match msg_opt {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        metrics.inc_websocket_errors();
                        return ended(FeedError::WebSocket(e.to_string()));
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return ended(FeedError::ConnectionClosed);
                    }
                };

                match msg {
                    Message::Text(text) => {
                        if !handle_text(&text, sender, metrics).await {
                            return ended(FeedError::ChannelClosed);
                        }
                    }
                    Message::Ping(data) => {
                        debug!("Received Ping, sending Pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            warn!(error = %e, "Failed to send Pong");
                            metrics.inc_websocket_errors();
                            return ended(FeedError::WebSocket(e.to_string()));
                        }
                    }
                    Message::Close(_) => {
                        info!("WebSocket closed by server");
                        return ended(FeedError::ConnectionClosed);
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Sleep for `delay` unless shutdown is requested first. Returns `true` on shutdown.
async fn wait_or_shutdown(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
    }
}

/// Run the Coinbase level-2 feed with automatic reconnection.
///
/// Every `snapshot` and `l2update` is forwarded on `sender` in arrival order.
/// After a reconnect all known products are subscribed again, so the
/// exchange sends a fresh snapshot for each of them. Products added through
/// `commands` are kept for later sessions.
///
/// Returns when shutdown is requested or the receiver is dropped.
pub async fn run_feed(
    config: FeedConfig,
    sender: MessageSender,
    mut commands: CommandReceiver,
    mut shutdown_rx: watch::Receiver<bool>,
    metrics: SharedMetrics,
) -> Result<(), FeedError> {
    let mut state = FeedState {
        config: &config,
        products: Vec::new(),
        commands: &mut commands,
        commands_open: true,
    };
    state.add_products(config.product_ids.clone());

    let mut backoff = ExponentialBackoff::default();
    let mut needs_reconnect = false;

    loop {
        if *shutdown_rx.borrow() {
            info!("Shutdown requested, exiting feed");
            return Ok(());
        }

        match run_session(&mut state, &sender, &mut shutdown_rx, &metrics).await {
            SessionResult::Shutdown => {
                info!("Feed shutdown complete");
                return Ok(());
            }
            SessionResult::Connected { duration, error } => {
                if needs_reconnect {
                    metrics.inc_reconnect_successes();
                }
                needs_reconnect = true;

                if matches!(error, FeedError::ChannelClosed) {
                    info!("Channel closed, exiting feed");
                    return Err(FeedError::ChannelClosed);
                }

                if duration >= STABLE_CONNECTION_THRESHOLD {
                    info!(
                        duration_secs = duration.as_secs(),
                        "Connection was stable, resetting backoff"
                    );
                    backoff.reset();
                }

                metrics.inc_reconnect_attempts();
                let delay = backoff.next_delay();
                warn!(
                    error = %error,
                    attempt = backoff.attempt(),
                    delay_secs = delay.as_secs_f64(),
                    "Connection lost, reconnecting"
                );

                if wait_or_shutdown(delay, &mut shutdown_rx).await {
                    info!("Shutdown requested during backoff");
                    return Ok(());
                }
            }
            SessionResult::ConnectFailed(e) => {
                metrics.inc_connection_failures();
                needs_reconnect = true;

                let delay = backoff.next_delay();
                warn!(
                    error = %e,
                    attempt = backoff.attempt(),
                    delay_secs = delay.as_secs_f64(),
                    "Connection failed, retrying"
                );

                if wait_or_shutdown(delay, &mut shutdown_rx).await {
                    info!("Shutdown requested during backoff");
                    return Ok(());
                }
            }
        }
    }
}
