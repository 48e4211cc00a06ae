use common::CoinbaseEnvironment;
use model::FeedMessage;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default Coinbase channel carrying `snapshot` and `l2update` messages.
pub const DEFAULT_CHANNEL: &str = "level2";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Shutdown requested")]
    Shutdown,
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::MalformedMessage(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Products to subscribe to.
    pub product_ids: Vec<String>,
    /// Websocket feed address.
    pub feed_url: String,
    /// Coinbase channel name (`level2` or `level2_batch`).
    pub channel: String,
    /// Message channel buffer capacity.
    pub channel_capacity: usize,
}

impl FeedConfig {
    pub fn new(product_ids: Vec<String>, feed_url: impl Into<String>) -> Self {
        Self {
            product_ids,
            feed_url: feed_url.into(),
            ..Self::default()
        }
    }

    /// Configuration for the given environment's public feed.
    pub fn for_environment(product_ids: Vec<String>, environment: CoinbaseEnvironment) -> Self {
        Self::new(product_ids, environment.ws_feed_url())
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            product_ids: vec!["BTC-USD".to_string()],
            feed_url: CoinbaseEnvironment::default().ws_feed_url().to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            channel_capacity: 4096,
        }
    }
}

/// Runtime instructions for a running feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    /// Start streaming these products in addition to the current ones.
    Subscribe(Vec<String>),
}

pub type MessageSender = mpsc::Sender<FeedMessage>;
pub type MessageReceiver = mpsc::Receiver<FeedMessage>;

pub type CommandSender = mpsc::UnboundedSender<FeedCommand>;
pub type CommandReceiver = mpsc::UnboundedReceiver<FeedCommand>;

pub fn create_message_channel(capacity: usize) -> (MessageSender, MessageReceiver) {
    mpsc::channel(capacity)
}

pub fn create_command_channel() -> (CommandSender, CommandReceiver) {
    mpsc::unbounded_channel()
}
