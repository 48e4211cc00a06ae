mod client;
mod parser;

pub use client::run_feed;
pub use parser::{
    build_subscribe_message, parse_message, CoinbaseL2UpdateRaw, CoinbaseSnapshotRaw,
    ParsedMessage, SubscribedChannel,
};
