use chrono::{DateTime, Utc};
use connector_core::FeedError;
use model::{FeedMessage, L2Update, LevelChange, PriceLevelUpdate, Side, Snapshot};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

/// Raw Coinbase level-2 snapshot.
#[derive(Debug, Deserialize)]
pub struct CoinbaseSnapshotRaw {
    pub product_id: String,
    pub bids: Vec<(String, String)>,
    pub asks: Vec<(String, String)>,
}

/// Raw Coinbase level-2 update.
#[derive(Debug, Deserialize)]
pub struct CoinbaseL2UpdateRaw {
    pub product_id: String,
    pub changes: Vec<(String, String, String)>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscribedChannel {
    pub name: String,
    #[serde(default)]
    pub product_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionsRaw {
    channels: Vec<SubscribedChannel>,
}

#[derive(Debug, Deserialize)]
struct ErrorRaw {
    message: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug)]
pub enum ParsedMessage {
    Book(FeedMessage),
    /// Subscription acknowledgement listing the active channels.
    Subscriptions(Vec<SubscribedChannel>),
    /// Error reported by the exchange.
    Error {
        message: String,
        reason: Option<String>,
    },
    Unknown,
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, FeedError> {
    Decimal::from_str(value)
        .map_err(|e| FeedError::MalformedMessage(format!("invalid {} '{}': {}", field, value, e)))
}

fn parse_side(value: &str) -> Result<Side, FeedError> {
    match value {
        "buy" => Ok(Side::Buy),
        "sell" => Ok(Side::Sell),
        other => Err(FeedError::MalformedMessage(format!(
            "invalid side '{}'",
            other
        ))),
    }
}

/// Parse string price/size pairs. Any unparsable entry rejects the whole message.
fn parse_price_levels(levels: &[(String, String)]) -> Result<Vec<PriceLevelUpdate>, FeedError> {
    levels
        .iter()
        .map(|(price, size)| -> Result<PriceLevelUpdate, FeedError> {
            Ok((parse_decimal("price", price)?, parse_decimal("size", size)?))
        })
        .collect()
}

impl TryFrom<CoinbaseSnapshotRaw> for Snapshot {
    type Error = FeedError;

    fn try_from(raw: CoinbaseSnapshotRaw) -> Result<Self, Self::Error> {
        Ok(Snapshot {
            bids: parse_price_levels(&raw.bids)?,
            asks: parse_price_levels(&raw.asks)?,
            product_id: raw.product_id,
        })
    }
}

impl TryFrom<CoinbaseL2UpdateRaw> for L2Update {
    type Error = FeedError;

    fn try_from(raw: CoinbaseL2UpdateRaw) -> Result<Self, Self::Error> {
        let changes = raw
            .changes
            .iter()
            .map(|(side, price, size)| -> Result<LevelChange, FeedError> {
                Ok(LevelChange::new(
                    parse_side(side)?,
                    parse_decimal("price", price)?,
                    parse_decimal("size", size)?,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(L2Update {
            product_id: raw.product_id,
            changes,
            time: raw.time,
        })
    }
}

pub fn parse_message(text: &str) -> Result<ParsedMessage, FeedError> {
    let raw: serde_json::Value = serde_json::from_str(text)?;

    let Some(message_type) = raw.get("type").and_then(|v| v.as_str()).map(str::to_owned) else {
        return Ok(ParsedMessage::Unknown);
    };

    match message_type.as_str() {
        "snapshot" => {
            let snapshot: CoinbaseSnapshotRaw = serde_json::from_value(raw)?;
            Ok(ParsedMessage::Book(FeedMessage::Snapshot(
                snapshot.try_into()?,
            )))
        }
        "l2update" => {
            let update: CoinbaseL2UpdateRaw = serde_json::from_value(raw)?;
            Ok(ParsedMessage::Book(FeedMessage::L2Update(update.try_into()?)))
        }
        "subscriptions" => {
            let subscriptions: SubscriptionsRaw = serde_json::from_value(raw)?;
            Ok(ParsedMessage::Subscriptions(subscriptions.channels))
        }
        "error" => {
            let error: ErrorRaw = serde_json::from_value(raw)?;
            Ok(ParsedMessage::Error {
                message: error.message,
                reason: error.reason,
            })
        }
        _ => Ok(ParsedMessage::Unknown),
    }
}

/// Builds the subscribe request for `product_ids` on `channel`.
pub fn build_subscribe_message(product_ids: &[String], channel: &str) -> String {
    serde_json::json!({
        "type": "subscribe",
        "product_ids": product_ids,
        "channels": [channel],
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_snapshot() {
        let json = r#"{
            "type": "snapshot",
            "product_id": "BTC-USD",
            "bids": [["100", "1"], ["99", "2"]],
            "asks": [["101", "3"], ["102", "1"]]
        }"#;

        match parse_message(json).unwrap() {
            ParsedMessage::Book(FeedMessage::Snapshot(snapshot)) => {
                assert_eq!(snapshot.product_id, "BTC-USD");
                assert_eq!(
                    snapshot.bids,
                    vec![(dec!(100), dec!(1)), (dec!(99), dec!(2))]
                );
                assert_eq!(
                    snapshot.asks,
                    vec![(dec!(101), dec!(3)), (dec!(102), dec!(1))]
                );
            }
            other => panic!("Expected Snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_l2update() {
        let json = r#"{
            "type": "l2update",
            "product_id": "BTC-USD",
            "changes": [
                ["buy", "100", "0"],
                ["sell", "101.50", "5.25"]
            ],
            "time": "2019-08-14T20:42:27.265Z"
        }"#;

        match parse_message(json).unwrap() {
            ParsedMessage::Book(FeedMessage::L2Update(update)) => {
                assert_eq!(update.product_id, "BTC-USD");
                assert_eq!(
                    update.changes,
                    vec![
                        LevelChange::new(Side::Buy, dec!(100), dec!(0)),
                        LevelChange::new(Side::Sell, dec!(101.50), dec!(5.25)),
                    ]
                );
                assert_eq!(
                    update.time.unwrap().to_rfc3339(),
                    "2019-08-14T20:42:27.265+00:00"
                );
            }
            other => panic!("Expected L2Update, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_l2update_without_time() {
        let json = r#"{"type":"l2update","product_id":"ETH-USD","changes":[["sell","10","1"]]}"#;
        match parse_message(json).unwrap() {
            ParsedMessage::Book(FeedMessage::L2Update(update)) => {
                assert!(update.time.is_none());
                assert_eq!(update.changes.len(), 1);
            }
            other => panic!("Expected L2Update, got {:?}", other),
        }
    }

    #[test]
    fn test_non_numeric_price_is_malformed() {
        let json = r#"{"type":"snapshot","product_id":"BTC-USD","bids":[["abc","1"]],"asks":[]}"#;
        assert!(matches!(
            parse_message(json),
            Err(FeedError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_non_numeric_size_is_malformed() {
        let json = r#"{"type":"l2update","product_id":"BTC-USD","changes":[["buy","100","lots"]]}"#;
        assert!(matches!(
            parse_message(json),
            Err(FeedError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_unknown_side_is_malformed() {
        let json = r#"{"type":"l2update","product_id":"BTC-USD","changes":[["bid","100","1"]]}"#;
        let err = parse_message(json).unwrap_err();
        assert!(err.to_string().contains("invalid side 'bid'"));
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        let json = r#"{"type":"snapshot","product_id":"BTC-USD","bids":"none"}"#;
        assert!(matches!(
            parse_message(json),
            Err(FeedError::MalformedMessage(_))
        ));
        assert!(parse_message("not json").is_err());
    }

    #[test]
    fn test_parse_subscriptions() {
        let json = r#"{
            "type": "subscriptions",
            "channels": [{"name": "level2", "product_ids": ["BTC-USD", "ETH-USD"]}]
        }"#;
        match parse_message(json).unwrap() {
            ParsedMessage::Subscriptions(channels) => {
                assert_eq!(channels.len(), 1);
                assert_eq!(channels[0].name, "level2");
                assert_eq!(channels[0].product_ids, vec!["BTC-USD", "ETH-USD"]);
            }
            other => panic!("Expected Subscriptions, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error() {
        let json = r#"{"type":"error","message":"Failed to subscribe","reason":"FOO-BAR is not a valid product"}"#;
        match parse_message(json).unwrap() {
            ParsedMessage::Error { message, reason } => {
                assert_eq!(message, "Failed to subscribe");
                assert_eq!(reason.as_deref(), Some("FOO-BAR is not a valid product"));
            }
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown() {
        let heartbeat = r#"{"type":"heartbeat","sequence":90,"product_id":"BTC-USD"}"#;
        assert!(matches!(
            parse_message(heartbeat).unwrap(),
            ParsedMessage::Unknown
        ));
        assert!(matches!(
            parse_message(r#"{"hello":"world"}"#).unwrap(),
            ParsedMessage::Unknown
        ));
    }

    #[test]
    fn test_build_subscribe_message() {
        let products = vec!["BTC-USD".to_string(), "ETH-USD".to_string()];
        let message = build_subscribe_message(&products, "level2");
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();

        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["product_ids"][0], "BTC-USD");
        assert_eq!(value["product_ids"][1], "ETH-USD");
        assert_eq!(value["channels"][0], "level2");
    }
}
