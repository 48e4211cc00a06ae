use book_registry::CoinbaseOrderBook;
use common::CoinbaseEnvironment;
use connector_core::FeedConfig;
use std::time::Duration;
use tracing::{error, info, warn};

/// Interval for periodic health status logging.
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Interval for printing the top of each book.
const BOOK_PRINT_INTERVAL: Duration = Duration::from_secs(5);

const DEFAULT_BOOK_DEPTH: usize = 5;

fn feed_url() -> String {
    common::feed_url_from_env().unwrap_or_else(|e| {
        warn!(error = %e, "Falling back to the production feed");
        CoinbaseEnvironment::Production.ws_feed_url().to_string()
    })
}

fn book_depth() -> usize {
    match std::env::var("BOOK_DEPTH") {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!(value = %value, "Invalid BOOK_DEPTH, using default");
            DEFAULT_BOOK_DEPTH
        }),
        Err(_) => DEFAULT_BOOK_DEPTH,
    }
}

fn print_books(registry: &CoinbaseOrderBook, products: &[String], depth: usize) {
    for product_id in products {
        let book = match registry.get_order_book(product_id) {
            Ok(book) => book,
            Err(e) => {
                warn!(error = %e, "Book unavailable");
                continue;
            }
        };
        if !book.is_initialized() {
            continue;
        }

        println!("=== {} ===", product_id);
        let levels = book.get_book(Some(depth));
        for ask in levels.asks.iter().rev() {
            println!("  ask {:>16} | {}", ask.price, ask.size);
        }
        for bid in &levels.bids {
            println!("  bid {:>16} | {}", bid.price, bid.size);
        }
        if let (Some(mid), Some(spread)) = (book.mid_price(), book.spread()) {
            println!("  mid {} spread {}", mid, spread);
        }
    }
}

#[tokio::main]
async fn main() {
    common::init_logging();

    let products = std::env::args().skip(1).collect::<Vec<_>>();

    let products = if products.is_empty() {
        vec!["BTC-USD".to_string()]
    } else {
        products
    };

    let depth = book_depth();
    let config = FeedConfig::new(products.clone(), feed_url());

    info!(products = ?products, url = %config.feed_url, depth, "Starting order book");

    let registry = match CoinbaseOrderBook::make_order_book_with_config(config) {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "Failed to start order book");
            return;
        }
    };

    for product_id in &products {
        let result = registry.add_callback(product_id, |book| {
            if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
                tracing::trace!(
                    product_id = %book.product_id(),
                    bid = %bid.price,
                    ask = %ask.price,
                    "Book updated"
                );
            }
        });
        if let Err(e) = result {
            warn!(error = %e, "Failed to register callback");
        }
    }

    let mut health_interval = tokio::time::interval(HEALTH_LOG_INTERVAL);
    let mut print_interval = tokio::time::interval(BOOK_PRINT_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Received Ctrl+C, initiating shutdown");
                break;
            }
            _ = print_interval.tick() => {
                print_books(&registry, &products, depth);
            }
            _ = health_interval.tick() => {
                let snapshot = registry.metrics().snapshot();
                let status = snapshot.health_status();
                info!(
                    status = %status,
                    messages = snapshot.messages_received,
                    updates_per_sec = format!("{:.1}", snapshot.updates_per_second),
                    errors = snapshot.websocket_errors + snapshot.parse_errors,
                    reconnects = snapshot.reconnect_attempts,
                    "Health check"
                );
            }
        }
    }

    registry.shutdown().await;

    // Print final metrics
    let snapshot = registry.metrics().snapshot();
    println!("\n{}", snapshot);

    info!("Shutdown complete");
}
