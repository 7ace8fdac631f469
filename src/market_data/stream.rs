// =============================================================================
// Exchange WebSocket stream — Bybit v5 public linear
// =============================================================================
//
// One connection per symbol subscribing to three topics:
//
//   orderbook.50.<symbol>   depth snapshots + deltas
//   tickers.<symbol>        funding rate + last price
//   kline.1.<symbol>        1-minute candles
//
// Runs until the stream disconnects or errors, then returns so the caller
// (main.rs) can reconnect after a delay.  Bybit drops idle connections, so an
// application-level `{"op":"ping"}` is sent every 20 seconds.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::{Candle, MarketDataManager, OrderBookUpdate};

const MAINNET_URL: &str = "wss://stream.bybit.com/v5/public/linear";
const TESTNET_URL: &str = "wss://stream-testnet.bybit.com/v5/public/linear";

/// Interval between client pings (Bybit requires <= 20 s of idle time).
const PING_INTERVAL_SECS: u64 = 20;

/// A parsed inbound message, ready for dispatch into the manager.
#[derive(Debug)]
enum StreamUpdate {
    OrderBook(OrderBookUpdate),
    Ticker {
        symbol: String,
        last_price: Option<f64>,
        funding_rate: Option<f64>,
    },
    Kline {
        symbol: String,
        candle: Candle,
    },
    /// Subscription acks, pongs — nothing to do.
    Control,
}

/// Connect the market stream for a single symbol and feed updates into
/// `manager` until the connection drops.
pub async fn run_market_stream(
    symbol: &str,
    testnet: bool,
    manager: &Arc<MarketDataManager>,
) -> Result<()> {
    let url = if testnet { TESTNET_URL } else { MAINNET_URL };
    info!(url = %url, symbol = %symbol, "connecting to market WebSocket");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to market WebSocket")?;

    let (mut write, mut read) = ws_stream.split();

    let subscribe = serde_json::json!({
        "op": "subscribe",
        "args": [
            format!("orderbook.50.{symbol}"),
            format!("tickers.{symbol}"),
            format!("kline.1.{symbol}"),
        ],
    });
    write
        .send(Message::Text(subscribe.to_string()))
        .await
        .context("failed to send subscribe request")?;

    info!(symbol = %symbol, "market WebSocket subscribed");
    manager.set_connected(true);

    let mut ping = tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_SECS));
    ping.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if let Err(e) = write.send(Message::Text(r#"{"op":"ping"}"#.to_string())).await {
                    manager.set_connected(false);
                    error!(symbol = %symbol, error = %e, "market WebSocket ping failed");
                    return Err(e.into());
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match parse_message(&text) {
                            Ok(update) => dispatch(manager, update),
                            Err(e) => warn!(error = %e, "failed to parse market message"),
                        }
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong/Binary frames are handled by tungstenite.
                    }
                    Some(Err(e)) => {
                        manager.set_connected(false);
                        error!(symbol = %symbol, error = %e, "market WebSocket read error");
                        return Err(e.into());
                    }
                    None => {
                        manager.set_connected(false);
                        warn!(symbol = %symbol, "market WebSocket stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn dispatch(manager: &Arc<MarketDataManager>, update: StreamUpdate) {
    match update {
        StreamUpdate::OrderBook(book) => manager.apply_orderbook(book),
        StreamUpdate::Ticker {
            symbol,
            last_price,
            funding_rate,
        } => manager.apply_ticker(&symbol, last_price, funding_rate),
        StreamUpdate::Kline { symbol, candle } => {
            debug!(symbol = %symbol, close = candle.close, confirmed = candle.confirmed, "candle update");
            manager.apply_candle(&symbol, candle);
        }
        StreamUpdate::Control => {}
    }
}

// ---------------------------------------------------------------------------
// Message parsing
// ---------------------------------------------------------------------------

fn parse_message(text: &str) -> Result<StreamUpdate> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse market JSON")?;

    // Subscription acks and pongs carry "op" instead of "topic".
    let Some(topic) = root["topic"].as_str() else {
        return Ok(StreamUpdate::Control);
    };

    if topic.starts_with("orderbook.") {
        parse_orderbook(topic, &root)
    } else if topic.starts_with("tickers.") {
        parse_ticker(&root)
    } else if topic.starts_with("kline.") {
        parse_kline(topic, &root)
    } else {
        Ok(StreamUpdate::Control)
    }
}

/// Orderbook message shape:
/// ```json
/// { "topic": "orderbook.50.BTCUSDT", "type": "snapshot",
///   "data": { "s": "BTCUSDT", "b": [["59990","1.5"]], "a": [["60010","2"]] } }
/// ```
fn parse_orderbook(topic: &str, root: &serde_json::Value) -> Result<StreamUpdate> {
    let data = &root["data"];
    let symbol = data["s"]
        .as_str()
        .map(str::to_uppercase)
        .or_else(|| topic.rsplit('.').next().map(str::to_uppercase))
        .context("orderbook message missing symbol")?;

    let is_snapshot = root["type"].as_str() == Some("snapshot");
    let bids = parse_levels(&data["b"])?;
    let asks = parse_levels(&data["a"])?;

    Ok(StreamUpdate::OrderBook(OrderBookUpdate {
        symbol,
        is_snapshot,
        bids,
        asks,
    }))
}

fn parse_levels(val: &serde_json::Value) -> Result<Vec<(f64, f64)>> {
    let Some(rows) = val.as_array() else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let price = parse_str_f64(&row[0]).context("bad level price")?;
        let size = parse_str_f64(&row[1]).context("bad level size")?;
        out.push((price, size));
    }
    Ok(out)
}

/// Ticker deltas omit unchanged fields, so everything is optional.
fn parse_ticker(root: &serde_json::Value) -> Result<StreamUpdate> {
    let data = &root["data"];
    let symbol = data["symbol"]
        .as_str()
        .context("ticker message missing symbol")?
        .to_uppercase();

    let last_price = data["lastPrice"].as_str().and_then(|s| s.parse().ok());
    let funding_rate = data["fundingRate"].as_str().and_then(|s| s.parse().ok());

    Ok(StreamUpdate::Ticker {
        symbol,
        last_price,
        funding_rate,
    })
}

/// Kline message shape:
/// ```json
/// { "topic": "kline.1.BTCUSDT",
///   "data": [{ "start": 1700000000000, "open": "37000", "high": "37050",
///              "low": "36990", "close": "37020", "volume": "123.4",
///              "turnover": "4567890.1", "confirm": false }] }
/// ```
fn parse_kline(topic: &str, root: &serde_json::Value) -> Result<StreamUpdate> {
    let symbol = topic
        .rsplit('.')
        .next()
        .context("kline topic missing symbol")?
        .to_uppercase();

    let entry = root["data"]
        .as_array()
        .and_then(|rows| rows.last())
        .context("kline message missing data")?;

    let candle = Candle {
        start_ms: entry["start"].as_i64().context("missing kline start")?,
        open: parse_str_f64(&entry["open"]).context("bad kline open")?,
        high: parse_str_f64(&entry["high"]).context("bad kline high")?,
        low: parse_str_f64(&entry["low"]).context("bad kline low")?,
        close: parse_str_f64(&entry["close"]).context("bad kline close")?,
        volume: parse_str_f64(&entry["volume"]).context("bad kline volume")?,
        turnover: parse_str_f64(&entry["turnover"]).unwrap_or(0.0),
        confirmed: entry["confirm"].as_bool().unwrap_or(false),
    };

    Ok(StreamUpdate::Kline { symbol, candle })
}

/// Exchange payloads carry numbers as JSON strings; accept both.
fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_orderbook_snapshot() {
        let json = r#"{
            "topic": "orderbook.50.BTCUSDT",
            "type": "snapshot",
            "data": {
                "s": "BTCUSDT",
                "b": [["59990.0", "1.5"], ["59980.0", "2.0"]],
                "a": [["60010.0", "1.0"]],
                "u": 1, "seq": 100
            }
        }"#;
        let update = parse_message(json).expect("should parse");
        match update {
            StreamUpdate::OrderBook(book) => {
                assert_eq!(book.symbol, "BTCUSDT");
                assert!(book.is_snapshot);
                assert_eq!(book.bids.len(), 2);
                assert_eq!(book.asks, vec![(60_010.0, 1.0)]);
            }
            other => panic!("expected orderbook, got {other:?}"),
        }
    }

    #[test]
    fn parse_orderbook_delta_with_zero_size() {
        let json = r#"{
            "topic": "orderbook.50.ETHUSDT",
            "type": "delta",
            "data": { "s": "ETHUSDT", "b": [["3000.0", "0"]], "a": [] }
        }"#;
        match parse_message(json).unwrap() {
            StreamUpdate::OrderBook(book) => {
                assert!(!book.is_snapshot);
                assert_eq!(book.bids, vec![(3000.0, 0.0)]);
                assert!(book.asks.is_empty());
            }
            other => panic!("expected orderbook, got {other:?}"),
        }
    }

    #[test]
    fn parse_ticker_partial_delta() {
        let json = r#"{
            "topic": "tickers.SOLUSDT",
            "type": "delta",
            "data": { "symbol": "SOLUSDT", "fundingRate": "0.00012" }
        }"#;
        match parse_message(json).unwrap() {
            StreamUpdate::Ticker {
                symbol,
                last_price,
                funding_rate,
            } => {
                assert_eq!(symbol, "SOLUSDT");
                assert_eq!(last_price, None);
                assert_eq!(funding_rate, Some(0.00012));
            }
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[test]
    fn parse_kline_message() {
        let json = r#"{
            "topic": "kline.1.BTCUSDT",
            "data": [{
                "start": 1700000000000,
                "end": 1700000059999,
                "interval": "1",
                "open": "37000.0",
                "high": "37050.0",
                "low": "36990.0",
                "close": "37020.0",
                "volume": "123.456",
                "turnover": "4567890.12",
                "confirm": true
            }]
        }"#;
        match parse_message(json).unwrap() {
            StreamUpdate::Kline { symbol, candle } => {
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(candle.start_ms, 1_700_000_000_000);
                assert!((candle.close - 37_020.0).abs() < f64::EPSILON);
                assert!(candle.confirmed);
            }
            other => panic!("expected kline, got {other:?}"),
        }
    }

    #[test]
    fn subscription_ack_is_control() {
        let json = r#"{ "success": true, "op": "subscribe", "conn_id": "abc" }"#;
        assert!(matches!(parse_message(json).unwrap(), StreamUpdate::Control));
    }

    #[test]
    fn pong_is_control() {
        let json = r#"{ "op": "pong" }"#;
        assert!(matches!(parse_message(json).unwrap(), StreamUpdate::Control));
    }
}
