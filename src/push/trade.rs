//! Decoding rules for `aggTrade` / `trade` push events.

use serde_json::Value;

use crate::models::{Side, StreamType, Trade, Venue};

/// Decode one already-unwrapped trade/aggTrade payload. Returns `None` when
/// a required field is missing rather than erroring — unknown or malformed
/// events are dropped silently.4.
pub fn decode_trade(symbol: &str, venue: Venue, stream_type: StreamType, data: &Value) -> Option<Trade> {
    let trade_id = match stream_type {
        StreamType::AggTrade => data.get("a")?.as_i64()?,
        StreamType::Trade => data.get("t")?.as_i64()?,
    };
    let price: f64 = data.get("p")?.as_str()?.parse().ok()?;
    let amount: f64 = data.get("q")?.as_str()?.parse().ok()?;
    let is_buyer_maker = data.get("m")?.as_bool()?;
    let direction = if is_buyer_maker { Side::Sell } else { Side::Buy };
    let timestamp = data
        .get("T")
        .and_then(Value::as_i64)
        .or_else(|| data.get("E").and_then(Value::as_i64))?;

    Some(Trade {
        row_id: None,
        symbol: symbol.to_string(),
        venue,
        trade_id,
        timestamp,
        price,
        amount,
        direction,
        stream_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_agg_trade_buy() {
        let data = json!({"a": 101, "p": "100.5", "q": "2.0", "m": false, "T": 1000});
        let t = decode_trade("BTCUSDT", Venue::Spot, StreamType::AggTrade, &data).unwrap();
        assert_eq!(t.trade_id, 101);
        assert_eq!(t.direction, Side::Buy);
        assert_eq!(t.timestamp, 1000);
    }

    #[test]
    fn decodes_trade_sell_with_maker_flag() {
        let data = json!({"t": 55, "p": "1.5", "q": "3.0", "m": true, "E": 2000});
        let t = decode_trade("ETHUSDT", Venue::UsdtM, StreamType::Trade, &data).unwrap();
        assert_eq!(t.trade_id, 55);
        assert_eq!(t.direction, Side::Sell);
        assert_eq!(t.timestamp, 2000);
    }

    #[test]
    fn missing_required_field_drops_event() {
        let data = json!({"a": 101, "p": "100.5"});
        assert!(decode_trade("BTCUSDT", Venue::Spot, StreamType::AggTrade, &data).is_none());
    }
}
