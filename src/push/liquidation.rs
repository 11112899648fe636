//! Decoding rules for `forceOrder` (liquidation) push events.

use serde_json::Value;

use crate::models::{LiquidationEvent, Side, Venue};

/// Decode one already-unwrapped `forceOrder` event. Requires `e ==
/// "forceOrder"`, a recognized side, and a derivable original/filled
/// quantity; anything else is dropped silently.
pub fn decode_liquidation(symbol: &str, venue: Venue, data: &Value) -> Option<LiquidationEvent> {
    if data.get("e")?.as_str()? != "forceOrder" {
        return None;
    }
    let order = data.get("o")?;
    let side = match order.get("S")?.as_str()? {
        "BUY" => Side::Buy,
        "SELL" => Side::Sell,
        _ => return None,
    };
    let original_quantity: f64 = order.get("q")?.as_str()?.parse().ok()?;
    let filled_quantity: f64 = order.get("z")?.as_str()?.parse().ok()?;

    let price = order
        .get("p")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|p| *p != 0.0)
        .or_else(|| {
            order
                .get("L")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|p| *p != 0.0)
        })
        .or_else(|| {
            order
                .get("ap")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    let event_time = data.get("E").and_then(Value::as_i64)?;
    let trade_time = order.get("T").and_then(Value::as_i64).unwrap_or(event_time);
    let order_id = order.get("i").and_then(Value::as_i64);

    let event_id = LiquidationEvent::derive_event_id(
        venue,
        order_id,
        symbol,
        event_time,
        trade_time,
        side,
        filled_quantity,
    );

    Some(LiquidationEvent {
        event_id,
        symbol: symbol.to_string(),
        venue,
        side,
        price,
        original_quantity,
        filled_quantity,
        event_time,
        trade_time,
        order_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(side: &str, price: &str, l: &str, ap: &str) -> Value {
        json!({
            "e": "forceOrder",
            "E": 1000,
            "o": {
                "s": "BTCUSDT",
                "S": side,
                "q": "1.0",
                "z": "0.5",
                "p": price,
                "L": l,
                "ap": ap,
                "T": 999,
                "i": 555,
            }
        })
    }

    #[test]
    fn decodes_with_price_field_present() {
        let data = sample("SELL", "50000.0", "0", "0");
        let ev = decode_liquidation("BTCUSDT", Venue::UsdtM, &data).unwrap();
        assert_eq!(ev.side, Side::Sell);
        assert_eq!(ev.price, 50000.0);
        assert_eq!(ev.order_id, Some(555));
    }

    #[test]
    fn falls_back_to_last_fill_price_when_price_is_zero() {
        let data = sample("BUY", "0", "49000.0", "0");
        let ev = decode_liquidation("BTCUSDT", Venue::UsdtM, &data).unwrap();
        assert_eq!(ev.price, 49000.0);
    }

    #[test]
    fn falls_back_to_average_price_then_zero() {
        let data = sample("BUY", "0", "0", "48000.0");
        let ev = decode_liquidation("BTCUSDT", Venue::UsdtM, &data).unwrap();
        assert_eq!(ev.price, 48000.0);
    }

    #[test]
    fn ignores_non_force_order_events() {
        let data = json!({"e": "aggTrade"});
        assert!(decode_liquidation("BTCUSDT", Venue::UsdtM, &data).is_none());
    }

    #[test]
    fn event_id_falls_back_to_composite_key_without_order_id() {
        let mut data = sample("SELL", "50000.0", "0", "0");
        data["o"].as_object_mut().unwrap().remove("i");
        let ev = decode_liquidation("BTCUSDT", Venue::UsdtM, &data).unwrap();
        assert!(ev.event_id.contains("BTCUSDT"));
        assert_eq!(ev.order_id, None);
    }
}
