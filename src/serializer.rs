//! `Bar` slice -> Binance-wire-compatible nested JSON array, byte for byte
//! the same shape as the upstream `/fapi/v1/klines` response.
//!
//! Grounded on the Python `infra/serialization/__init__.py::serialize_binance_klines`
//! directly; the teacher has no counterpart — it serves plain `Candle`
//! structs, not the nested-array wire format.

use crate::model::Bar;
use serde_json::{Value, json};

/// Serializes `bars` (expected ascending by `open_time`) into the 12-element
/// array shape:
/// `[open_time, open, high, low, close, volume, close_time, quote_volume,
///   trades, taker_buy_base, taker_buy_quote, "0"]`.
/// Price/volume fields are decimal strings from the platform's default f64
/// formatting; `open_time`/`close_time`/`trades` are numbers; the trailing
/// field is the literal string `"0"`.
pub fn serialize_bars(bars: &[Bar]) -> Vec<u8> {
    let rows: Vec<Value> = bars
        .iter()
        .map(|b| {
            json!([
                b.open_time,
                b.open.to_string(),
                b.high.to_string(),
                b.low.to_string(),
                b.close.to_string(),
                b.volume.to_string(),
                b.close_time,
                b.quote_volume.to_string(),
                b.trades,
                b.taker_buy_base.to_string(),
                b.taker_buy_quote.to_string(),
                "0",
            ])
        })
        .collect();
    serde_json::to_vec(&Value::Array(rows)).expect("a Vec<Value> of primitives never fails to serialize")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeframe::Timeframe;

    #[test]
    fn serializes_in_the_exact_positional_order() {
        let bar = Bar::closed("BTCUSDT", Timeframe::M1, 60_000, 1.0, 2.0, 0.5, 1.5, 10.0, 15.0, 3, 4.0, 6.0);
        let bytes = serialize_bars(&[bar]);
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        let row = parsed[0].as_array().unwrap();
        assert_eq!(row.len(), 12);
        assert_eq!(row[0], json!(60_000));
        assert_eq!(row[1], json!("1"));
        assert_eq!(row[6], json!(119_999));
        assert_eq!(row[8], json!(3));
        assert_eq!(row[11], json!("0"));
    }

    #[test]
    fn an_empty_slice_serializes_to_an_empty_array() {
        assert_eq!(serialize_bars(&[]), b"[]".to_vec());
    }
}
