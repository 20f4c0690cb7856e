use serde_json::json;

use crate::{
    nanos_from_secs, EventRecord, FieldValue, LineError, LineEvent, OrderBookSnapshot, Trade,
};

#[test]
fn test_full_line_format() {
    let line = LineEvent::new("trades")
        .tag("symbol", "BTC-USD")
        .field("price", 100.5)
        .field("n", 3i64)
        .field("ok", true)
        .field("note", "a \"b\"\nc\\")
        .at(123)
        .to_line()
        .unwrap();
    assert_eq!(
        line,
        concat!(
            r#"trades,symbol=BTC-USD price=100.5,n=3i,ok=t,note="a \"b\"\nc\\" 123"#,
            "\n"
        )
    );
}

#[test]
fn test_floats_keep_a_decimal_point() {
    let line = LineEvent::new("t")
        .field("a", 100.0)
        .field("b", -0.25)
        .field("c", 1e21)
        .to_line()
        .unwrap();
    assert_eq!(line, "t a=100.0,b=-0.25,c=1000000000000000000000.0\n");
}

#[test]
fn test_tag_values_are_escaped() {
    let line = LineEvent::new("t")
        .tag("venue", "New York,=x")
        .field("f", false)
        .to_line()
        .unwrap();
    assert_eq!(line, "t,venue=New\\ York\\,\\=x f=f\n");
}

#[test]
fn test_validation_errors() {
    assert_eq!(
        LineEvent::new("").field("a", 1i64).to_line(),
        Err(LineError::EmptyTable)
    );
    assert_eq!(
        LineEvent::new("t").tag("s", "x").to_line(),
        Err(LineError::NoFields("t".to_string()))
    );
    assert!(matches!(
        LineEvent::new("t").field("bad name", 1i64).to_line(),
        Err(LineError::InvalidName { kind: "field", .. })
    ));
    assert!(matches!(
        LineEvent::new("my table").field("a", 1i64).to_line(),
        Err(LineError::InvalidName { kind: "table", .. })
    ));
    assert_eq!(
        LineEvent::new("t").field("x", f64::NAN).to_line(),
        Err(LineError::NonFinite("x".to_string()))
    );
    assert_eq!(
        LineEvent::new("t")
            .tag("s", "a\nb")
            .field("x", 1i64)
            .to_line(),
        Err(LineError::InvalidTagValue("s".to_string()))
    );
}

#[test]
fn test_trade_line() {
    let trade = Trade {
        exchange: "COINBASE".to_string(),
        symbol: "BTC-USD".to_string(),
        side: "buy".to_string(),
        kind: None,
        price: 42000.5,
        amount: 0.25,
        trade_id: Some("abc".to_string()),
        timestamp_ns: 1_700_000_000_000_000_000,
    };
    assert_eq!(
        LineEvent::trade(&trade).to_line().unwrap(),
        "trades,exchange=COINBASE,symbol=BTC-USD,side=buy,type=unknown \
         price=42000.5,amount=0.25,trade_id=\"abc\" 1700000000000000000\n"
    );
}

fn book() -> OrderBookSnapshot {
    OrderBookSnapshot {
        exchange: "KRAKEN".to_string(),
        symbol: "ETH-USD".to_string(),
        bids: vec![(100.5, 1.0), (100.0, 3.0)],
        asks: vec![(101.0, 2.5), (102.0, 1.0)],
        timestamp_ns: 5,
    }
}

#[test]
fn test_compact_orderbook_line() {
    assert_eq!(
        LineEvent::orderbook_compact(&book(), Some(1))
            .to_line()
            .unwrap(),
        "orderbooks_compact,exchange=KRAKEN,symbol=ETH-USD \
         bids=\"[[100.5,1.0]]\",asks=\"[[101.0,2.5]]\" 5\n"
    );
    let all = LineEvent::orderbook_compact(&book(), None);
    assert_eq!(
        all.fields()[1].1,
        FieldValue::Str("[[101.0,2.5],[102.0,1.0]]".to_string())
    );
}

#[test]
fn test_expanded_orderbook_line() {
    assert_eq!(
        LineEvent::orderbook(&book(), 1).to_line().unwrap(),
        "orderbooks,exchange=KRAKEN,symbol=ETH-USD \
         bid_0_price=100.5,bid_0_size=1.0,ask_0_price=101.0,ask_0_size=2.5 5\n"
    );
}

#[test]
fn test_event_from_json_record() {
    let record: EventRecord = serde_json::from_value(json!({
        "table": "t",
        "tags": {"s": "x"},
        "fields": {"a": 1, "b": 1.5, "c": "z", "d": true},
        "timestamp_ns": 7
    }))
    .unwrap();
    let event = LineEvent::try_from(record).unwrap();
    assert_eq!(event.to_line().unwrap(), "t,s=x a=1i,b=1.5,c=\"z\",d=t 7\n");

    let nested: EventRecord = serde_json::from_value(json!({
        "table": "t",
        "fields": {"a": [1, 2]}
    }))
    .unwrap();
    assert_eq!(
        LineEvent::try_from(nested),
        Err(LineError::UnsupportedValue("a".to_string()))
    );
}

#[test]
fn test_nanos_from_secs() {
    assert_eq!(nanos_from_secs(Some(1.5), 9.0), 1_500_000_000);
    assert_eq!(nanos_from_secs(None, 9.0), 9_000_000_000);
}
