use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Value, json};

use commons_engine::config::EngineSettings;
use commons_engine::engine::{Engine, InMemoryStore, Snapshot};
use commons_engine::rules::RuleConfig;
use commons_engine::wire::{self, Response};

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 4, 20)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

fn snapshot() -> Snapshot {
    serde_json::from_value(json!({
        "locations": [{ "id": 1, "title": "Workshop" }, { "id": 2, "title": "Shop" }],
        "items": [{ "id": 1, "title": "Cargo bike" }, { "id": 2, "title": "Trailer" }],
        "users": [{ "id": 10, "login": "alice" }, { "id": 99, "login": "admin", "is_admin": true }],
        "timeframes": [
            {
                "id": 1,
                "location_ids": [1],
                "item_ids": [1],
                "kind": "bookable",
                "start": "2024-01-01T00:00:00",
                "repetition": "d",
                "full_day": true
            },
            {
                "id": 2,
                "location_ids": [2],
                "item_ids": [2],
                "kind": "bookable",
                "start": "2024-01-01T00:00:00",
                "repetition": "w",
                "weekdays": [1, 2, 3, 4, 5],
                "full_day": true
            },
            {
                "id": 3,
                "location_ids": [1],
                "item_ids": [1],
                "kind": "holiday",
                "start": "2024-05-20T00:00:00",
                "end": { "bounded": "2024-05-20T23:59:59" },
                "full_day": true
            }
        ]
    }))
    .unwrap()
}

fn engine(rules: Vec<RuleConfig>) -> Engine {
    let store = InMemoryStore::from_snapshot(snapshot()).unwrap();
    Engine::new(Arc::new(store), EngineSettings::default(), Arc::new(rules))
}

fn send(engine: &Engine, request: Value) -> Value {
    let response = wire::handle_line(engine, &request.to_string(), now());
    serde_json::to_value(response).unwrap()
}

fn submit(engine: &Engine, location: u64, first: &str, last: &str) -> Value {
    send(
        engine,
        json!({
            "op": "submit",
            "booking": {
                "location_id": location,
                "item_id": location,
                "start": format!("{first}T00:00:00"),
                "end": format!("{last}T00:00:00"),
                "author": 10
            }
        }),
    )
}

#[test]
fn booking_lifecycle_over_the_wire() {
    let engine = engine(vec![]);

    let saved = submit(&engine, 1, "2024-05-06", "2024-05-07");
    assert_eq!(saved["status"], "ok");
    let id = saved["body"]["timeframe"]["id"].as_u64().unwrap();
    assert_eq!(saved["body"]["timeframe"]["status"], "unconfirmed");
    assert_eq!(
        saved["body"]["timeframe"]["end"],
        json!({ "bounded": "2024-05-07T23:59:59" })
    );

    let clash = submit(&engine, 1, "2024-05-07", "2024-05-08");
    assert_eq!(clash["status"], "rejected");
    assert_eq!(clash["kind"], "overlap");
    assert_eq!(clash["conflicts"], json!([id]));

    let confirmed = send(&engine, json!({ "op": "confirm", "id": id }));
    assert_eq!(confirmed["body"]["timeframe"]["status"], "confirmed");

    let canceled = send(&engine, json!({ "op": "cancel", "id": id }));
    assert_eq!(canceled["body"]["timeframe"]["status"], "canceled");
    assert_eq!(canceled["body"]["cancellation_date"], "2024-04-20T09:00:00");

    assert_eq!(submit(&engine, 1, "2024-05-07", "2024-05-08")["status"], "ok");
}

#[test]
fn holidays_and_weekends_are_reported() {
    let engine = engine(vec![]);

    let holiday = submit(&engine, 1, "2024-05-19", "2024-05-21");
    assert_eq!(holiday["status"], "rejected");
    assert_eq!(holiday["kind"], "unavailable");

    // 2024-05-11 is a Saturday; the shop is open on weekdays only
    let weekend = submit(&engine, 2, "2024-05-11", "2024-05-11");
    assert_eq!(weekend["status"], "error");
    assert_eq!(weekend["kind"], "validation");

    let days = send(
        &engine,
        json!({
            "op": "availability",
            "location_id": 2,
            "item_id": 2,
            "from": "2024-05-10",
            "to": "2024-05-13"
        }),
    );
    let open: Vec<bool> = days["body"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| !d["free"].as_array().unwrap().is_empty())
        .collect();
    assert_eq!(open, vec![true, false, false, true]);
}

#[test]
fn rule_denial_over_the_wire() {
    let rules: Vec<RuleConfig> = serde_json::from_value(json!([
        { "rule-type": "noSimultaneousBooking", "rule-applies-all": "on" }
    ]))
    .unwrap();
    let engine = engine(rules);

    assert_eq!(send(&engine, json!({ "op": "validate_rules" }))["body"]["rules"], 1);
    assert_eq!(submit(&engine, 1, "2024-05-06", "2024-05-07")["status"], "ok");

    let denied = submit(&engine, 2, "2024-05-07", "2024-05-07");
    assert_eq!(denied["status"], "rejected");
    assert_eq!(denied["kind"], "denied");
    assert_eq!(
        denied["message"],
        "You can not book more than one item at a time.\n\
         2024-05-06 - 2024-05-07 | Cargo bike @ Workshop"
    );

    let drafted = send(
        &engine,
        json!({
            "op": "submit",
            "admin": true,
            "booking": {
                "location_id": 2,
                "item_id": 2,
                "start": "2024-05-07T00:00:00",
                "end": "2024-05-07T00:00:00",
                "author": 10
            }
        }),
    );
    assert_eq!(drafted["body"]["outcome"], "drafted");
    assert_eq!(drafted["body"]["booking"]["timeframe"]["status"], "draft");
}

#[test]
fn queries_and_exports() {
    let engine = engine(vec![]);

    let on_holiday = send(
        &engine,
        json!({ "op": "timeframes", "location_ids": [1], "date": "2024-05-20" }),
    );
    let ids: Vec<u64> = on_holiday["body"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tf| tf["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 3]);

    let page = send(
        &engine,
        json!({ "op": "page", "start": "2024-05-01", "end": "2024-05-31", "page": 1, "page_size": 2 }),
    );
    assert_eq!(page["body"]["total_pages"], 2);
    assert_eq!(page["body"]["done"], false);

    let mut state = json!({});
    let mut calls = 0;
    loop {
        calls += 1;
        let chunk = send(
            &engine,
            json!({
                "op": "export",
                "export_type": "all",
                "start": "2024-05-01",
                "end": "2024-06-30",
                "state": state
            }),
        );
        assert_eq!(chunk["status"], "ok");
        state = chunk["body"]["state"].clone();
        if chunk["body"]["done"] == true {
            break;
        }
        assert!(calls < 10, "export never finished");
    }
    assert_eq!(calls, 3);
    assert_eq!(state["relevant_timeframes"], json!([1, 2, 3]));
}

#[test]
fn malformed_lines_are_parse_errors() {
    let engine = engine(vec![]);
    let response = wire::handle_line(&engine, "{not json", now());
    assert!(matches!(response, Response::Error { kind: "parse", .. }));
    let response = wire::handle_line(&engine, r#"{"op":"confirm","id":77}"#, now());
    assert!(matches!(response, Response::Error { kind: "not_found", .. }));
}
