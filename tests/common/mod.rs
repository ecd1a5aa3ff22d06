#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Value, json};

use trsync::SyncEngine;
use trsync::config::Config;
use trsync::transport::client::{Transport, TransportSettings};
use trsync::transport::mock::{MockReply, MockWire, RecordingSleeper};

pub const HOST: &str = "https://example.testrail.io";

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.remote.host = HOST.to_string();
    config.remote.username = "user@example.com".to_string();
    config.remote.password = "hunter2".to_string();
    config
}

pub struct Harness {
    pub wire: MockWire,
    pub sleeper: RecordingSleeper,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            wire: MockWire::new(),
            sleeper: RecordingSleeper::new(),
        }
    }

    pub fn transport(&self, config: &Config) -> Transport {
        Transport::new(
            Arc::new(self.wire.clone()),
            TransportSettings::from_config(config),
        )
        .with_sleeper(Arc::new(self.sleeper.clone()))
    }

    pub fn engine(&self, config: Config) -> SyncEngine {
        let transport = self.transport(&config);
        SyncEngine::with_transport(config, transport)
    }
}

/// Envelope page for the `cases` collection with two items per page.
pub fn cases_page(ids: std::ops::Range<u64>, next: Option<&str>) -> Value {
    let cases: Vec<Value> = ids.map(|id| json!({"id": id, "suite_id": 2})).collect();
    json!({
        "offset": 0,
        "limit": 2,
        "size": cases.len(),
        "_links": {"next": next.map(|n| format!("/api/v2/{n}")), "prev": null},
        "cases": cases,
    })
}

/// Answer `path` with `body` on every GET.
pub fn serve(wire: &MockWire, path: &str, body: Value) {
    wire.always(&format!("GET {path}"), MockReply::json(200, body));
}

pub fn ids(items: &[Value]) -> Vec<u64> {
    items.iter().filter_map(|i| i["id"].as_u64()).collect()
}
