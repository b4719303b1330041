//! Consumers stream driven by the ids harvested from reviews

use serde_json::{json, Map};
use std::sync::Arc;
use tap_trustpilot::config::{BusinessUnitNames, ConsumerFetchMode};
use tap_trustpilot::http::RequestBody;
use tap_trustpilot::state::StateDocument;

use crate::support::{
    capture_logs, catalog_selecting, config, ok, page_body, page_of, path_of, run_sync, MockApi,
};

fn reviews_by(consumers: &[&str]) -> serde_json::Value {
    let reviews: Vec<_> = consumers
        .iter()
        .enumerate()
        .map(|(n, consumer)| json!({"id": format!("r{n}"), "consumer": {"id": consumer}}))
        .collect();
    json!({ "reviews": reviews })
}

fn api_with_reviews(consumers: &'static [&'static str]) -> Arc<MockApi> {
    MockApi::new(move |request| {
        let path = path_of(request);
        if path == "/business-units/bu1/reviews" {
            return ok(reviews_by(consumers));
        }
        if path == "/consumers/profile/bulk" {
            return ok(json!({
                "consumers": {
                    "c1": {"id": "c1", "displayName": "One"}
                }
            }));
        }
        match path
            .strip_prefix("/consumers/")
            .and_then(|rest| rest.strip_suffix("/profile"))
        {
            Some(id) => ok(json!({"id": id, "displayName": format!("Consumer {id}")})),
            None => panic!("unexpected request to {path}"),
        }
    })
}

#[tokio::test]
async fn test_duplicate_consumers_fetched_once() {
    let api = api_with_reviews(&["c1", "c2", "c1"]);
    let output = run_sync(
        config(),
        catalog_selecting(&["reviews", "consumers"]),
        StateDocument::new(),
        api.clone(),
    )
    .await;

    let profile_paths: Vec<String> = api
        .paths()
        .into_iter()
        .filter(|path| path.starts_with("/consumers/"))
        .collect();
    assert_eq!(profile_paths, vec!["/consumers/c1/profile", "/consumers/c2/profile"]);

    let consumers = output.records("consumers");
    assert_eq!(consumers.len(), 2);
    assert!(consumers.iter().all(|c| c["business_unit_id"] == "bu1"));
    assert_eq!(output.summary().records("consumers"), Some(2));
}

#[tokio::test]
async fn test_reviews_without_consumer_id_are_skipped() {
    let api = MockApi::new(|request| match path_of(request) {
        "/business-units/bu1/reviews" => ok(json!({
            "reviews": [{"id": "r1", "consumer": {}}, {"id": "r2"}]
        })),
        other => panic!("unexpected request to {other}"),
    });
    let output = run_sync(
        config(),
        catalog_selecting(&["reviews", "consumers"]),
        StateDocument::new(),
        api,
    )
    .await;

    assert_eq!(output.summary().records("reviews"), Some(2));
    assert_eq!(output.summary().records("consumers"), Some(0));
}

#[tokio::test]
async fn test_bulk_mode_posts_ids_and_tolerates_omissions() {
    let api = api_with_reviews(&["c2", "c1", "c2"]);
    let mut config = config();
    config.consumer_fetch_mode = ConsumerFetchMode::Bulk;

    let output = run_sync(
        config,
        catalog_selecting(&["reviews", "consumers"]),
        StateDocument::new(),
        api.clone(),
    )
    .await;

    let bulk = api.requests_to("/consumers/profile/bulk");
    assert_eq!(bulk.len(), 1);
    assert_eq!(bulk[0].body, RequestBody::Json(json!({"consumerIds": ["c1", "c2"]})));

    let consumers = output.records("consumers");
    assert_eq!(consumers.len(), 1);
    assert_eq!(consumers[0]["id"], "c1");
    assert_eq!(consumers[0]["business_unit_id"], "bu1");
    assert!(output.result.is_ok());
}

#[tokio::test]
async fn test_consumers_without_reviews_emit_nothing() {
    let api = api_with_reviews(&["c1"]);
    let output = run_sync(
        config(),
        catalog_selecting(&["consumers"]),
        StateDocument::new(),
        api.clone(),
    )
    .await;

    assert!(api.requests().is_empty());
    assert_eq!(output.summary().records("consumers"), Some(0));
    assert_eq!(output.schema_streams(), vec!["consumers"]);
}

fn requested_ids(body: &RequestBody) -> Vec<String> {
    match body {
        RequestBody::Json(body) => body["consumerIds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|id| id.as_str().unwrap().to_string())
            .collect(),
        other => panic!("expected JSON body, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bulk_requests_split_at_chunk_size() {
    let api = MockApi::new(|request| match path_of(request) {
        "/business-units/bu1/reviews" => ok(page_body(1001, page_of(request))),
        "/consumers/profile/bulk" => {
            let profiles: Map<String, serde_json::Value> = requested_ids(&request.body)
                .into_iter()
                .map(|id| (id.clone(), json!({"id": id, "displayName": "Reviewer"})))
                .collect();
            ok(json!({ "consumers": profiles }))
        }
        other => panic!("unexpected request to {other}"),
    });
    let mut config = config();
    config.consumer_fetch_mode = ConsumerFetchMode::Bulk;

    let output = run_sync(
        config,
        catalog_selecting(&["reviews", "consumers"]),
        StateDocument::new(),
        api.clone(),
    )
    .await;

    let sizes: Vec<usize> = api
        .requests_to("/consumers/profile/bulk")
        .iter()
        .map(|request| requested_ids(&request.body).len())
        .collect();
    assert_eq!(sizes, vec![1000, 1]);
    assert_eq!(output.summary().records("consumers"), Some(1001));
    assert_eq!(output.records("consumers").len(), 1001);
}

#[tokio::test]
async fn test_consumers_kept_apart_per_business_unit() {
    let api = MockApi::new(|request| {
        let path = path_of(request);
        match path {
            "/business-units/find" => {
                let name = request.query_param("name").unwrap();
                ok(json!({"id": format!("id-{name}")}))
            }
            "/business-units/id-a/reviews" => ok(reviews_by(&["c1", "c2"])),
            "/business-units/id-b/reviews" => ok(reviews_by(&["c1"])),
            _ => match path
                .strip_prefix("/consumers/")
                .and_then(|rest| rest.strip_suffix("/profile"))
            {
                Some(id) => ok(json!({"id": id})),
                None => panic!("unexpected request to {path}"),
            },
        }
    });
    let mut config = config();
    config.business_units = Some(BusinessUnitNames::Many(vec!["a".to_string(), "b".to_string()]));

    let output = run_sync(
        config,
        catalog_selecting(&["reviews", "consumers"]),
        StateDocument::new(),
        api.clone(),
    )
    .await;

    let profile_paths: Vec<String> = api
        .paths()
        .into_iter()
        .filter(|path| path.starts_with("/consumers/"))
        .collect();
    assert_eq!(
        profile_paths,
        vec!["/consumers/c1/profile", "/consumers/c2/profile", "/consumers/c1/profile"]
    );

    let tagged: Vec<(String, String)> = output
        .records("consumers")
        .iter()
        .map(|record| {
            (
                record["business_unit_id"].as_str().unwrap().to_string(),
                record["id"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        tagged,
        vec![
            ("id-a".to_string(), "c1".to_string()),
            ("id-a".to_string(), "c2".to_string()),
            ("id-b".to_string(), "c1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_resume_at_consumers_fetches_nothing_and_warns() {
    let (logs, _guard) = capture_logs("tap_trustpilot=warn");
    let api = api_with_reviews(&["c1"]);
    let mut state = StateDocument::new();
    state.set_currently_syncing(Some("consumers"));

    let output = run_sync(
        config(),
        catalog_selecting(&["reviews", "consumers"]),
        state,
        api.clone(),
    )
    .await;

    assert!(api.requests().is_empty());
    assert_eq!(output.summary().stream_ids(), vec!["consumers"]);
    assert_eq!(output.summary().records("consumers"), Some(0));
    assert_eq!(output.state.currently_syncing(), None);
    assert!(
        logs.contents().contains("Resumed at consumers"),
        "logs: {}",
        logs.contents()
    );
}
