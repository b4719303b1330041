//! Private reviews: auth, startDateTime and per-business-unit bookmarks

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tap_trustpilot::http::{ApiRequest, RequestBody};
use tap_trustpilot::state::StateDocument;
use tap_trustpilot::streams::incremental::bookmark_key;

use crate::support::{
    catalog_selecting, config_with_credentials, is_token_request, ok, path_of, run_sync,
    token_response, MockApi,
};

const STREAM: &str = "private_reviews";

fn private_review(id: &str, created_at: Value) -> Value {
    json!({"id": id, "stars": 2, "createdAt": created_at, "consumer": {"id": "c1"}})
}

/// Private reviews API answering with `pages[business_unit_id]`
fn private_api(responses: Vec<(&'static str, Vec<Value>)>) -> Arc<MockApi> {
    MockApi::new(move |request| {
        if is_token_request(request) {
            return token_response();
        }
        let path = path_of(request);
        for (business_unit_id, reviews) in &responses {
            if path == format!("/private/business-units/{business_unit_id}/reviews") {
                return ok(json!({ "reviews": reviews }));
            }
        }
        panic!("unexpected request to {path}")
    })
}

fn data_requests(api: &MockApi) -> Vec<ApiRequest> {
    api.requests()
        .into_iter()
        .filter(|request| !is_token_request(request))
        .collect()
}

#[tokio::test]
async fn test_bookmark_written_and_used_on_next_run() {
    let mut config = config_with_credentials();
    config.start_date = Some("2021-01-01T00:00:00Z".to_string());

    let first_api = private_api(vec![(
        "bu1",
        vec![
            private_review("p1", json!("2021-05-01T10:00:00Z")),
            private_review("p2", json!("2021-05-03T08:30:00.250000Z")),
            private_review("p3", json!("2021-05-02T00:00:00Z")),
        ],
    )]);
    let first = run_sync(
        config.clone(),
        catalog_selecting(&[STREAM]),
        StateDocument::new(),
        first_api.clone(),
    )
    .await;

    assert_eq!(first.summary().records(STREAM), Some(3));
    assert_eq!(
        data_requests(&first_api)[0].query_param("startDateTime"),
        Some("2021-01-01T00:00:00.000000Z")
    );
    assert_eq!(
        first.state.bookmark(STREAM, &bookmark_key("bu1")),
        Some("2021-05-03T08:30:00.250000Z")
    );

    // bookmark checkpointed before the final clear
    let with_bookmark = &first.checkpoints[first.checkpoints.len() - 2];
    assert_eq!(with_bookmark.currently_syncing(), Some(STREAM));
    assert!(with_bookmark.bookmark(STREAM, &bookmark_key("bu1")).is_some());

    let second_api = private_api(vec![("bu1", Vec::new())]);
    let second = run_sync(
        config,
        catalog_selecting(&[STREAM]),
        first.state.clone(),
        second_api.clone(),
    )
    .await;

    assert_eq!(
        data_requests(&second_api)[0].query_param("startDateTime"),
        Some("2021-05-03T08:30:00.251000Z")
    );
    assert_eq!(second.summary().records(STREAM), Some(0));
    assert_eq!(
        second.state.bookmark(STREAM, &bookmark_key("bu1")),
        Some("2021-05-03T08:30:00.250000Z")
    );
}

#[tokio::test]
async fn test_bookmark_never_moves_backwards() {
    let mut state = StateDocument::new();
    state.set_bookmark(STREAM, &bookmark_key("bu1"), "2021-06-01T00:00:00.000000Z");

    let api = private_api(vec![(
        "bu1",
        vec![private_review("old", json!("2021-05-01T00:00:00Z"))],
    )]);
    let output = run_sync(
        config_with_credentials(),
        catalog_selecting(&[STREAM]),
        state,
        api,
    )
    .await;

    assert_eq!(output.summary().records(STREAM), Some(1));
    assert_eq!(
        output.state.bookmark(STREAM, &bookmark_key("bu1")),
        Some("2021-06-01T00:00:00.000000Z")
    );
}

#[tokio::test]
async fn test_no_bookmark_without_dates() {
    let api = private_api(vec![(
        "bu1",
        vec![
            private_review("p1", Value::Null),
            json!({"id": "p2", "stars": 1}),
        ],
    )]);
    let output = run_sync(
        config_with_credentials(),
        catalog_selecting(&[STREAM]),
        StateDocument::new(),
        api.clone(),
    )
    .await;

    assert_eq!(output.summary().records(STREAM), Some(2));
    assert_eq!(output.state.bookmark(STREAM, &bookmark_key("bu1")), None);
    assert!(data_requests(&api)[0].query_param("startDateTime").is_none());
}

#[tokio::test]
async fn test_bookmarks_kept_per_business_unit_and_token_fetched_once() {
    let seen_names = Arc::new(Mutex::new(Vec::new()));
    let names = seen_names.clone();
    let api = MockApi::new(move |request| {
        if is_token_request(request) {
            return token_response();
        }
        let path = path_of(request);
        match path {
            "/business-units/find" => {
                let name = request.query_param("name").unwrap().to_string();
                names.lock().unwrap().push(name.clone());
                ok(json!({"id": format!("id-{name}"), "displayName": name}))
            }
            "/private/business-units/id-a.com/reviews" => ok(json!({
                "reviews": [private_review("a1", json!("2021-03-01T00:00:00Z"))]
            })),
            "/private/business-units/id-b.com/reviews" => ok(json!({
                "reviews": [private_review("b1", json!("2021-04-01T00:00:00Z"))]
            })),
            other => panic!("unexpected request to {other}"),
        }
    });

    let mut config = config_with_credentials();
    config.business_unit_id = None;
    config.business_units = serde_json::from_value(json!(["a.com", "b.com"])).unwrap();

    let output = run_sync(
        config,
        catalog_selecting(&[STREAM]),
        StateDocument::new(),
        api.clone(),
    )
    .await;

    assert_eq!(*seen_names.lock().unwrap(), vec!["a.com", "b.com"]);
    assert_eq!(
        output.state.bookmark(STREAM, &bookmark_key("id-a.com")),
        Some("2021-03-01T00:00:00.000000Z")
    );
    assert_eq!(
        output.state.bookmark(STREAM, &bookmark_key("id-b.com")),
        Some("2021-04-01T00:00:00.000000Z")
    );

    let token_requests: Vec<ApiRequest> = api
        .requests()
        .into_iter()
        .filter(is_token_request)
        .collect();
    assert_eq!(token_requests.len(), 1);
    assert!(matches!(token_requests[0].body, RequestBody::Form(_)));

    for request in data_requests(&api) {
        if path_of(&request).starts_with("/private/") {
            assert_eq!(request.header("Authorization"), Some("Bearer tok-123"));
        }
    }

    let records = output.records(STREAM);
    assert_eq!(records[0]["business_unit_id"], "id-a.com");
    assert_eq!(records[1]["business_unit_id"], "id-b.com");
}

#[tokio::test]
async fn test_missing_credentials_fail_before_any_data_request() {
    let api = private_api(vec![("bu1", Vec::new())]);
    let output = run_sync(
        crate::support::config(),
        catalog_selecting(&[STREAM]),
        StateDocument::new(),
        api.clone(),
    )
    .await;

    let err = output.result.unwrap_err();
    assert!(err.to_string().contains("client_secret"));
    assert!(api.requests().is_empty());
}
