//! API client: authentication, headers, retry and status classification

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tap_trustpilot::http::{
    ApiClient, RawResponse, RequestBody, RequestSender, RetryPolicy, SendError, TransportError,
    AUTH_PATH, PAGINATION_LIMIT_DETAILS,
};

use crate::support::{
    config, config_with_credentials, is_token_request, ok, status, token_response, MockApi,
    BASE_URL,
};

fn client_for(api: &Arc<MockApi>, config: &tap_trustpilot::TapConfig) -> ApiClient {
    let sender: Arc<dyn RequestSender> = api.clone();
    ApiClient::new(config, sender)
}

#[tokio::test]
async fn test_authenticate_uses_basic_header_and_password_grant() {
    let api = MockApi::new(|request| {
        if is_token_request(request) {
            token_response()
        } else {
            ok(json!({"id": "bu1"}))
        }
    });
    let config = config_with_credentials();
    let mut client = client_for(&api, &config);

    client.ensure_auth(&config).await.unwrap();
    client.ensure_auth(&config).await.unwrap();
    assert!(client.is_authenticated());

    client.get("/business-units/bu1/profileinfo", &[], "business_units").await.unwrap();

    let requests = api.requests();
    assert_eq!(requests.len(), 2, "token requested exactly once");

    let token = &requests[0];
    assert_eq!(token.url, format!("{BASE_URL}{AUTH_PATH}"));
    assert_eq!(token.header("Authorization"), Some("Basic a2V5OnNlY3JldA=="));
    assert_eq!(
        token.body,
        RequestBody::Form(vec![
            ("grant_type".to_string(), "password".to_string()),
            ("username".to_string(), "user@example.com".to_string()),
            ("password".to_string(), "hunter2".to_string()),
        ])
    );

    let data = &requests[1];
    assert_eq!(data.header("apikey"), Some("key"));
    assert_eq!(data.header("authorization"), Some("Bearer tok-123"));
}

#[tokio::test]
async fn test_unauthenticated_requests_omit_bearer() {
    let api = MockApi::new(|_| ok(json!({})));
    let mut config = config();
    config.user_agent = Some("tap-test/1.0".to_string());
    let client = client_for(&api, &config);

    client.get("/business-units/bu1/reviews", &[("page", "1".to_string())], "reviews").await.unwrap();

    let request = &api.requests()[0];
    assert_eq!(request.url, format!("{BASE_URL}/business-units/bu1/reviews"));
    assert_eq!(request.query_param("page"), Some("1"));
    assert_eq!(request.header("apikey"), Some("key"));
    assert_eq!(request.header("User-Agent"), Some("tap-test/1.0"));
    assert!(request.header("Authorization").is_none());
}

#[tokio::test]
async fn test_missing_credentials_named_in_error() {
    let api = MockApi::new(|_| token_response());
    let mut config = config();
    config.username = Some("user@example.com".to_string());
    let mut client = client_for(&api, &config);

    let err = client.authenticate(&config).await.unwrap_err();
    match err {
        TransportError::Auth(message) => {
            assert!(message.contains("client_secret"));
            assert!(message.contains("password"));
            assert!(!message.contains("username"));
        }
        other => panic!("expected auth error, got {other:?}"),
    }
    assert!(api.requests().is_empty());
}

#[tokio::test]
async fn test_token_rejection_is_fatal_without_retry() {
    let api = MockApi::new(|_| status(401, json!({"error": "invalid_grant"})));
    let config = config_with_credentials();
    let mut client = client_for(&api, &config);

    let err = client.authenticate(&config).await.unwrap_err();
    assert!(matches!(err, TransportError::Auth(_)));
    assert_eq!(api.requests().len(), 1);
    assert!(!client.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_backoff_then_success() {
    let mut calls = 0;
    let api = MockApi::new(move |_| {
        calls += 1;
        if calls <= 3 {
            status(429, json!({"message": "Too Many Requests"}))
        } else {
            ok(json!({"id": "bu1"}))
        }
    });
    let client = client_for(&api, &config());

    let body = client.get("/business-units/bu1/profileinfo", &[], "business_units").await.unwrap();
    assert_eq!(body["id"], "bu1");

    let times = api.request_times();
    assert_eq!(times.len(), 4);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    let expected = [2, 4, 8].map(Duration::from_secs);
    for (gap, expected) in gaps.iter().zip(expected) {
        assert!(*gap >= expected, "gap {gap:?} shorter than {expected:?}");
        assert!(*gap < expected + Duration::from_millis(50), "gap {gap:?} too long");
    }
    assert!(gaps.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_exhausted_after_max_attempts() {
    let api = MockApi::new(|_| status(503, json!({})));
    let client = client_for(&api, &config());

    let err = client.get("/business-units/bu1/reviews", &[], "reviews").await.unwrap_err();
    match err {
        TransportError::RateLimited {
            status, attempts, ..
        } => {
            assert_eq!(status, 503);
            assert_eq!(attempts, 10);
        }
        other => panic!("expected rate limit error, got {other:?}"),
    }
    assert_eq!(api.requests().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_and_rate_limit_budgets_are_independent() {
    let mut calls = 0;
    let api = MockApi::new(move |_| {
        calls += 1;
        match calls {
            n if n <= 18 && n % 2 == 1 => Err(SendError::Timeout("read timed out".to_string())),
            n if n <= 18 => status(429, json!({})),
            _ => ok(json!({"reviews": []})),
        }
    });
    let client = client_for(&api, &config()).with_retry_policy(RetryPolicy::new(
        10,
        Duration::from_millis(1),
    ));

    let body = client.get("/business-units/bu1/reviews", &[], "reviews").await.unwrap();
    assert_eq!(body, json!({"reviews": []}));
    assert_eq!(api.requests().len(), 19);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_exhausted() {
    let api = MockApi::new(|_| Err(SendError::Timeout("timed out".to_string())));
    let client = client_for(&api, &config()).with_retry_policy(RetryPolicy::new(
        3,
        Duration::from_millis(10),
    ));

    let err = client.get("/consumers/c1/profile", &[], "consumers").await.unwrap_err();
    assert!(matches!(err, TransportError::Timeout { attempts: 3, .. }));
    assert_eq!(api.requests().len(), 3);
}

#[tokio::test]
async fn test_pagination_limit_returns_empty_array() {
    let api = MockApi::new(|_| status(400, json!({"details": PAGINATION_LIMIT_DETAILS})));
    let client = client_for(&api, &config());

    let body = client.get("/business-units/bu1/reviews", &[], "reviews").await.unwrap();
    assert_eq!(body, Value::Array(Vec::new()));
    assert_eq!(api.requests().len(), 1);
}

#[tokio::test]
async fn test_other_client_errors_are_fatal() {
    let api = MockApi::new(|_| status(404, json!({"details": "Not found"})));
    let client = client_for(&api, &config());

    let err = client.get("/business-units/nope/profileinfo", &[], "business_units").await.unwrap_err();
    match err {
        TransportError::Http { status, body, .. } => {
            assert_eq!(status, 404);
            assert!(body.contains("Not found"));
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }
    assert_eq!(api.requests().len(), 1);
}

#[tokio::test]
async fn test_network_error_not_retried() {
    let api = MockApi::new(|_| Err(SendError::Network("connection refused".to_string())));
    let client = client_for(&api, &config());

    let err = client.get("/business-units/bu1/reviews", &[], "reviews").await.unwrap_err();
    assert!(matches!(err, TransportError::Network(_)));
    assert_eq!(api.requests().len(), 1);
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let api = MockApi::new(|_| Ok(RawResponse::new(200, "")));
    let client = client_for(&api, &config());

    let body = client
        .post("/consumers/profile/bulk", json!({"consumerIds": ["c1"]}), "consumers")
        .await
        .unwrap();
    assert_eq!(body, Value::Null);
    assert_eq!(
        api.requests()[0].body,
        RequestBody::Json(json!({"consumerIds": ["c1"]}))
    );
}
