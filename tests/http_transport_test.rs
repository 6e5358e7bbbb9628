//! HTTP transport integration tests
//!
//! Drives `HttpTransport` against a `wiremock` server and checks that every
//! HTTP outcome lands in the right `StatusCategory`.

mod common;

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::make_transport;
use workdesk::error::ApiError;
use workdesk::transport::http::HttpTransport;
use workdesk::transport::{ApiRequest, ClientErrorKind, StatusCategory, Transport};

#[tokio::test]
async fn test_success_body_is_parsed_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tasks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(1)
        .mount(&server)
        .await;

    let response = make_transport(&server)
        .send(&ApiRequest::get("/tasks"))
        .await;

    assert_eq!(response.status, StatusCategory::Success);
    assert_eq!(response.body, json!([{"id": 1}]));
}

#[tokio::test]
async fn test_empty_body_is_null() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/tasks/4"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let response = make_transport(&server)
        .send(&ApiRequest::delete("/tasks/4"))
        .await;

    assert_eq!(response.status, StatusCategory::Success);
    assert_eq!(response.body, Value::Null);
}

#[tokio::test]
async fn test_text_body_is_kept_as_string() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let result = make_transport(&server)
        .send(&ApiRequest::get("/boards"))
        .await
        .into_result();

    assert_eq!(
        result.unwrap_err(),
        ApiError::ServerFault {
            code: 502,
            message: "bad gateway".to_string()
        }
    );
}

#[tokio::test]
async fn test_request_carries_headers_query_and_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/leaves"))
        .and(header("Authorization", "Bearer abc"))
        .and(query_param("notify", "true"))
        .and(body_json(json!({"days": 3})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9})))
        .expect(1)
        .mount(&server)
        .await;

    let mut request = ApiRequest::post("/leaves", json!({"days": 3}))
        .with_query(vec![("notify".to_string(), "true".to_string())]);
    request.set_bearer("abc");
    let response = make_transport(&server).send(&request).await;

    assert_eq!(response.status, StatusCategory::Success);
    assert_eq!(response.body["id"], json!(9));
}

#[tokio::test]
async fn test_status_codes_are_classified() {
    let server = MockServer::start().await;
    for (code, route) in [
        (401, "/api/s401"),
        (403, "/api/s403"),
        (404, "/api/s404"),
        (409, "/api/s409"),
        (422, "/api/s422"),
        (500, "/api/s500"),
    ] {
        Mock::given(path(route))
            .respond_with(
                ResponseTemplate::new(code).set_body_json(json!({"message": format!("code {}", code)})),
            )
            .mount(&server)
            .await;
    }
    let transport = make_transport(&server);

    let status = |code: u16| {
        let transport = &transport;
        async move {
            transport
                .send(&ApiRequest::get(format!("/s{}", code)))
                .await
                .status
        }
    };

    assert_eq!(status(401).await, StatusCategory::AuthRejected);
    assert_eq!(
        status(403).await,
        StatusCategory::ClientError {
            kind: ClientErrorKind::Other,
            code: 403
        }
    );
    assert_eq!(
        status(404).await,
        StatusCategory::ClientError {
            kind: ClientErrorKind::NotFound,
            code: 404
        }
    );
    assert_eq!(
        status(409).await,
        StatusCategory::ClientError {
            kind: ClientErrorKind::Conflict,
            code: 409
        }
    );
    assert_eq!(
        status(422).await,
        StatusCategory::ClientError {
            kind: ClientErrorKind::Validation,
            code: 422
        }
    );
    assert_eq!(status(500).await, StatusCategory::ServerError { code: 500 });
}

#[tokio::test]
async fn test_validation_message_reaches_caller() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "endDate before startDate"})),
        )
        .mount(&server)
        .await;

    let err = make_transport(&server)
        .send(&ApiRequest::post("/leaves", json!({})))
        .await
        .into_result()
        .unwrap_err();

    assert_eq!(
        err,
        ApiError::ValidationFailed {
            code: 400,
            message: "endDate before startDate".to_string()
        }
    );
}

#[tokio::test]
async fn test_timeout_is_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let transport = HttpTransport::new(
        url::Url::parse(&server.uri()).unwrap(),
        Duration::from_millis(50),
    )
    .unwrap();
    let response = transport.send(&ApiRequest::get("/slow")).await;

    assert_eq!(response.status, StatusCategory::NetworkFailure);
    assert!(matches!(
        response.into_result(),
        Err(ApiError::NetworkFailure(_))
    ));
}
