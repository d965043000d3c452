//! Integration tests for the generic dispatcher using wiremock.
//!
//! Each test checks API-contract conformance: calling operation X with
//! arguments Y produces a request to route Z, and the response (or the
//! SDK-side failure) comes back in the standard envelope.

use falcon_sdk::auth::TokenProvider;
use falcon_sdk::client::FalconClient;
use falcon_sdk::error::FalconError;
use falcon_sdk::request::{FilePart, Request};
use falcon_sdk::response::{Body, NO_CONTENT_MESSAGE};
use serde_json::{Map, json};
use wiremock::matchers::{
    body_json, body_string_contains, header, method, path, query_param, query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper: creates a mock FalconClient pointed at the given wiremock server.
fn mock_client(server: &MockServer) -> FalconClient {
    let tp = TokenProvider::with_token("mock-token");
    FalconClient::with_base_url(tp, &server.uri()).unwrap()
}

// ── routing and query mapping ──────────────────────────────────────────

#[tokio::test]
async fn keyword_arguments_reach_the_query_string() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("GET"))
        .and(path("/devices/queries/devices/v1"))
        .and(query_param("filter", "platform_name:'Linux'"))
        .and(query_param("limit", "2"))
        .and(query_param_is_missing("bogus"))
        .and(header("Authorization", "Bearer mock-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": {"pagination": {"offset": 0, "limit": 2, "total": 2}},
            "resources": ["aid-1", "aid-2"],
            "errors": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client
        .command(
            &Request::new("QueryDevicesByFilter")
                .arg("filter", "platform_name:'Linux'")
                .arg("limit", 2)
                .arg("bogus", "dropped"),
        )
        .await;

    assert_eq!(response.status_code, 200);
    assert_eq!(response.resources().len(), 2);
    assert_eq!(response.pagination().unwrap().total, Some(2));
}

#[tokio::test]
async fn sdk_header_is_sent() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("GET"))
        .and(path("/sensors/queries/installers/ccid/v1"))
        .and(header(
            "CrowdStrike-SDK",
            client.config().user_agent.as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resources": ["CCID-1"]})))
        .expect(1)
        .mount(&server)
        .await;

    let response = client
        .command(&Request::new("GetSensorInstallersCCIDByQuery"))
        .await;
    assert_eq!(response.status_code, 200);
}

#[tokio::test]
async fn ids_move_into_the_body_for_flagged_operations() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("POST"))
        .and(path("/devices/entities/devices-actions/v2"))
        .and(query_param("action_name", "contain"))
        .and(body_json(json!({"ids": ["aid-1", "aid-2"]})))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "resources": [{"id": "aid-1"}, {"id": "aid-2"}],
            "errors": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client
        .command(
            &Request::new("PerformActionV2")
                .arg("action_name", "contain")
                .ids(["aid-1", "aid-2"]),
        )
        .await;

    assert_eq!(response.status_code, 202);
}

#[tokio::test]
async fn path_arguments_fill_the_route() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("POST"))
        .and(path("/sensors/entities/datafeed-actions/v1/3"))
        .and(query_param("action_name", "refresh_active_stream_session"))
        .and(query_param("appId", "siem-connector"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resources": []})))
        .expect(1)
        .mount(&server)
        .await;

    let response = client
        .command(
            &Request::new("refreshActiveStreamSession")
                .path_arg("partition", 3)
                .arg("action_name", "refresh_active_stream_session")
                .arg("appId", "siem-connector"),
        )
        .await;

    assert_eq!(response.status_code, 200);
}

#[tokio::test]
async fn manual_requests_use_method_and_route_as_given() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("GET"))
        .and(path("/some/new/route/v9"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resources": ["x"]})))
        .expect(1)
        .mount(&server)
        .await;

    let mut params = Map::new();
    params.insert("limit".to_string(), json!(1));
    let response = client
        .command(&Request::manual("GET", "/some/new/route/v9").parameters(params))
        .await;
    assert_eq!(response.resources(), &[json!("x")]);
}

#[tokio::test]
async fn multipart_upload_carries_fields_and_file() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("POST"))
        .and(path("/samples/entities/samples/v3"))
        .and(body_string_contains("name=\"file_name\""))
        .and(body_string_contains("filename=\"eicar.com\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": [{"sha256": "abc", "file_name": "eicar.com"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client
        .command(
            &Request::new("UploadSampleV3")
                .data([("file_name", "eicar.com"), ("comment", "test upload")])
                .file(FilePart::new("sample", "eicar.com", b"X5O!P%@AP".to_vec())),
        )
        .await;
    assert_eq!(response.status_code, 200);
}

// ── response normalization ─────────────────────────────────────────────

#[tokio::test]
async fn vendor_errors_are_relayed_verbatim() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    let vendor = json!({
        "meta": {"query_time": 0.001, "trace_id": "trace-1"},
        "errors": [{"code": 404, "message": "Not Found"}],
        "resources": []
    });
    Mock::given(method("GET"))
        .and(path("/devices/entities/devices/v2"))
        .respond_with(ResponseTemplate::new(404).set_body_json(vendor.clone()))
        .mount(&server)
        .await;

    let response = client
        .command(&Request::new("GetDeviceDetailsV2").ids(["missing"]))
        .await;
    assert_eq!(response.status_code, 404);
    assert_eq!(response.json_body(), Some(&vendor));

    // The typed path turns the same response into FalconError::Api.
    let err = client
        .call::<serde_json::Value>(&Request::new("GetDeviceDetailsV2").ids(["missing"]))
        .await
        .unwrap_err();
    match err {
        FalconError::Api { status, body } => {
            assert_eq!(status.as_u16(), 404);
            assert!(body.contains("Not Found"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_json_body_becomes_no_content_error() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("DELETE"))
        .and(path("/real-time-response/entities/sessions/v1"))
        .and(query_param("session_id", "s-1"))
        .respond_with(ResponseTemplate::new(204).insert_header("content-type", "application/json"))
        .mount(&server)
        .await;

    let response = client
        .command(&Request::new("RTR_DeleteSession").arg("session_id", "s-1"))
        .await;
    assert_eq!(response.status_code, 204);
    assert_eq!(response.first_error_message(), Some(NO_CONTENT_MESSAGE));
}

#[tokio::test]
async fn binary_downloads_are_kept_as_bytes() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("GET"))
        .and(path("/sensors/entities/download-installer/v1"))
        .and(query_param("id", "sha-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .set_body_bytes(b"\x7fELF-installer".to_vec()),
        )
        .mount(&server)
        .await;

    let response = client
        .command(&Request::new("DownloadSensorInstallerById").arg("id", "sha-1"))
        .await;
    assert!(matches!(response.body, Body::Binary(_)));
    assert_eq!(response.bytes().unwrap().as_ref(), b"\x7fELF-installer");

    let streamed = client
        .stream(&Request::new("DownloadSensorInstallerById").arg("id", "sha-1"))
        .await
        .unwrap();
    assert_eq!(streamed.bytes().await.unwrap().len(), 14);
}

// ── synthetic errors ───────────────────────────────────────────────────

#[tokio::test]
async fn unknown_operation_yields_418() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    let response = client.command(&Request::new("MakeCoffee")).await;
    assert_eq!(response.status_code, 418);
    assert!(response.first_error_message().unwrap().contains("MakeCoffee"));
    assert!(response.resources().is_empty());
}

#[tokio::test]
async fn unsupported_method_yields_405() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    let response = client.command(&Request::manual("TRACE", "/anything")).await;
    assert_eq!(response.status_code, 405);
}

#[tokio::test]
async fn body_validation_failure_yields_400_without_a_request() {
    use falcon_sdk::catalog::ParamKind;
    use falcon_sdk::request::BodyValidator;

    let server = MockServer::start().await;
    let client = mock_client(&server);

    let response = client
        .command(
            &Request::new("RTR_ExecuteCommand")
                .body(json!({"base_command": "ls"}))
                .validate_body(
                    BodyValidator::new()
                        .field("base_command", ParamKind::String)
                        .field("command_string", ParamKind::String)
                        .field("session_id", ParamKind::String)
                        .require("session_id"),
                ),
        )
        .await;
    assert_eq!(response.status_code, 400);
    assert_eq!(
        response.first_error_message(),
        Some("Argument session_id must be specified.")
    );
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn transport_failure_yields_500_with_error_text() {
    // Port 1 is never listening; the connection is refused.
    let client =
        FalconClient::with_base_url(TokenProvider::with_token("t"), "http://127.0.0.1:1").unwrap();

    let response = client
        .command(&Request::new("QueryDevicesByFilter"))
        .await;
    assert_eq!(response.status_code, 500);
    assert!(
        response
            .first_error_message()
            .unwrap()
            .starts_with("network error")
    );

    let err = client
        .execute(&Request::new("QueryDevicesByFilter"))
        .await
        .unwrap_err();
    assert!(matches!(err, FalconError::Network(_)));
}
