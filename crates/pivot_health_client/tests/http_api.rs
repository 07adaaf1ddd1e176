use chrono::{TimeZone, Utc};
use pivot_health_client::http_client::ReqwestHealthClient;
use pivot_health_client::{HealthDataApi, HealthRecord, PivotError, RecordSpan, UploadBatch};
use secrecy::SecretString;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sample_batch() -> UploadBatch {
    let span = RecordSpan::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
    )
    .unwrap();
    UploadBatch::from_records(&[
        HealthRecord::quantity("stepCount", span, 9000.0, "count", None),
        HealthRecord::category("sleepAnalysis", span, 0),
    ])
}

#[tokio::test]
async fn upload_puts_json_with_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/gimmeData/tok"))
        .and(header("content-type", "application/json; charset=utf-8"))
        .and(header("accept", "application/json; charset=utf-8"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = ReqwestHealthClient::new(&server.uri());
    let status = client
        .upload_health_data(&SecretString::new("tok".into()), None, &sample_batch())
        .await
        .expect("upload");
    assert_eq!(status, 200);

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["data"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(body["data"][0]["type"], "stepCount");
    assert_eq!(body["data"][1]["value"], "inBed");
    assert!(body["dailySummary"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn upload_uses_endpoint_template() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/custom/tok/ingest"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = ReqwestHealthClient::new("http://unused.invalid");
    let template = format!("{}/custom/{{accessToken}}/ingest", server.uri());
    client
        .upload_health_data(
            &SecretString::new("tok".into()),
            Some(&template),
            &sample_batch(),
        )
        .await
        .expect("upload");
}

#[tokio::test]
async fn upload_maps_401_to_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = ReqwestHealthClient::new(&server.uri());
    let res = client
        .upload_health_data(&SecretString::new("tok".into()), None, &sample_batch())
        .await;
    assert!(matches!(res, Err(PivotError::Unauthorized)));
}

#[tokio::test]
async fn upload_maps_other_codes_to_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = ReqwestHealthClient::new(&server.uri());
    let res = client
        .upload_health_data(&SecretString::new("tok".into()), None, &sample_batch())
        .await;
    assert!(matches!(res, Err(PivotError::UnknownUploadResponseCode(503))));
}

#[tokio::test]
async fn refresh_parses_token_pair() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/reAuth/old/ref"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "new",
            "refreshToken": "ref2",
            "dataPath": "/v1/gimmeData/{accessToken}"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = ReqwestHealthClient::new(&server.uri());
    let tokens = client
        .refresh_tokens(
            &SecretString::new("old".into()),
            &SecretString::new("ref".into()),
        )
        .await
        .expect("refresh");
    assert_eq!(tokens.access_token, "new");
    assert_eq!(tokens.refresh_token, "ref2");
}

#[tokio::test]
async fn refresh_empty_body_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/reAuth/old/ref"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = ReqwestHealthClient::new(&server.uri());
    let res = client
        .refresh_tokens(
            &SecretString::new("old".into()),
            &SecretString::new("ref".into()),
        )
        .await;
    assert!(matches!(res, Err(PivotError::EmptyRefreshResponse)));
}

#[tokio::test]
async fn refresh_invalid_body_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/reAuth/old/ref"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"accessToken\": 1}"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/reAuth/gone/ref"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = ReqwestHealthClient::new(&server.uri());
    let refresh = SecretString::new("ref".into());
    let res = client
        .refresh_tokens(&SecretString::new("old".into()), &refresh)
        .await;
    assert!(matches!(res, Err(PivotError::InvalidRefreshResponse(_))));

    let res = client
        .refresh_tokens(&SecretString::new("gone".into()), &refresh)
        .await;
    assert!(matches!(res, Err(PivotError::UnknownRefreshResponseCode(403))));
}
