//! API capture tests against a mock HTTP server
//!
//! Payloads must land byte-for-byte; HTTP errors, malformed payloads and
//! transport failures are isolated to their endpoint.

mod common;

use anyhow::Result;
use common::{at, init_tracing};
use lakehouse_common::{ExtractionMode, LakeError, SourceDescriptor, SourceKind};
use lakehouse_ingest::capture::{ApiCapture, ApiEndpoint};
use lakehouse_ingest::source::http::DEFAULT_TIMEOUT;
use lakehouse_ingest::source::ReqwestSource;
use lakehouse_ingest::storage::{MemoryStore, ObjectStore, CONTENT_TYPE_JSON};
use lakehouse_ingest::FixedClock;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const UFS: &str = r#"[{"id":12,"sigla":"AC","nome":"Acre","regiao":{"id":1,"sigla":"N","nome":"Norte"}},
 {"id":27,"sigla":"AL","nome":"Alagoas","regiao":{"id":2,"sigla":"NE","nome":"Nordeste"}}]"#;

fn endpoint(server: &MockServer, entity: &str, route: &str) -> ApiEndpoint {
    ApiEndpoint {
        descriptor: SourceDescriptor::new("api", entity, SourceKind::Api, ExtractionMode::Full),
        url: format!("{}{}", server.uri(), route),
    }
}

fn capture(store: &Arc<MemoryStore>) -> Result<ApiCapture> {
    Ok(ApiCapture::new(
        store.clone(),
        Arc::new(ReqwestSource::new(DEFAULT_TIMEOUT)?),
        Arc::new(FixedClock(at(2024, 5, 10, 8, 15, 0))),
    ))
}

#[tokio::test]
async fn test_payload_is_stored_verbatim() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/localidades/estados"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(UFS, "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let result = capture(&store)?
        .capture(&endpoint(&server, "ibge-uf", "/localidades/estados"))
        .await?;

    assert_eq!(result.rows_written, 2);
    assert!(result.watermark.is_none());
    let artifact = result.artifact.expect("artifact");
    assert_eq!(
        artifact.key,
        "bronze/api/ibge-uf/date=20240510/ibge-uf_20240510_081500.json"
    );
    assert_eq!(artifact.size, UFS.len() as u64);
    assert_eq!(store.get(&artifact.key).await?, UFS.as_bytes());
    assert_eq!(
        store.content_type(&artifact.key).await.as_deref(),
        Some(CONTENT_TYPE_JSON)
    );
    Ok(())
}

#[tokio::test]
async fn test_single_object_counts_as_one_record() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let result = capture(&store)?
        .capture(&endpoint(&server, "status", "/status"))
        .await?;
    assert_eq!(result.rows_written, 1);
    Ok(())
}

#[tokio::test]
async fn test_http_error_writes_nothing() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let err = capture(&store)?
        .capture(&endpoint(&server, "ibge-uf", "/localidades/estados"))
        .await
        .unwrap_err();

    match err {
        LakeError::SourceUnavailable { source_id, reason } => {
            assert_eq!(source_id, "api/ibge-uf");
            assert!(reason.contains("HTTP 503"), "{reason}");
        },
        other => panic!("unexpected error {other:?}"),
    }
    assert!(store.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_malformed_json_writes_nothing() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let err = capture(&store)?
        .capture(&endpoint(&server, "ibge-uf", "/"))
        .await
        .unwrap_err();

    assert!(matches!(err, LakeError::SourceUnavailable { .. }));
    assert!(err.to_string().contains("malformed JSON"));
    assert!(store.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_timeout_is_source_unavailable() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("[]")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let api = ApiCapture::new(
        store.clone(),
        Arc::new(ReqwestSource::new(Duration::from_millis(50))?),
        Arc::new(FixedClock(at(2024, 5, 10, 8, 15, 0))),
    );
    let err = api.capture(&endpoint(&server, "slow", "/")).await.unwrap_err();

    assert!(matches!(err, LakeError::SourceUnavailable { .. }));
    Ok(())
}

#[tokio::test]
async fn test_failing_endpoint_does_not_stop_siblings() -> Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/estados"))
        .respond_with(ResponseTemplate::new(200).set_body_string(UFS))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/municipios"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/regioes"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let report = capture(&store)?
        .capture_all(
            "api",
            &[
                endpoint(&server, "estados", "/estados"),
                endpoint(&server, "municipios", "/municipios"),
                endpoint(&server, "regioes", "/regioes"),
            ],
        )
        .await;

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "municipios");
    assert_eq!(store.len().await, 2);

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, LakeError::PartialBatchFailure { failed: 1, total: 3, .. }));
    Ok(())
}
