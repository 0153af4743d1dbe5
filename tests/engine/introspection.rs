//! One-shot stdio introspection against scripted stand-in binaries.

#![cfg(unix)]

use std::time::{Duration, Instant};

use serde_json::Value;

use prisma_engine_host::binaries::platform;
use prisma_engine_host::{
    resolve_path, ChannelError, EngineConfig, EngineKind, IntrospectionEngine, IntrospectionError,
};

use crate::fixture::{fake_engine, ArtifactServer};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_pull_returns_data_model() {
    let dir = tempfile::tempdir().unwrap();
    let request_file = dir.path().join("request");
    let body = format!(
        r#"read -r line
printf '%s\n' "$line" > {}
printf '%s\n' '{{"jsonrpc":"2.0","id":1,"result":{{"dataModel":"model User {{\n  id Int @id\n}}"}}}}'"#,
        request_file.display()
    );
    let binary = fake_engine(dir.path(), "introspection-engine", &body);

    let engine = IntrospectionEngine::with_binary(&binary, TIMEOUT);
    let data_model = engine.pull("datasource db { provider = \"postgresql\" }").await.unwrap();
    assert_eq!(data_model, "model User {\n  id Int @id\n}");

    let request: Value =
        serde_json::from_str(std::fs::read_to_string(&request_file).unwrap().trim()).unwrap();
    assert_eq!(request["jsonrpc"], "2.0");
    assert_eq!(request["method"], "introspect");
    assert_eq!(request["params"][0]["schema"], "datasource db { provider = \"postgresql\" }");
    assert_eq!(request["params"][0]["compositeTypeDepth"], -1);
}

#[tokio::test]
async fn test_engine_error_message_is_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"error":{"code":4466,"message":"An error happened.","data":{"message":"P1001: Cannot reach database server at `localhost`:`5432`"}}}'"#;
    let binary = fake_engine(dir.path(), "introspection-engine", body);

    let engine = IntrospectionEngine::with_binary(&binary, TIMEOUT);
    let err = engine.pull("").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "introspect error: P1001: Cannot reach database server at `localhost`:`5432`"
    );
}

#[tokio::test]
async fn test_result_without_data_model() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"read -r line
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"warnings":[]}}'"#;
    let binary = fake_engine(dir.path(), "introspection-engine", body);

    let engine = IntrospectionEngine::with_binary(&binary, TIMEOUT);
    let err = engine.pull("").await.unwrap_err();
    assert!(matches!(err, IntrospectionError::MissingDataModel(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_hung_engine_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_engine(dir.path(), "introspection-engine", "exec sleep 30");

    let started = Instant::now();
    let engine = IntrospectionEngine::with_binary(&binary, Duration::from_secs(1));
    let err = engine.pull("").await.unwrap_err();

    assert!(
        matches!(err, IntrospectionError::Timeout(d) if d == Duration::from_secs(1)),
        "got {:?}",
        err
    );
    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
}

#[tokio::test]
async fn test_engine_closing_without_answer() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_engine(dir.path(), "introspection-engine", "exit 0");

    let engine = IntrospectionEngine::with_binary(&binary, TIMEOUT);
    let err = engine.pull("").await.unwrap_err();
    assert!(
        matches!(err, IntrospectionError::Channel(ChannelError::Closed | ChannelError::Io(_))),
        "got {:?}",
        err
    );
}

#[tokio::test]
async fn test_new_finds_cached_engine() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default().with_cache_dir(dir.path());

    let cached = resolve_path(
        dir.path(),
        EngineKind::Introspection,
        config.version(EngineKind::Introspection),
        platform::current(),
    );
    std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
    std::fs::write(&cached, b"engine").unwrap();

    let engine = IntrospectionEngine::new(&config).unwrap();
    assert_eq!(engine.path(), cached);
}

#[tokio::test]
async fn test_ensure_downloads_from_schema_host() {
    let server = ArtifactServer::serving_engine().await;
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default()
        .with_cache_dir(dir.path())
        .with_schema_engine_url(server.template());

    let engine = IntrospectionEngine::ensure(&config).await.unwrap();
    assert!(engine.path().is_file());
    assert!(engine.path().starts_with(dir.path()));
    assert_eq!(server.hits(), 1);
    assert!(server.paths()[0].ends_with("/introspection-engine.gz"), "{:?}", server.paths());

    IntrospectionEngine::new(&config).unwrap();
    assert_eq!(server.hits(), 1);
}
