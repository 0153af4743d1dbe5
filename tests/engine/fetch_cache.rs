//! Cache resolution and override tests; none of these may touch the network.

use std::path::Path;
use std::time::{Duration, Instant};

use prisma_engine_host::{resolve_path, EngineConfig, EngineFetcher, EngineKind, FetchError};

use crate::fixture::{closed_port, debian_platform, ArtifactServer};

fn unreachable_template() -> String {
    format!("http://127.0.0.1:{}/{{version}}/{{platform}}/{{engine}}.gz", closed_port())
}

#[test]
fn test_resolve_path_is_pure() {
    let platform = debian_platform();
    let a = resolve_path(Path::new("/cache"), EngineKind::Query, "v1", &platform);
    let b = resolve_path(Path::new("/cache"), EngineKind::Query, "v1", &platform);
    assert_eq!(a, b);
    assert_eq!(
        a.to_string_lossy(),
        "/cache/v1/prisma-query-engine-debian-openssl-3.0.x"
    );
}

#[tokio::test]
async fn test_relative_cache_dir_is_rejected() {
    let server = ArtifactServer::serving_engine().await;
    let config = EngineConfig::default().with_query_engine_url(server.template());
    let fetcher = EngineFetcher::with_platform(config, debian_platform());

    let err = fetcher
        .ensure_in(EngineKind::Query, Path::new("relative/engines"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::RelativeCacheDir(_)), "got {:?}", err);
    assert!(!Path::new("relative").exists());
    assert_eq!(server.hits(), 0);

    let err = fetcher.ensure_in(EngineKind::Query, Path::new("")).await.unwrap_err();
    assert!(matches!(err, FetchError::EmptyCacheDir));
}

#[tokio::test]
async fn test_cached_artifact_skips_network() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default()
        .with_cache_dir(dir.path())
        .with_query_engine_url(unreachable_template());
    let fetcher = EngineFetcher::with_platform(config, debian_platform());

    let path = fetcher.artifact_path(
        EngineKind::Query,
        dir.path(),
        fetcher.config().version(EngineKind::Query),
    );
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"cached").unwrap();

    let start = Instant::now();
    let resolved = fetcher.ensure(EngineKind::Query).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(20), "took {:?}", start.elapsed());
    assert_eq!(resolved, path);
    assert_eq!(std::fs::read(&resolved).unwrap(), b"cached");
}

#[tokio::test]
async fn test_override_wins_over_cache_and_network() {
    let dir = tempfile::tempdir().unwrap();
    let binary = dir.path().join("my-query-engine");
    std::fs::write(&binary, b"custom").unwrap();

    let server = ArtifactServer::serving_engine().await;
    let config = EngineConfig::default()
        .with_cache_dir("not/even/absolute")
        .with_query_engine_url(server.template())
        .with_override(EngineKind::Query, &binary);
    let fetcher = EngineFetcher::with_platform(config, debian_platform());

    assert_eq!(fetcher.ensure(EngineKind::Query).await.unwrap(), binary);
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn test_missing_override_names_variable_and_path() {
    let server = ArtifactServer::serving_engine().await;
    let config = EngineConfig::default()
        .with_schema_engine_url(server.template())
        .with_override(EngineKind::Schema, "/nonexistent/schema-engine");
    let fetcher = EngineFetcher::with_platform(config, debian_platform());

    let err = fetcher.ensure(EngineKind::Schema).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("PRISMA_SCHEMA_ENGINE_BINARY"), "{}", message);
    assert!(message.contains("/nonexistent/schema-engine"), "{}", message);
    assert_eq!(server.hits(), 0);
}
