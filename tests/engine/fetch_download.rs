//! Download path of the engine fetcher against a local artifact host.

use std::time::{Duration, Instant};

use axum::http::StatusCode;
use prisma_engine_host::binaries::download::DownloadError;
use prisma_engine_host::{EngineConfig, EngineFetcher, EngineKind, EngineVersions, FetchError};

use crate::fixture::{debian_platform, ArtifactServer, ENGINE_BYTES};

fn fetcher_for(server: &ArtifactServer, cache_dir: &std::path::Path) -> EngineFetcher {
    let config = EngineConfig::default()
        .with_cache_dir(cache_dir)
        .with_versions(EngineVersions::uniform("v1"))
        .with_query_engine_url(server.template())
        .with_schema_engine_url(server.template());
    EngineFetcher::with_platform(config, debian_platform())
}

fn leftover_temp_files(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".tmp"))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_first_ensure_downloads_once_then_caches() {
    let server = ArtifactServer::serving_engine().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&server, dir.path());

    let path = fetcher.ensure(EngineKind::Query).await.unwrap();
    assert_eq!(server.hits(), 1);
    assert_eq!(server.paths(), vec!["/v1/linux-musl/query-engine.gz".to_string()]);
    assert_eq!(
        path,
        dir.path().join("v1").join("prisma-query-engine-debian-openssl-3.0.x")
    );
    assert_eq!(std::fs::read(&path).unwrap(), ENGINE_BYTES);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111, "artifact should be executable");
    }

    let start = Instant::now();
    let again = fetcher.ensure(EngineKind::Query).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(20), "took {:?}", start.elapsed());
    assert_eq!(again, path);
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_schema_engine_uses_static_platform() {
    let server = ArtifactServer::serving_engine().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&server, dir.path());

    fetcher.ensure(EngineKind::Schema).await.unwrap();
    assert_eq!(server.paths(), vec!["/v1/linux-static-x64/schema-engine.gz".to_string()]);
}

#[tokio::test]
async fn test_error_status_surfaces_body() {
    let body = b"NoSuchKey: engine missing".to_vec();
    let server = ArtifactServer::start(StatusCode::NOT_FOUND, body).await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&server, dir.path());

    let err = fetcher.ensure(EngineKind::Query).await.unwrap_err();
    match &err {
        FetchError::Download {
            source: DownloadError::Status { status, body, .. },
            path,
            ..
        } => {
            assert_eq!(*status, 404);
            assert_eq!(body, "NoSuchKey: engine missing");
            assert!(!path.exists());
        }
        other => panic!("expected a status error, got {:?}", other),
    }
    assert!(err.to_string().contains("NoSuchKey"));
}

#[tokio::test]
async fn test_corrupt_stream_leaves_no_artifact() {
    let server = ArtifactServer::start(StatusCode::OK, b"definitely not gzip".to_vec()).await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&server, dir.path());

    let err = fetcher.ensure(EngineKind::Query).await.unwrap_err();
    assert!(
        matches!(err, FetchError::Download { source: DownloadError::Decompress { .. }, .. }),
        "got {:?}",
        err
    );

    let expected = fetcher.artifact_path(EngineKind::Query, dir.path(), "v1");
    assert!(!expected.exists());
    assert!(leftover_temp_files(&dir.path().join("v1")).is_empty());
}

#[tokio::test]
async fn test_empty_body_is_rejected() {
    let server = ArtifactServer::start(StatusCode::OK, Vec::new()).await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&server, dir.path());

    let err = fetcher.ensure(EngineKind::Schema).await.unwrap_err();
    assert!(matches!(err, FetchError::Download { source: DownloadError::Decompress { .. }, .. }));
}

#[tokio::test]
async fn test_fetch_native_installs_every_engine() {
    let server = ArtifactServer::serving_engine().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&server, dir.path());

    let engines = fetcher.fetch_native(dir.path()).await.unwrap();
    assert!(engines.query.is_file());
    assert!(engines.schema.is_file());
    assert_eq!(server.hits(), 2);
    assert_eq!(
        server.paths(),
        vec![
            "/v1/linux-musl/query-engine.gz".to_string(),
            "/v1/linux-static-x64/schema-engine.gz".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_pinned_engine_set_uses_flat_layout() {
    let server = ArtifactServer::serving_engine().await;
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default()
        .with_cache_dir(dir.path())
        .with_pinned_engine_url(server.pinned_template());
    let fetcher = EngineFetcher::with_platform(config, debian_platform());

    let engines = fetcher.fetch_native_with_version(dir.path(), "v2").await.unwrap();
    assert_eq!(engines.query, dir.path().join("v2").join("linux-amd64-query-engine"));
    assert_eq!(engines.schema, dir.path().join("v2").join("linux-amd64-schema-engine"));
    assert_eq!(std::fs::read(&engines.query).unwrap(), ENGINE_BYTES);
    assert_eq!(
        server.paths(),
        vec![
            "/v2/linux-amd64-query-engine.gz".to_string(),
            "/v2/linux-amd64-schema-engine.gz".to_string(),
        ]
    );

    let again = fetcher.fetch_native_with_version(dir.path(), "v2").await.unwrap();
    assert_eq!(again, engines);
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn test_pinned_engine_set_needs_absolute_dir() {
    let server = ArtifactServer::serving_engine().await;
    let config = EngineConfig::default().with_pinned_engine_url(server.pinned_template());
    let fetcher = EngineFetcher::with_platform(config, debian_platform());

    let err = fetcher
        .fetch_native_with_version(std::path::Path::new("engines"), "v2")
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::RelativeCacheDir(_)), "got {:?}", err);
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn test_lock_file_is_removed_after_install() {
    let server = ArtifactServer::serving_engine().await;
    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher_for(&server, dir.path());

    let path = fetcher.ensure(EngineKind::Query).await.unwrap();
    let names: Vec<String> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["prisma-query-engine-debian-openssl-3.0.x".to_string()]);
}
