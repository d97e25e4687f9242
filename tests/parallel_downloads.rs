//! End-to-end tests for planning, validation, and parallel range downloads
//! against a mock origin.

mod common;

use common::{OriginOptions, mount_origin, pattern_body, received_range_headers};
use prometeo_dl::{
    DownloadRequest, DownloadState, Error, Event, GetDownloadQuery, Manager, ManagerConfig,
    Outcome,
};
use std::path::Path;
use std::time::Duration;
use wiremock::MockServer;

fn test_config(temp_dir: &Path, connections: usize, speed_limit_mbps: f64) -> ManagerConfig {
    ManagerConfig {
        connections,
        temp_dir: Some(temp_dir.to_path_buf()),
        speed_limit_mbps,
        ..Default::default()
    }
}

fn request(server: &MockServer, file_path: &str, out_dir: &Path) -> DownloadRequest {
    DownloadRequest {
        url: format!("{}{file_path}", server.uri()),
        dir_path: out_dir.to_path_buf(),
        file_name: None,
    }
}

#[tokio::test]
async fn four_way_download_composes_byte_identical_output() {
    let server = MockServer::start().await;
    let body = pattern_body(1000);
    mount_origin(&server, "/file.bin", body.clone(), OriginOptions::default()).await;

    let scratch = tempfile::tempdir().unwrap();
    let temp_dir = scratch.path().join("Prometeo");
    let out_dir = scratch.path().join("out");
    let manager = Manager::new(test_config(&temp_dir, 4, 100.0)).await.unwrap();

    let download = manager.download(request(&server, "/file.bin", &out_dir)).await.unwrap();
    assert_eq!(download.name(), "file.bin");
    assert_eq!(download.size(), 1000);

    let outcome = download.start().await.unwrap();
    assert_eq!(outcome, Outcome::Completed(out_dir.join("file.bin")));
    assert_eq!(download.state(), DownloadState::Finished);

    let composed = tokio::fs::read(out_dir.join("file.bin")).await.unwrap();
    assert_eq!(composed.len(), 1000);
    assert_eq!(composed, body, "output[k] must equal k mod 256 for all k");

    // Work directory is reclaimed on success
    assert!(!download.work_dir().exists());

    // The partition issued the four expected ranges
    let mut ranges = received_range_headers(&server, "/file.bin").await;
    ranges.sort();
    assert_eq!(
        ranges,
        vec![
            "bytes=0-249".to_string(),
            "bytes=250-499".to_string(),
            "bytes=500-749".to_string(),
            "bytes=750-999".to_string(),
        ]
    );
}

#[tokio::test]
async fn single_connection_download_works() {
    let server = MockServer::start().await;
    let body = pattern_body(4096);
    mount_origin(&server, "/one.bin", body.clone(), OriginOptions::default()).await;

    let scratch = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&scratch.path().join("tmp"), 1, 100.0))
        .await
        .unwrap();

    let download = manager
        .download(request(&server, "/one.bin", &scratch.path().join("out")))
        .await
        .unwrap();
    download.start().await.unwrap();

    let composed = tokio::fs::read(download.destination()).await.unwrap();
    assert_eq!(composed, body);
    assert_eq!(
        received_range_headers(&server, "/one.bin").await,
        vec!["bytes=0-4095".to_string()]
    );
}

#[tokio::test]
async fn size_smaller_than_connections_downloads_via_degenerate_ranges() {
    let server = MockServer::start().await;
    let body = pattern_body(3);
    mount_origin(&server, "/tiny.bin", body.clone(), OriginOptions::default()).await;

    let scratch = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&scratch.path().join("tmp"), 4, 100.0))
        .await
        .unwrap();

    let download = manager
        .download(request(&server, "/tiny.bin", &scratch.path().join("out")))
        .await
        .unwrap();
    download.start().await.unwrap();

    let composed = tokio::fs::read(download.destination()).await.unwrap();
    assert_eq!(composed, body);

    // Only the last (real) range reaches the origin
    assert_eq!(
        received_range_headers(&server, "/tiny.bin").await,
        vec!["bytes=0-2".to_string()]
    );
}

#[tokio::test]
async fn origin_without_range_support_is_rejected() {
    let server = MockServer::start().await;
    mount_origin(
        &server,
        "/norange.bin",
        pattern_body(1000),
        OriginOptions {
            accept_ranges: false,
            ..Default::default()
        },
    )
    .await;

    let scratch = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&scratch.path().join("tmp"), 4, 100.0))
        .await
        .unwrap();

    let err = manager
        .download(request(&server, "/norange.bin", &scratch.path().join("out")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadUrl(_)), "got {err:?}");
}

#[tokio::test]
async fn zero_length_origin_is_rejected() {
    let server = MockServer::start().await;
    mount_origin(&server, "/empty.bin", Vec::new(), OriginOptions::default()).await;

    let scratch = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&scratch.path().join("tmp"), 4, 100.0))
        .await
        .unwrap();

    let err = manager
        .download(request(&server, "/empty.bin", &scratch.path().join("out")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadMetadata(_)), "got {err:?}");
}

#[tokio::test]
async fn head_failure_is_a_bad_url() {
    let server = MockServer::start().await;
    // Nothing mounted: wiremock answers 404

    let scratch = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&scratch.path().join("tmp"), 4, 100.0))
        .await
        .unwrap();

    let err = manager
        .download(request(&server, "/missing.bin", &scratch.path().join("out")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BadUrl(_)), "got {err:?}");
}

#[tokio::test]
async fn existing_destination_is_rejected() {
    let server = MockServer::start().await;
    mount_origin(&server, "/file.bin", pattern_body(100), OriginOptions::default()).await;

    let scratch = tempfile::tempdir().unwrap();
    let out_dir = scratch.path().join("out");
    tokio::fs::create_dir_all(&out_dir).await.unwrap();
    tokio::fs::write(out_dir.join("file.bin"), b"already here")
        .await
        .unwrap();

    let manager = Manager::new(test_config(&scratch.path().join("tmp"), 4, 100.0))
        .await
        .unwrap();

    let err = manager
        .download(request(&server, "/file.bin", &out_dir))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "got {err:?}");
}

#[tokio::test]
async fn unusable_probed_filename_is_replaced_by_random_hex() {
    let server = MockServer::start().await;
    mount_origin(
        &server,
        "/download",
        pattern_body(100),
        OriginOptions {
            content_disposition: Some("attachment; filename=\"weird name!.bin\""),
            ..Default::default()
        },
    )
    .await;

    let scratch = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&scratch.path().join("tmp"), 2, 100.0))
        .await
        .unwrap();

    let download = manager
        .download(request(&server, "/download", &scratch.path().join("out")))
        .await
        .unwrap();

    let name = download.name();
    assert!(name.ends_with(".bin"), "derived extension kept: {name:?}");
    let base = name.strip_suffix(".bin").unwrap();
    assert_eq!(base.len(), 32, "replacement base must be 32 chars: {name:?}");
    assert!(base.bytes().all(|b| b.is_ascii_hexdigit()));

    download.start().await.unwrap();
    assert!(download.destination().ends_with(name));
    assert!(download.destination().exists());
}

#[tokio::test]
async fn explicit_filename_overrides_the_probed_one() {
    let server = MockServer::start().await;
    mount_origin(&server, "/file.bin", pattern_body(100), OriginOptions::default()).await;

    let scratch = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&scratch.path().join("tmp"), 2, 100.0))
        .await
        .unwrap();

    let download = manager
        .download(DownloadRequest {
            url: format!("{}/file.bin", server.uri()),
            dir_path: scratch.path().join("out"),
            file_name: Some("renamed.dat".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(download.name(), "renamed.dat");

    download.start().await.unwrap();
    let composed = tokio::fs::read(scratch.path().join("out").join("renamed.dat"))
        .await
        .unwrap();
    assert_eq!(composed, pattern_body(100));
}

#[tokio::test]
async fn progress_and_lifecycle_events_are_emitted() {
    let server = MockServer::start().await;
    let body = pattern_body(150_000);
    mount_origin(&server, "/slow.bin", body.clone(), OriginOptions::default()).await;

    let scratch = tempfile::tempdir().unwrap();
    // 0.4 Mbps = 50 kB/s total: after the one-second burst allowance the
    // remaining ~100 kB spans several sampler ticks
    let manager = Manager::new(test_config(&scratch.path().join("tmp"), 4, 0.4))
        .await
        .unwrap();
    let mut events = manager.subscribe();

    let download = manager
        .download(request(&server, "/slow.bin", &scratch.path().join("out")))
        .await
        .unwrap();
    download.start().await.unwrap();

    let mut saw_added = false;
    let mut saw_started = false;
    let mut saw_progress = false;
    let mut saw_finished = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::DownloadAdded { resumed, .. } => {
                assert!(!resumed);
                saw_added = true;
            }
            Event::Started { .. } => saw_started = true,
            Event::Progress { percent, .. } => {
                assert!(percent <= 100);
                saw_progress = true;
            }
            Event::Finished { destination, .. } => {
                assert!(destination.ends_with("slow.bin"));
                saw_finished = true;
            }
            _ => {}
        }
    }
    assert!(saw_added, "DownloadAdded must fire on download()");
    assert!(saw_started, "Started must fire on start()");
    assert!(saw_progress, "at least one 500ms progress sample expected");
    assert!(saw_finished, "Finished must fire before composition");
}

#[tokio::test]
async fn raising_the_speed_limit_mid_download_takes_effect() {
    let server = MockServer::start().await;
    let body = pattern_body(400_000);
    mount_origin(&server, "/limited.bin", body.clone(), OriginOptions::default()).await;

    let scratch = tempfile::tempdir().unwrap();
    // 0.08 Mbps = 10 kB/s: 400 kB would take ~40s at the initial ceiling
    let manager = Manager::new(test_config(&scratch.path().join("tmp"), 4, 0.08))
        .await
        .unwrap();

    let download = manager
        .download(request(&server, "/limited.bin", &scratch.path().join("out")))
        .await
        .unwrap();

    let running = {
        let download = download.clone();
        tokio::spawn(async move { download.start().await })
    };

    tokio::time::sleep(Duration::from_millis(800)).await;
    manager.set_speed(80.0).await.unwrap(); // 10 MB/s

    let outcome = tokio::time::timeout(Duration::from_secs(15), running)
        .await
        .expect("download must finish quickly after the ceiling was raised")
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Outcome::Completed(_)));

    let composed = tokio::fs::read(download.destination()).await.unwrap();
    assert_eq!(composed, body);
}

#[tokio::test]
async fn get_download_matches_by_name_or_url() {
    let server = MockServer::start().await;
    mount_origin(&server, "/file.bin", pattern_body(100), OriginOptions::default()).await;

    let scratch = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&scratch.path().join("tmp"), 2, 100.0))
        .await
        .unwrap();
    let url = format!("{}/file.bin", server.uri());
    manager
        .download(DownloadRequest {
            url: url.clone(),
            dir_path: scratch.path().join("out"),
            file_name: None,
        })
        .await
        .unwrap();

    assert!(
        manager
            .get_download(GetDownloadQuery {
                file_name: Some("file.bin".to_string()),
                url: None,
            })
            .await
            .is_some()
    );
    assert!(
        manager
            .get_download(GetDownloadQuery {
                file_name: None,
                url: Some(url),
            })
            .await
            .is_some()
    );
    assert!(
        manager
            .get_download(GetDownloadQuery {
                file_name: Some("other.bin".to_string()),
                url: Some("https://elsewhere.example/x".to_string()),
            })
            .await
            .is_none()
    );
}
