//! Pipeline Integration Tests
//!
//! Upload and one-time retrieval end to end, against a temporary storage
//! root and the synthetic cascade from `common`.

mod common;

use bytes::Bytes;
use common::{detected_regions, empty_scene, encode, face_scene, region_variance, Fixture};
use facemask::identifier::ID_LEN;
use facemask::pipeline::{Pipeline, STORAGE_FAILURE_REASON};
use facemask::store::StoreError;
use facemask::TransferResult;
use image::ImageFormat;

fn expect_id(result: &TransferResult) -> String {
    match result {
        TransferResult::Success { id } => id.clone(),
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn test_upload_jpeg_blurs_face() {
    let fixture = Fixture::new();
    let pipeline = Pipeline::new(&fixture.config());

    let original = encode(&face_scene(), ImageFormat::Jpeg);
    let decoded = image::load_from_memory(&original).unwrap();
    let regions = detected_regions(&decoded);
    assert!(!regions.is_empty(), "synthetic face must be detectable");

    let id = expect_id(&pipeline.upload(Bytes::from(original.clone())).await);
    assert_eq!(id.len(), ID_LEN);
    assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));

    let files = fixture.stored_files();
    assert_eq!(files.len(), 1);
    let expected = fixture
        .root
        .join(&id[0..2])
        .join(&id[2..4])
        .join(format!("{id}.jpeg"));
    assert_eq!(files[0], expected);

    let stored = std::fs::read(&expected).unwrap();
    assert_ne!(stored, original);
    let blurred = image::load_from_memory(&stored).unwrap();
    for region in regions {
        let before = region_variance(&decoded, region);
        let after = region_variance(&blurred, region);
        assert!(
            after < before / 4.0,
            "variance over {region:?} should drop sharply: {before} -> {after}"
        );
    }
}

#[tokio::test]
async fn test_upload_too_big_is_rejected() {
    let fixture = Fixture::new();
    let pipeline = Pipeline::new(&fixture.config());

    // 20 MiB with a valid PNG signature; the size check comes first.
    let mut payload = encode(&empty_scene(), ImageFormat::Png);
    payload.resize(20 * 1024 * 1024, 0);

    let result = pipeline.upload(Bytes::from(payload)).await;
    assert_eq!(result, TransferResult::validation("file is too big"));
    assert!(fixture.stored_files().is_empty());
}

#[tokio::test]
async fn test_upload_without_faces_is_stored_verbatim() {
    let fixture = Fixture::new();
    let pipeline = Pipeline::new(&fixture.config());

    let original = encode(&empty_scene(), ImageFormat::Png);
    let id = expect_id(&pipeline.upload(Bytes::from(original.clone())).await);

    let path = pipeline.store().resolve(&id).await.expect("stored file");
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
    assert_eq!(std::fs::read(path).unwrap(), original);
}

#[tokio::test]
async fn test_upload_non_image_is_rejected() {
    let fixture = Fixture::new();
    let pipeline = Pipeline::new(&fixture.config());

    for payload in [
        &b"just some plain text"[..],
        &b"<html><body>hello</body></html>"[..],
        &b"%PDF-1.7\n"[..],
    ] {
        let result = pipeline.upload(Bytes::copy_from_slice(payload)).await;
        assert_eq!(result, TransferResult::validation("file is not a picture"));
    }
    assert!(fixture.stored_files().is_empty());
}

#[tokio::test]
async fn test_allowed_types_are_configurable() {
    let fixture = Fixture::new();
    let mut config = fixture.config();
    config.upload.allowed_types = vec![facemask::format::ImageKind::Jpeg];
    let pipeline = Pipeline::new(&config);

    let result = pipeline
        .upload(Bytes::from(encode(&empty_scene(), ImageFormat::Png)))
        .await;
    assert_eq!(result, TransferResult::validation("file is not a picture"));
}

#[tokio::test]
async fn test_missing_model_is_a_detection_failure() {
    let fixture = Fixture::new();
    let config = fixture.config_with_models(vec![
        fixture.model.clone(),
        fixture.dir.path().join("no_such_model.xml"),
    ]);
    let pipeline = Pipeline::new(&config);

    let result = pipeline
        .upload(Bytes::from(encode(&face_scene(), ImageFormat::Png)))
        .await;
    assert!(matches!(result, TransferResult::DetectionFailure { .. }));
    assert!(fixture.stored_files().is_empty());
}

#[tokio::test]
async fn test_unwritable_root_is_a_storage_failure() {
    let fixture = Fixture::new();
    std::fs::write(&fixture.root, b"a regular file where the root should be").unwrap();
    let pipeline = Pipeline::new(&fixture.config());

    let result = pipeline
        .upload(Bytes::from(encode(&empty_scene(), ImageFormat::Png)))
        .await;
    assert_eq!(result, TransferResult::storage(STORAGE_FAILURE_REASON));
    assert!(result.id().is_none());
    assert!(fixture.root.is_file());
    assert!(fixture.stored_files().is_empty());
}

#[tokio::test]
async fn test_short_identifier_is_not_found() {
    let fixture = Fixture::new();
    let pipeline = Pipeline::new(&fixture.config());

    let result = pipeline.retrieve("a1b2c").await;
    assert!(matches!(result, Err(StoreError::NotFound)));
    // Nothing was ever created, not even the root.
    assert!(!fixture.root.exists());
}

#[tokio::test]
async fn test_download_is_one_time() {
    let fixture = Fixture::new();
    let pipeline = Pipeline::new(&fixture.config());

    let original = encode(&empty_scene(), ImageFormat::Png);
    let id = expect_id(&pipeline.upload(Bytes::from(original.clone())).await);
    let path = pipeline.store().resolve(&id).await.unwrap();
    let on_disk = std::fs::metadata(&path).unwrap().len();

    let download = pipeline.retrieve(&id).await.unwrap();
    assert_eq!(download.size(), on_disk);
    assert_eq!(download.content_type(), "image/png");
    assert_eq!(download.filename(), format!("{id}.png"));
    assert_eq!(download.read_to_end().await.unwrap(), original);

    assert!(matches!(
        pipeline.retrieve(&id).await,
        Err(StoreError::NotFound)
    ));
    assert!(fixture.stored_files().is_empty());
}

#[tokio::test]
async fn test_unconsumed_download_still_deletes() {
    let fixture = Fixture::new();
    let pipeline = Pipeline::new(&fixture.config());

    let id = expect_id(
        &pipeline
            .upload(Bytes::from(encode(&empty_scene(), ImageFormat::Gif)))
            .await,
    );
    let download = pipeline.retrieve(&id).await.unwrap();
    drop(download);

    assert!(fixture.stored_files().is_empty());
    assert!(pipeline.retrieve(&id).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_retrievals_serve_once() {
    let fixture = Fixture::new();
    let pipeline = Pipeline::new(&fixture.config());

    let id = expect_id(
        &pipeline
            .upload(Bytes::from(encode(&empty_scene(), ImageFormat::Png)))
            .await,
    );

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = pipeline.clone();
            let id = id.clone();
            tokio::spawn(async move { pipeline.retrieve(&id).await.map(|d| d.size()) })
        })
        .collect();

    let mut served = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => served += 1,
            Err(StoreError::NotFound) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(served, 1);
}

#[tokio::test]
async fn test_every_allowed_format_round_trips_its_extension() {
    let fixture = Fixture::new();
    let pipeline = Pipeline::new(&fixture.config());

    for (format, ext) in [
        (ImageFormat::Bmp, "bmp"),
        (ImageFormat::Gif, "gif"),
        (ImageFormat::Png, "png"),
        (ImageFormat::Jpeg, "jpeg"),
    ] {
        let id = expect_id(
            &pipeline
                .upload(Bytes::from(encode(&empty_scene(), format)))
                .await,
        );
        let path = pipeline.store().resolve(&id).await.unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some(ext));
    }
}
