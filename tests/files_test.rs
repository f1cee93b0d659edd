//! Integration tests for streamed file transfer: downloads written to disk
//! and multipart uploads, including the part naming the server expects.

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callsheet::{CallsheetError, Client};

fn client_for(server: &MockServer) -> Client {
    Client::builder(server.uri()).build().unwrap()
}

async fn multipart_body(server: &MockServer) -> String {
    let requests = server.received_requests().await.unwrap();
    let upload = requests
        .iter()
        .find(|request| request.method.as_str() == "POST")
        .expect("no upload request recorded");
    let content_type = upload
        .headers
        .get("content-type")
        .expect("upload without content-type")
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("multipart/form-data"));
    String::from_utf8_lossy(&upload.body).into_owned()
}

// ============================================================================
// download
// ============================================================================

#[tokio::test]
async fn download_streams_the_body_to_the_target_file() {
    let server = MockServer::start().await;
    let payload = b"not really a quicktime movie".to_vec();
    Mock::given(method("GET"))
        .and(path("/movies/originals/preview-files/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("preview.mov");
    let written = client_for(&server)
        .download("movies/originals/preview-files/p-1", None, &target)
        .await
        .unwrap();

    assert_eq!(written, payload.len() as u64);
    assert_eq!(std::fs::read(&target).unwrap(), payload);
}

#[tokio::test]
async fn download_overwrites_an_existing_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/movies/originals/preview-files/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("preview.mov");
    std::fs::write(&target, "something much longer than the new body").unwrap();

    client_for(&server)
        .download("movies/originals/preview-files/p-1", None, &target)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"new");
}

#[tokio::test]
async fn failed_download_does_not_create_the_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/movies/originals/preview-files/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("preview.mov");
    let err = client_for(&server)
        .download("movies/originals/preview-files/gone", None, &target)
        .await
        .unwrap_err();

    assert!(matches!(err, CallsheetError::RouteNotFound { .. }));
    assert!(!target.exists());
}

// ============================================================================
// upload
// ============================================================================

#[tokio::test]
async fn upload_sends_the_file_as_a_multipart_part() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pictures/thumbnails/preview-files/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("board.png");
    std::fs::write(&source, b"png bytes").unwrap();

    let body = client_for(&server)
        .upload("pictures/thumbnails/preview-files/p-1", &source, &[], &[])
        .await
        .unwrap();
    assert_eq!(body["id"], "p-1");

    let form = multipart_body(&server).await;
    assert!(form.contains("name=\"file\""));
    assert!(form.contains("filename=\"board.png\""));
    assert!(form.contains("png bytes"));
}

#[tokio::test]
async fn extra_files_are_numbered_from_two() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/data/shots/sh-1/attachments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("main.exr");
    let second = dir.path().join("matte.exr");
    let third = dir.path().join("depth.exr");
    for file in [&first, &second, &third] {
        std::fs::write(file, b"exr").unwrap();
    }

    client_for(&server)
        .upload(
            "data/shots/sh-1/attachments",
            &first,
            &[],
            &[second.as_path(), third.as_path()],
        )
        .await
        .unwrap();

    let form = multipart_body(&server).await;
    assert!(form.contains("name=\"file\""));
    assert!(form.contains("name=\"file-2\""));
    assert!(form.contains("name=\"file-3\""));
    assert!(form.contains("filename=\"matte.exr\""));
}

#[tokio::test]
async fn extra_fields_ride_along_as_text_parts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pictures/thumbnails/preview-files/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("board.png");
    std::fs::write(&source, b"png bytes").unwrap();

    client_for(&server)
        .upload(
            "pictures/thumbnails/preview-files/p-1",
            &source,
            &[("normalize", "false")],
            &[],
        )
        .await
        .unwrap();

    let form = multipart_body(&server).await;
    assert!(form.contains("name=\"normalize\""));
    assert!(form.contains("false"));
}

#[tokio::test]
async fn a_message_in_a_success_body_is_a_failed_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pictures/thumbnails/preview-files/p-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "message": "storage full" })),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("board.png");
    std::fs::write(&source, b"png bytes").unwrap();

    let err = client_for(&server)
        .upload("pictures/thumbnails/preview-files/p-1", &source, &[], &[])
        .await
        .unwrap_err();
    match err {
        CallsheetError::UploadFailed { message } => assert_eq!(message, "storage full"),
        other => panic!("expected UploadFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn upload_rebuilds_the_form_when_retrying_after_refresh() {
    let server = MockServer::start().await;
    let client = Client::builder(server.uri())
        .tokens("stale", "refresh-jwt")
        .build()
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/pictures/thumbnails/preview-files/p-1"))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "fresh" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pictures/thumbnails/preview-files/p-1"))
        .and(header("Authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("board.png");
    std::fs::write(&source, b"png bytes").unwrap();

    let body = client
        .upload("pictures/thumbnails/preview-files/p-1", &source, &[], &[])
        .await
        .unwrap();
    assert_eq!(body["id"], "p-1");
    assert_eq!(client.access_token().as_deref(), Some("fresh"));
}
