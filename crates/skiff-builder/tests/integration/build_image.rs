/*
 * Copyright (c) 2025 The Skiff Authors
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

use crate::fixtures::{build_request, source_bundle, BuildFixture, MultipartBody};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serial_test::serial;
use skiff_builder::api::configure_routes;
use skiff_models::models::image_builds::{IMAGE_BUILD_ERROR, IMAGE_BUILT};
use tokio_stream::StreamExt;
use tower::ServiceExt;

/// Reads a streamed body, returning every chunk in arrival order.
async fn chunks(body: Body) -> Vec<String> {
    let mut stream = body.into_data_stream();
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.push(String::from_utf8_lossy(&chunk.unwrap()).into_owned());
    }
    out
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn test_successful_build_ends_with_image_built() {
    let fixture = BuildFixture::new();
    let builder = fixture.fake_builder(
        r#"app="${1#-app=}"
test -f "$app/main.go" || { echo "main.go missing"; exit 4; }
test -d "$app/sub" || { echo "sub missing"; exit 5; }
test "$2" = "-log-level=debug" || exit 6
test "$3" = "reg/app:v1" || exit 7
printf 'building...\nIMAGE BUILT\n'"#,
    );
    let app = configure_routes(fixture.config(&builder));

    let response = app
        .oneshot(build_request(&source_bundle()).into_request())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );

    let chunks = chunks(response.into_body()).await;
    let full: String = chunks.concat();
    assert!(full.contains("building..."), "body was {:?}", full);
    assert!(chunks.last().unwrap().contains(IMAGE_BUILT));
    assert!(!full.contains(IMAGE_BUILD_ERROR));
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn test_failing_builder_ends_with_error_sentinel() {
    let fixture = BuildFixture::new();
    let builder = fixture.fake_builder("echo 'pushing layer'\necho 'denied' 1>&2\nexit 3");
    let app = configure_routes(fixture.config(&builder));

    let response = app
        .oneshot(build_request(&source_bundle()).into_request())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let full = chunks(response.into_body()).await.concat();
    assert!(full.contains("pushing layer"));
    assert!(full.contains("denied"));
    assert!(full.trim_end().ends_with(IMAGE_BUILD_ERROR));
    assert!(!full.trim_end().ends_with(IMAGE_BUILT));
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn test_build_directory_is_removed_when_body_ends() {
    let fixture = BuildFixture::new();
    let builder = fixture.fake_builder("echo ok");
    let app = configure_routes(fixture.config(&builder));

    let response = app
        .oneshot(build_request(&source_bundle()).into_request())
        .await
        .unwrap();
    to_bytes(response.into_body(), usize::MAX).await.unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(fixture.work_dir())
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(leftovers.is_empty(), "left behind {:?}", leftovers);
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn test_registry_config_is_persisted_before_build() {
    let fixture = BuildFixture::new();
    let docker_dir = fixture.docker_dir();
    let builder = fixture.fake_builder(&format!(
        "cat '{}/config.json' || exit 9",
        docker_dir.display()
    ));
    let app = configure_routes(fixture.config(&builder));

    let request = build_request(&source_bundle())
        .text("configJson", r#"{"auths":{"reg":{"auth":"eA=="}}}"#)
        .into_request();
    let response = app.oneshot(request).await.unwrap();

    let full = chunks(response.into_body()).await.concat();
    assert!(full.contains(r#""auths""#));
    assert!(full.ends_with(IMAGE_BUILT));
}

#[tokio::test]
async fn test_corrupt_bundle_streams_error_sentinel() {
    let fixture = BuildFixture::new();
    let app = configure_routes(fixture.config(std::path::Path::new("/bin/true")));

    let response = app
        .oneshot(build_request(b"definitely not gzip").into_request())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let full = chunks(response.into_body()).await.concat();
    assert!(full.ends_with(IMAGE_BUILD_ERROR));
}

#[tokio::test]
async fn test_missing_data_field_is_rejected() {
    let fixture = BuildFixture::new();
    let app = configure_routes(fixture.config(std::path::Path::new("/bin/true")));

    let request = MultipartBody::new()
        .text("image", "reg/app")
        .text("tag", "v1")
        .text("app", "app")
        .into_request();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&body).contains("data"));
}

#[tokio::test]
async fn test_app_name_with_separator_is_rejected() {
    let fixture = BuildFixture::new();
    let app = configure_routes(fixture.config(std::path::Path::new("/bin/true")));

    let request = MultipartBody::new()
        .text("image", "reg/app")
        .text("tag", "v1")
        .text("app", "../escape")
        .file("data", "src.tar.gz", &source_bundle())
        .into_request();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_healthz() {
    let fixture = BuildFixture::new();
    let app = configure_routes(fixture.config(std::path::Path::new("/bin/true")));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"OK");
}
