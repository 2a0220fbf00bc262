use std::time::Duration;

use kasane::{process::Tool, DownloadContext, DownloadOptions, HttpClient, KasaneError};
use url::Url;
use wiremock::{
    matchers::{method, path, path_regex},
    Mock, MockServer, ResponseTemplate,
};

use crate::{assert_empty_dir, fakes::FakeRunner, init_tracing, AssertWrapper};

const MULTI_PERIOD: &str = include_str!("fixtures/multi-period.mpd");

async fn setup_mock_server(bodies: &[(&str, &str)]) -> (Url, MockServer) {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MULTI_PERIOD))
        .mount(&server)
        .await;
    for (segment, body) in bodies {
        Mock::given(method("GET"))
            .and(path(*segment))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.as_bytes().to_vec()))
            .mount(&server)
            .await;
    }

    let url = Url::parse(&format!("{}/manifest.mpd", server.uri())).assert_success();
    (url, server)
}

#[tokio::test]
async fn test_download_multi_period_manifest() -> anyhow::Result<()> {
    init_tracing();
    let (url, server) = setup_mock_server(&[
        ("/main/a128/init.mp4", "A0"),
        ("/main/a128/1.m4s", "A1"),
        ("/main/a128/2.m4s", "A2"),
        ("/main/v1080/init.mp4", "V0"),
        ("/main/v1080/1.m4s", "V1"),
        ("/main/v1080/2.m4s", "V2"),
        ("/credits/a128/init.mp4", "a0"),
        ("/credits/a128/0.m4s", "a1"),
        ("/credits/a128/96000.m4s", "a2"),
        ("/credits/v1080/init.mp4", "v0"),
        ("/credits/v1080/000.m4s", "v1"),
        ("/credits/v1080/001.m4s", "v2"),
    ])
    .await;
    // ignored period, lower resolution and lower bandwidth are never requested
    Mock::given(path_regex("^/(ad/|.*/v720/|.*/a64/)"))
        .respond_with(ResponseTemplate::new(404))
        .expect(0)
        .mount(&server)
        .await;

    let context = DownloadContext::new(HttpClient::default(), FakeRunner::new());
    let temp = tempfile::tempdir()?;
    let options = DownloadOptions::builder()
        .ignore_period("^ad-.*")
        .resolution("1080")
        .merge_strategy("per-period")
        .temp_dir(temp.path().join("work"))
        .build()?;

    let saved = context
        .download_url(&url, &options, &temp.path().join("show.mp4"))
        .await?;

    assert_eq!(saved, temp.path().join("show.mkv"));
    assert_eq!(
        tokio::fs::read_to_string(&saved).await?,
        "A0A1A2V0V1V2a0a1a2v0v1v2"
    );

    let runner = context.runner();
    // 4 defragments, 2 period muxes and 1 concat
    assert_eq!(runner.count(Tool::Ffmpeg), 7);
    assert_eq!(runner.count(Tool::MkvMerge), 1);
    assert_eq!(runner.count(Tool::Mp4Decrypt), 0);

    assert_empty_dir(&temp.path().join("work"));
    Ok(())
}

#[tokio::test]
async fn test_manifest_not_found() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let url = Url::parse(&format!("{}/missing.mpd", server.uri()))?;

    let context = DownloadContext::new(HttpClient::default(), FakeRunner::new());
    let temp = tempfile::tempdir()?;
    let options = DownloadOptions::builder().temp_dir(temp.path()).build()?;

    let result = context
        .download_url(&url, &options, &temp.path().join("out.mp4"))
        .await;
    assert!(matches!(result, Err(KasaneError::HttpError(status)) if status.as_u16() == 404));
    Ok(())
}

#[tokio::test]
async fn test_cancel_during_segment_download() -> anyhow::Result<()> {
    init_tracing();
    let (url, server) = setup_mock_server(&[]).await;
    Mock::given(method("GET"))
        .and(path_regex(r"\.(mp4|m4s)$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow".to_vec())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let context = DownloadContext::new(HttpClient::default(), FakeRunner::new());
    let temp = tempfile::tempdir()?;
    let options = DownloadOptions::builder()
        .fetch_timeout(Duration::from_secs(60))
        .temp_dir(temp.path().join("work"))
        .build()?;

    let token = context.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        context.download_url(&url, &options, &temp.path().join("out.mp4")),
    )
    .await?;

    assert!(matches!(result, Err(KasaneError::Cancelled)));
    assert!(context.runner().commands().is_empty());
    assert_empty_dir(&temp.path().join("work"));
    Ok(())
}
