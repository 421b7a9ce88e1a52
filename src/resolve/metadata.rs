//! Discovery of the file behind a numeric content identifier.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::job::FetchUnit;
use crate::resolve::client::HttpClient;
use crate::resolve::decode::decode_video_url;
use crate::resolve::detail::{video_path, videofile_path};
use crate::resolve::ResolvedSource;

#[derive(Debug, Deserialize)]
struct VideoDetail {
    video: VideoInfo,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct VideoFile {
    video_url: String,
    #[serde(default)]
    format: String,
}

/// Only progressive MP4 files are served as a single downloadable file.
const SUPPORTED_FORMAT: &str = ".mp4";

/// Look up `id` on `site` and produce a single-unit plan.
pub async fn discover(
    http: &HttpClient,
    site: &str,
    id: u64,
    lifetime: Option<u64>,
) -> Result<ResolvedSource> {
    let detail_url = format!("{}{}", site, video_path(lifetime, id));
    let detail: VideoDetail = http.get_json(&detail_url, None).await?;
    tracing::debug!(
        id,
        title = detail.video.title.as_deref().unwrap_or(""),
        duration = ?detail.video.duration,
        "Fetched video metadata"
    );

    let files_url = format!("{}{}", site, videofile_path(lifetime, id));
    let files: Vec<VideoFile> = http.get_json(&files_url, Some(site)).await?;
    let file = files
        .into_iter()
        .next()
        .ok_or_else(|| Error::UnresolvableSource(format!("no files listed for video {}", id)))?;

    if file.format != SUPPORTED_FORMAT {
        return Err(Error::UnresolvableSource(format!(
            "unsupported file format '{}' for video {}",
            file.format, id
        )));
    }

    let path = decode_video_url(&file.video_url)?;
    let locator = if path.starts_with("http://") || path.starts_with("https://") {
        path
    } else {
        format!("{}{}", site, path)
    };

    Ok(ResolvedSource {
        title: detail.video.title.filter(|t| !t.trim().is_empty()),
        units: vec![FetchUnit::new(0, locator)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(&ResolverConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_discover_mp4() {
        let server = MockServer::start().await;
        let site = server.uri();

        Mock::given(method("GET"))
            .and(path("/api/json/video/86400/0/5000/5123.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "video": { "title": "A clip", "duration": "3:21" }
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/videofile.php"))
            .and(query_param("video_id", "5123"))
            .and(query_param("lifetime", "8640000"))
            .and(header("referer", site.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "video_url": "L2dldF9maWxlLzМveСUyМHkubXА0", "format": ".mp4" }
            ])))
            .mount(&server)
            .await;

        let resolved = discover(&client(), &site, 5123, None).await.unwrap();
        assert_eq!(resolved.title.as_deref(), Some("A clip"));
        assert_eq!(resolved.units.len(), 1);
        assert_eq!(
            resolved.units[0].remote_locator,
            format!("{}/get_file/3/x y.mp4", site)
        );
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let server = MockServer::start().await;
        let site = server.uri();

        Mock::given(method("GET"))
            .and(path("/api/json/video/86400/0/0/7.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "video": {} })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/videofile.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "video_url": "xx", "format": ".flv" }
            ])))
            .mount(&server)
            .await;

        let err = discover(&client(), &site, 7, None).await.unwrap_err();
        assert!(matches!(err, Error::UnresolvableSource(_)));
    }

    #[tokio::test]
    async fn test_missing_video() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = discover(&client(), &server.uri(), 7, None).await.unwrap_err();
        assert!(matches!(err, Error::UnresolvableSource(_)));
    }
}
