use super::AppState;
use crate::error::{BuildsrvError, BuildsrvResult};
use crate::service::{BuildRequest, BuildResponse};
use axum::body::{Body, Bytes};
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, CONTENT_DISPOSITION,
    CONTENT_LENGTH, CONTENT_TYPE, EXPIRES, LOCATION,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, error};

const CHUNK_SIZE: usize = 64 * 1024;

/// Header carrying the short digest of the job key
const BUILD_KEY_HEADER: &str = "x-build-key";

#[derive(Debug, Default, Deserialize)]
pub struct BuildQuery {
    os: Option<String>,
    arch: Option<String>,
    arm: Option<String>,
    features: Option<String>,
}

impl From<BuildQuery> for BuildRequest {
    fn from(query: BuildQuery) -> Self {
        Self {
            os: query.os,
            arch: query.arch,
            arm: query.arm,
            features: query
                .features
                .as_deref()
                .map(BuildRequest::parse_features)
                .unwrap_or_default(),
        }
    }
}

pub async fn build(
    State(state): State<AppState>,
    method: Method,
    Query(query): Query<BuildQuery>,
) -> Response {
    let request = BuildRequest::from(query);

    let result = match state.service.request(&request).await {
        Ok(build) => build_response(&state, build, method == Method::HEAD).await,
        Err(e) => Err(e),
    };

    let mut response = result.unwrap_or_else(|e| {
        if e.is_client_error() {
            debug!("Rejected build request: {}", e);
        } else {
            error!(
                os = request.os.as_deref().unwrap_or_default(),
                arch = request.arch.as_deref().unwrap_or_default(),
                "Build request failed: {}",
                e
            );
        }
        e.into_response()
    });

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, state.cors_origin.clone());
    headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Location"),
    );
    response
}

async fn build_response(
    state: &AppState,
    build: BuildResponse,
    head_only: bool,
) -> BuildsrvResult<Response> {
    let artifact = &build.artifact;
    let status = if build.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    let mut response = Response::builder()
        .status(status)
        .header(LOCATION, state.location(&artifact.path))
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.display_name),
        )
        .header(CONTENT_TYPE, artifact.format.content_type())
        .header(BUILD_KEY_HEADER, build.job.key().digest());
    if let Some(expires) = build.expires_at() {
        response = response.header(EXPIRES, http_date(expires));
    }

    let (len, body) = file_body(build.file, head_only).await?;
    response
        .header(CONTENT_LENGTH, len)
        .body(body)
        .map_err(|e| BuildsrvError::Internal(format!("building response: {}", e)))
}

pub async fn download(
    State(state): State<AppState>,
    method: Method,
    UrlPath(path): UrlPath<String>,
) -> Response {
    let Some(file) = resolve_download_path(state.service.build_root(), &path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    // Only finished archives; never raw binaries or partial writes
    if state.service.coordinator().find_artifact(&file).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }

    match open_body(&file, method == Method::HEAD).await {
        Ok((len, body)) => (
            [
                (CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
                (CONTENT_LENGTH, HeaderValue::from(len)),
            ],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Download of {} failed: {}", file.display(), e);
            e.into_response()
        }
    }
}

pub async fn online(State(state): State<AppState>) -> Response {
    ([(ACCESS_CONTROL_ALLOW_ORIGIN, state.cors_origin.clone())], "OK").into_response()
}

pub async fn features(State(state): State<AppState>) -> Response {
    let addons = state.service.registry().addons();
    (
        [(ACCESS_CONTROL_ALLOW_ORIGIN, state.cors_origin.clone())],
        Json(addons),
    )
        .into_response()
}

async fn open_body(path: &Path, head_only: bool) -> BuildsrvResult<(u64, Body)> {
    let file = File::open(path)
        .await
        .map_err(|e| BuildsrvError::io(format!("opening {}", path.display()), e))?;
    file_body(file, head_only).await
}

/// Length and body for a file; the body is empty for HEAD requests.
async fn file_body(file: File, head_only: bool) -> BuildsrvResult<(u64, Body)> {
    let len = file
        .metadata()
        .await
        .map_err(|e| BuildsrvError::io("reading archive metadata", e))?
        .len();

    if head_only {
        return Ok((len, Body::empty()));
    }
    Ok((len, stream_file(file)))
}

fn stream_file(file: File) -> Body {
    let chunks = futures_util::stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        buf.truncate(n);
        Ok(Some((Bytes::from(buf), file)))
    });
    Body::from_stream(chunks)
}

/// Map a URL path below the download prefix onto the build root.
///
/// Returns `None` for anything that could escape the root or name a
/// hidden file.
fn resolve_download_path(root: &Path, raw: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in raw.split('/') {
        if segment.is_empty()
            || segment.starts_with('.')
            || segment.contains('\\')
            || segment.contains('\0')
        {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}

/// RFC 7231 IMF-fixdate
fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
