//! Peer transfer endpoint: `GET /file?name=<relative name>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use p2pshare_files::{resolve_shared_path, PathError};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Size of the reads the response body is streamed in.
pub const TRANSFER_CHUNK_SIZE: usize = 32 * 1024;

#[derive(Clone)]
pub struct TransferState {
    pub shared_dir: Arc<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    #[serde(default)]
    pub name: Option<String>,
}

pub fn transfer_router(shared_dir: impl Into<PathBuf>) -> Router {
    let state = TransferState {
        shared_dir: Arc::new(shared_dir.into()),
    };
    Router::new()
        .route("/file", get(handle_file))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_file(
    State(state): State<TransferState>,
    Query(query): Query<FileQuery>,
) -> Result<Response, ApiError> {
    let name = query
        .name
        .ok_or_else(|| ApiError::bad_request("missing file name"))?;

    let path = resolve_shared_path(&state.shared_dir, &name).map_err(|err| match err {
        PathError::Io(io) => ApiError::internal(format!("failed to resolve {name}: {io}")),
        rejected => {
            warn!("Rejected transfer request for {:?}: {}", name, rejected);
            ApiError::bad_request(rejected.to_string())
        }
    })?;

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return Err(ApiError::not_found(format!("file not found: {name}"))),
    };
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|err| ApiError::internal(format!("failed to open {name}: {err}")))?;

    debug!("Serving {} ({} bytes)", name, metadata.len());

    let body = futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; TRANSFER_CHUNK_SIZE];
        let read = file.read(&mut buf).await?;
        if read == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        buf.truncate(read);
        Ok(Some((Bytes::from(buf), file)))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(header::CONTENT_DISPOSITION, content_disposition(&name))
        .body(Body::from_stream(body))
        .map_err(|err| ApiError::internal(format!("failed to build response: {err}")))
}

/// `attachment; filename="<basename>"`, falling back to a bare `attachment`
/// when the name cannot be carried in a header.
fn content_disposition(name: &str) -> HeaderValue {
    let basename = Path::new(name)
        .file_name()
        .and_then(|base| base.to_str())
        .unwrap_or(name)
        .replace(['"', '\\'], "_");
    HeaderValue::from_str(&format!("attachment; filename=\"{basename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn serves_file_with_length_and_disposition() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        let payload: Vec<u8> = (0..(TRANSFER_CHUNK_SIZE * 2 + 5))
            .map(|i| (i % 199) as u8)
            .collect();
        std::fs::write(dir.path().join("docs/report.pdf"), &payload).unwrap();

        let response = transfer_router(dir.path())
            .oneshot(get("/file?name=docs%2Freport.pdf"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(
            headers[header::CONTENT_LENGTH],
            payload.len().to_string().as_str()
        );
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"report.pdf\""
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn rejects_unsafe_or_missing_names() {
        let dir = tempfile::tempdir().unwrap();
        let router = transfer_router(dir.path());

        for uri in [
            "/file",
            "/file?name=",
            "/file?name=..%2Fsecret",
            "/file?name=%2Fetc%2Fpasswd",
        ] {
            let response = router.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn missing_file_and_directories_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        let router = transfer_router(dir.path());

        let response = router.clone().oneshot(get("/file?name=nope.txt")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = router.oneshot(get("/file?name=sub")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn disposition_uses_basename() {
        assert_eq!(
            content_disposition("a/b/c.txt"),
            "attachment; filename=\"c.txt\""
        );
        assert_eq!(
            content_disposition("we\"ird.txt"),
            "attachment; filename=\"we_ird.txt\""
        );
    }
}
