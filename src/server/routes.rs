//! Request routing
//!
//! # Endpoints
//!
//! * `GET /health` - returns "ok"
//! * `POST /` and `POST /upload` - raw image body, JSON [`TransferResult`]
//! * `GET /download/{id}` - one-time retrieval, streamed in 64KB chunks
//! * anything else - 404

use crate::format::FormatError;
use crate::metrics;
use crate::pipeline::Pipeline;
use crate::store::{Download, StoreError};
use crate::transfer::TransferResult;
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub(super) type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

const NOT_FOUND_MESSAGE: &str = "File not found.";

pub(super) async fn handle_request(
    req: Request<Incoming>,
    pipeline: Arc<Pipeline>,
    max_size: usize,
) -> Result<Response<ResponseBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!(method = %method, path = %path, "Handling request");

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => text(StatusCode::OK, "ok"),
        (&Method::POST, "/") | (&Method::POST, "/upload") => {
            upload(req, &pipeline, max_size).await
        }
        (&Method::GET, p) => match p.strip_prefix("/download/") {
            Some(id) => download(&pipeline, id).await,
            None => text(StatusCode::NOT_FOUND, "Not Found"),
        },
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

async fn upload(req: Request<Incoming>, pipeline: &Pipeline, max_size: usize) -> Response<ResponseBody> {
    let body = match Limited::new(req.into_body(), max_size).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!(limit = max_size, "Upload body exceeds size limit");
            let result = TransferResult::validation(
                FormatError::TooBig {
                    size: max_size + 1,
                    limit: max_size,
                }
                .to_string(),
            );
            metrics::record_upload(result.status());
            return json(StatusCode::PAYLOAD_TOO_LARGE, &result);
        }
        Err(e) => {
            error!(error = %e, "Failed to read upload body");
            metrics::record_error("request_body");
            return text(StatusCode::BAD_REQUEST, "Failed to read body");
        }
    };

    let result = pipeline.upload(body).await;
    json(status_for(&result), &result)
}

async fn download(pipeline: &Pipeline, id: &str) -> Response<ResponseBody> {
    match pipeline.retrieve(id).await {
        Ok(download) => stream(download),
        Err(StoreError::NotFound) => text(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE),
        Err(_) => text(StatusCode::INTERNAL_SERVER_ERROR, "Download failed"),
    }
}

fn status_for(result: &TransferResult) -> StatusCode {
    match result {
        TransferResult::Success { .. } => StatusCode::OK,
        TransferResult::ValidationFailure { .. } => StatusCode::BAD_REQUEST,
        TransferResult::DetectionFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        TransferResult::StorageFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn full(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into())
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

fn respond(status: StatusCode, content_type: &'static str, body: ResponseBody) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<ResponseBody> {
    respond(status, "text/plain", full(body))
}

fn json(status: StatusCode, result: &TransferResult) -> Response<ResponseBody> {
    match serde_json::to_vec(result) {
        Ok(body) => respond(status, "application/json", full(body)),
        Err(e) => {
            error!(error = %e, "Failed to serialize transfer result");
            text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

/// Stream a claimed file; the file is deleted once the body is dropped.
fn stream(download: Download) -> Response<ResponseBody> {
    let content_type = download.content_type();
    let size = download.size();
    let disposition = HeaderValue::from_str(&format!("attachment; filename={}", download.filename()));

    let body = StreamBody::new(download.into_stream().map_ok(Frame::data)).boxed_unsync();
    let mut response = respond(StatusCode::OK, content_type, body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    if let Ok(disposition) = disposition {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&TransferResult::success("a1b2c3d4e5f6")), StatusCode::OK);
        assert_eq!(
            status_for(&TransferResult::validation("file is not a picture")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&TransferResult::detection("bad model")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&TransferResult::storage("disk full")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_json_response_body() {
        let response = json(StatusCode::OK, &TransferResult::success("a1b2c3d4e5f6"));
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            HeaderValue::from_static("application/json")
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"status":"success","id":"a1b2c3d4e5f6"}"#);
    }
}
