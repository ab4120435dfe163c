//! The HTTP surface for live streams.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use crate::{CameraStream, Channel, StreamRegistry};

const BOUNDARY: &str = "vigilstream";

#[derive(Serialize)]
struct CameraEntry {
    id: u32,
    name: String,
}

/// Build the streaming router; the daemon nests this under its control
/// surface.
pub fn router(registry: Arc<StreamRegistry>) -> Router {
    Router::new()
        .route("/cameras", get(list_cameras))
        .route("/camera/{id}/stream", get(full_stream))
        .route("/camera/{id}/substream", get(sub_stream))
        .route("/camera/{id}/current", get(current_jpeg))
        .with_state(registry)
}

async fn list_cameras(State(reg): State<Arc<StreamRegistry>>) -> Json<Vec<CameraEntry>> {
    Json(
        reg.list()
            .into_iter()
            .map(|(id, name)| CameraEntry { id, name })
            .collect(),
    )
}

async fn full_stream(
    Path(id): Path<u32>,
    State(reg): State<Arc<StreamRegistry>>,
) -> Response {
    match reg.get(id) {
        Some(cam) => mjpeg_response(cam.clone(), false),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn sub_stream(Path(id): Path<u32>, State(reg): State<Arc<StreamRegistry>>) -> Response {
    match reg.get(id) {
        Some(cam) if cam.sub.is_some() => mjpeg_response(cam.clone(), true),
        Some(_) => (
            StatusCode::NOT_FOUND,
            "substream disabled for this camera (dimensions not multiples of 16)",
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn current_jpeg(Path(id): Path<u32>, State(reg): State<Arc<StreamRegistry>>) -> Response {
    let Some(cam) = reg.get(id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mut rx = cam.full.subscribe();
    let jpeg = rx.borrow_and_update().clone();
    match jpeg {
        Some(jpeg) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no image yet").into_response(),
    }
}

/// Counts a client against the channel for as long as the response body
/// lives.
struct ClientGuard {
    cam: Arc<CameraStream>,
    substream: bool,
}

impl ClientGuard {
    fn new(cam: Arc<CameraStream>, substream: bool) -> Self {
        let channel = channel_of(&cam, substream);
        let n = channel.clients.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(camera = cam.camera_id, substream, clients = n, "stream client connected");
        Self { cam, substream }
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let channel = channel_of(&self.cam, self.substream);
        let n = channel.clients.fetch_sub(1, Ordering::Relaxed) - 1;
        debug!(
            camera = self.cam.camera_id,
            substream = self.substream,
            clients = n,
            "stream client disconnected"
        );
    }
}

fn channel_of(cam: &CameraStream, substream: bool) -> &Channel {
    if substream {
        cam.sub.as_ref().expect("substream presence checked by route")
    } else {
        &cam.full
    }
}

fn mjpeg_response(cam: Arc<CameraStream>, substream: bool) -> Response {
    let rx = channel_of(&cam, substream).subscribe();
    let guard = ClientGuard::new(cam, substream);

    let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        loop {
            if rx.changed().await.is_err() {
                // Publisher gone: camera shut down.
                return None;
            }
            let jpeg: Option<Bytes> = rx.borrow_and_update().clone();
            if let Some(jpeg) = jpeg {
                let mut part = Vec::with_capacity(jpeg.len() + 128);
                part.extend_from_slice(
                    format!(
                        "\r\n--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                        jpeg.len()
                    )
                    .as_bytes(),
                );
                part.extend_from_slice(&jpeg);
                return Some((Ok::<Bytes, std::convert::Infallible>(Bytes::from(part)), (rx, guard)));
            }
        }
    });

    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )],
        Body::from_stream(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::Request;
    use tower::ServiceExt;

    async fn call_get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        (status, body)
    }

    #[tokio::test]
    async fn test_list_and_current() {
        let reg = StreamRegistry::new();
        let cam = reg.register(1, "front", false);
        cam.full.publish(Bytes::from_static(&[0xFF, 0xD8, 0x00]));

        let app = router(reg.clone());
        let (status, body) = call_get(app.clone(), "/cameras").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&body).contains("front"));

        let (status, body) = call_get(app.clone(), "/camera/1/current").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..2], &[0xFF, 0xD8]);

        let (status, _) = call_get(app, "/camera/9/current").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_substream_disabled() {
        let reg = StreamRegistry::new();
        reg.register(2, "gate", false);
        let (status, body) = call_get(router(reg), "/camera/2/substream").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(String::from_utf8_lossy(&body).contains("substream disabled"));
    }
}
