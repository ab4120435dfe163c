//! JSON control surface, mounted alongside the MJPEG stream routes.
//!
//! Runtime parameter edits go through the same validation as config-file
//! parsing; values flagged restart-required are stored but only take
//! effect when the camera recycles.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use vigil_config::EditOutcome;

use crate::camera::CameraFlags;

/// Control access to one camera's configuration and flags.
pub struct CameraControl {
    pub camera_id: u32,
    pub cfg: Arc<parking_lot::RwLock<vigil_config::Config>>,
    pub flags: Arc<CameraFlags>,
}

#[derive(Clone)]
pub struct ControlState {
    pub cameras: Arc<Vec<Arc<CameraControl>>>,
}

impl ControlState {
    fn find(&self, id: u32) -> Option<Arc<CameraControl>> {
        self.cameras
            .iter()
            .find(|c| c.camera_id == id)
            .cloned()
    }
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/camera/{id}/config", get(get_config))
        .route("/camera/{id}/config/{name}", get(get_one).post(set_one))
        .route("/camera/{id}/action/{action}", post(run_action))
        .with_state(state)
}

#[derive(Serialize)]
struct ParamEntry {
    name: &'static str,
    value: String,
    category: vigil_config::Category,
    requires_restart: bool,
}

async fn get_config(Path(id): Path<u32>, State(state): State<ControlState>) -> Response {
    let Some(cam) = state.find(id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let cfg = cam.cfg.read();
    let entries: Vec<ParamEntry> = vigil_config::PARAMS
        .iter()
        .filter(|m| m.web_level < 3)
        .map(|m| ParamEntry {
            name: m.name,
            value: cfg.get_param(m.name).unwrap_or_default(),
            category: m.category,
            requires_restart: m.requires_restart,
        })
        .collect();
    Json(entries).into_response()
}

async fn get_one(
    Path((id, name)): Path<(u32, String)>,
    State(state): State<ControlState>,
) -> Response {
    let Some(cam) = state.find(id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match cam.cfg.read().get_param(&name) {
        Some(value) => Json(serde_json::json!({ "name": name, "value": value })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Deserialize)]
struct SetBody {
    value: String,
}

async fn set_one(
    Path((id, name)): Path<(u32, String)>,
    State(state): State<ControlState>,
    Json(body): Json<SetBody>,
) -> Response {
    let Some(cam) = state.find(id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let outcome = cam.cfg.write().edit_set(&name, &body.value);
    match outcome {
        EditOutcome::Applied => Json(serde_json::json!({ "result": "ok" })).into_response(),
        EditOutcome::RequiresRestart => {
            Json(serde_json::json!({ "result": "requires_restart" })).into_response()
        }
        EditOutcome::Rejected(reason) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "result": "rejected", "reason": reason })),
        )
            .into_response(),
    }
}

async fn run_action(
    Path((id, action)): Path<(u32, String)>,
    State(state): State<ControlState>,
) -> Response {
    let Some(cam) = state.find(id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match action.as_str() {
        "pause" => cam.flags.pause.store(true, Ordering::SeqCst),
        "resume" => cam.flags.pause.store(false, Ordering::SeqCst),
        "restart" => cam.flags.recycle.store(true, Ordering::SeqCst),
        "snapshot" => cam.flags.snapshot_request.store(true, Ordering::SeqCst),
        "makemovie" => cam.flags.event_trigger.store(true, Ordering::SeqCst),
        "endtimelapse" => cam.flags.timelapse_end_request.store(true, Ordering::SeqCst),
        _ => return StatusCode::NOT_FOUND.into_response(),
    }
    Json(serde_json::json!({ "result": "ok" })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> ControlState {
        let cam = Arc::new(CameraControl {
            camera_id: 1,
            cfg: Arc::new(parking_lot::RwLock::new(vigil_config::Config::default())),
            flags: Arc::new(CameraFlags::default()),
        });
        ControlState {
            cameras: Arc::new(vec![cam]),
        }
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        (status, body)
    }

    #[tokio::test]
    async fn test_get_and_set_param() {
        let state = test_state();
        let app = router(state.clone());

        let (status, body) = call(
            app.clone(),
            Request::builder()
                .uri("/camera/1/config/threshold")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&body).contains("1500"));

        let (status, _) = call(
            app.clone(),
            Request::builder()
                .method("POST")
                .uri("/camera/1/config/threshold")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"value":"2000"}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.cameras[0].cfg.read().detect.threshold, 2000);

        // Rejected values keep the old one.
        let (status, body) = call(
            app.clone(),
            Request::builder()
                .method("POST")
                .uri("/camera/1/config/rotate")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"value":"45"}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(String::from_utf8_lossy(&body).contains("rejected"));
        assert_eq!(state.cameras[0].cfg.read().source.rotate, 0);
    }

    #[tokio::test]
    async fn test_actions_set_flags() {
        let state = test_state();
        let app = router(state.clone());
        let (status, _) = call(
            app.clone(),
            Request::builder()
                .method("POST")
                .uri("/camera/1/action/pause")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.cameras[0].flags.pause.load(Ordering::SeqCst));

        let (status, _) = call(
            app,
            Request::builder()
                .method("POST")
                .uri("/camera/1/action/warp")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
