use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::Stream;
use isolation_watch::{LiveState, SessionControl};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::{FrameBus, FramePacket, MJPEG_BOUNDARY};

#[derive(Clone)]
pub struct AppState {
    pub control: SessionControl,
    pub bus: FrameBus,
}

#[derive(Debug, Deserialize)]
pub struct SetDistance {
    pub distance: u64,
}

#[derive(Debug, Deserialize)]
pub struct SetIsolationTime {
    pub seconds: f64,
}

// Dashboard: live stream, start/stop buttons, threshold control and stats polling.
const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Isolation Watch</title></head>
<body style="font-family:sans-serif; background:#111; color:#eee">
  <h2>Isolation Watch</h2>
  <div style="margin: 8px 0; display:flex; gap:12px; align-items:center;">
    <button id="btn-start" style="padding:6px 12px;">Start camera</button>
    <button id="btn-stop" style="padding:6px 12px;">Stop camera</button>
    <label>Distance <input id="distance" type="number" min="0" value="200" style="width:80px"></label>
    <button id="btn-distance" style="padding:6px 12px;">Apply</button>
    <span id="status" style="font-family:monospace; font-size:12px; color:#777">idle</span>
  </div>
  <img id="preview" width="1280" height="720" style="border:1px solid #444">
  <pre id="stats" style="font-size:12px"></pre>
  <script>
    const status = (t)=>{ document.getElementById('status').textContent = t; };
    const preview = document.getElementById('preview');
    document.getElementById('btn-start').onclick = ()=> fetch('/start_camera', {method:'POST'})
      .then(()=>{ preview.src = '/video?' + Date.now(); status('streaming'); });
    document.getElementById('btn-stop').onclick = ()=> fetch('/stop_camera', {method:'POST'})
      .then(()=>{ preview.removeAttribute('src'); status('stopped'); });
    document.getElementById('btn-distance').onclick = ()=> {
      const distance = parseInt(document.getElementById('distance').value, 10);
      fetch('/set_distance', {method:'POST', headers:{'Content-Type':'application/json'}, body: JSON.stringify({distance})})
        .then(r => r.json()).then(j => status('distance ' + j.distance));
    };
    setInterval(()=> fetch('/stats').then(r => r.json())
      .then(s => { document.getElementById('stats').textContent = JSON.stringify(s, null, 2); }), 1000);
  </script>
</body>
</html>"#;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Html(INDEX_HTML) }))
        .route("/video", get(video))
        .route("/start_camera", post(start_camera))
        .route("/stop_camera", post(stop_camera))
        .route("/set_distance", post(set_distance))
        .route("/set_isolation_time", post(set_isolation_time))
        .route("/stats", get(stats))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

async fn video(State(state): State<AppState>) -> Response {
    let stream = mjpeg_stream(state.bus.frames_tx.subscribe());
    (
        [(header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"))],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Turns broadcast frames into multipart body chunks. Slow viewers skip frames.
pub(crate) fn mjpeg_stream(mut rx: broadcast::Receiver<FramePacket>) -> impl Stream<Item = Result<Bytes, Infallible>> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(packet) => yield Ok(packet.multipart_part()),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    }
}

async fn start_camera(State(state): State<AppState>) -> Json<Value> {
    state.control.start();
    Json(json!({ "status": "camera_started" }))
}

async fn stop_camera(State(state): State<AppState>) -> Json<Value> {
    state.control.stop();
    Json(json!({ "status": "camera_stopped" }))
}

async fn set_distance(
    State(state): State<AppState>,
    Json(body): Json<SetDistance>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.control.set_distance_threshold(body.distance) {
        Ok(distance) => Ok(Json(json!({ "status": "updated", "distance": distance }))),
        Err(e) => Err(bad_request(e)),
    }
}

async fn set_isolation_time(
    State(state): State<AppState>,
    Json(body): Json<SetIsolationTime>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.control.set_isolation_time(body.seconds) {
        Ok(duration) => Ok(Json(json!({ "status": "updated", "seconds": duration.as_secs_f64() }))),
        Err(e) => Err(bad_request(e)),
    }
}

async fn stats(State(state): State<AppState>) -> Json<LiveState> {
    Json(state.control.live_state())
}

fn bad_request(e: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "status": "rejected", "error": e.to_string() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use isolation_watch::EngineConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn state() -> AppState {
        AppState { control: SessionControl::new(&EngineConfig::default()), bus: FrameBus::new(4) }
    }

    #[tokio::test]
    async fn start_and_stop_toggle_the_session() {
        let state = state();
        let Json(started) = start_camera(State(state.clone())).await;
        assert_eq!(started, json!({ "status": "camera_started" }));
        assert!(state.control.is_running());

        let Json(stopped) = stop_camera(State(state.clone())).await;
        assert_eq!(stopped, json!({ "status": "camera_stopped" }));
        assert!(!state.control.is_running());

        // Stopping twice is harmless.
        let Json(again) = stop_camera(State(state.clone())).await;
        assert_eq!(again, json!({ "status": "camera_stopped" }));
    }

    #[tokio::test]
    async fn set_distance_updates_the_shared_threshold() {
        let state = state();
        let Json(body) = set_distance(State(state.clone()), Json(SetDistance { distance: 150 })).await.unwrap();
        assert_eq!(body, json!({ "status": "updated", "distance": 150 }));
        assert_eq!(state.control.settings().distance_threshold(), 150);
    }

    #[tokio::test]
    async fn out_of_range_distance_is_rejected() {
        let state = state();
        let (code, _) = set_distance(State(state.clone()), Json(SetDistance { distance: 1_000_000 }))
            .await
            .unwrap_err();
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(state.control.settings().distance_threshold(), 200);
    }

    #[tokio::test]
    async fn negative_isolation_time_is_rejected() {
        let state = state();
        let (code, _) = set_isolation_time(State(state.clone()), Json(SetIsolationTime { seconds: -3.0 }))
            .await
            .unwrap_err();
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, _) = set_isolation_time(State(state.clone()), Json(SetIsolationTime { seconds: 1e17 }))
            .await
            .unwrap_err();
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(state.control.settings().isolation_time(), Duration::from_secs(20));

        let Json(body) = set_isolation_time(State(state), Json(SetIsolationTime { seconds: 5.0 })).await.unwrap();
        assert_eq!(body, json!({ "status": "updated", "seconds": 5.0 }));
    }

    #[test]
    fn non_integer_distance_does_not_deserialize() {
        assert!(serde_json::from_str::<SetDistance>(r#"{"distance": "far"}"#).is_err());
        assert!(serde_json::from_str::<SetDistance>(r#"{"distance": 12.5}"#).is_err());
        assert!(serde_json::from_str::<SetDistance>(r#"{"distance": -1}"#).is_err());
    }

    #[tokio::test]
    async fn stats_reports_an_empty_state_when_idle() {
        let Json(live) = stats(State(state())).await;
        assert_eq!(serde_json::to_value(&live).unwrap(), json!({ "total": 0, "isolated": 0, "persons": [] }));
    }

    #[tokio::test]
    async fn video_stream_yields_multipart_frames() {
        let bus = FrameBus::new(4);
        let mut stream = Box::pin(mjpeg_stream(bus.frames_tx.subscribe()));
        let packet = FramePacket { ts_millis: 0, width: 1, height: 1, data: Arc::from(vec![9u8]) };
        bus.publish(packet.clone());

        let part = stream.next().await.unwrap().unwrap();
        assert_eq!(part, packet.multipart_part());

        drop(bus);
        assert!(stream.next().await.is_none());
    }
}
