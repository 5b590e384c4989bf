use std::collections::HashMap;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::{json, Value};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error};

use sphttpd_core::dispatch::{Reply, RequestContext, RequestMethod};
use sphttpd_core::event_loop::SessionHandle;

const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
const SERVER_NAME: &str = "sphttpd";

/// Every path is handled by one fallback; routing happens in the core, where
/// it can be validated before touching the session.
pub fn api_router(session: SessionHandle, request_timeout: Duration) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(SERVER_NAME),
        ))
        .with_state(session)
}

async fn handle_request(
    State(session): State<SessionHandle>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let request = match request_context(&method, &uri, body) {
        Ok(request) => request,
        Err(message) => {
            return json_response(StatusCode::BAD_REQUEST, &json!({ "message": message }))
        }
    };
    debug!("{method} {}", uri.path());

    match session.execute(request).await {
        Ok(reply) => reply_response(reply),
        Err(e) => {
            error!("{method} {}: {e}", uri.path());
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &json!({ "message": "Session logged out" }),
            )
        }
    }
}

fn request_context(method: &Method, uri: &Uri, body: Bytes) -> Result<RequestContext, String> {
    let method = match method.as_str() {
        "GET" => RequestMethod::Get,
        "PUT" => RequestMethod::Put,
        "POST" => RequestMethod::Post,
        other => RequestMethod::Other(other.to_string()),
    };

    let path = urlencoding::decode(uri.path()).map_err(|_| "Bad Request".to_string())?;
    let path_segments = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();

    let query = match uri.query() {
        Some(query) => serde_urlencoded::from_str::<HashMap<String, String>>(query)
            .map_err(|e| e.to_string())?,
        None => HashMap::new(),
    };

    Ok(RequestContext {
        method,
        path_segments,
        query,
        body: body.to_vec(),
    })
}

fn reply_response(reply: Reply) -> Response {
    let status =
        StatusCode::from_u16(reply.status.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &reply.body)
}

fn json_response(status: StatusCode, body: &Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
        body.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use sphttpd_core::catalog::Catalog;
    use sphttpd_core::event_loop::EventLoop;
    use sphttpd_core::session::memory::MemorySession;
    use sphttpd_core::session::MainLoopNotifier;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn track(name: &str) -> String {
        format!("spotify:track:{name:0>22}")
    }

    fn playlist(name: &str, owner: &str) -> String {
        format!("spotify:user:{owner}:playlist:{name:0>22}")
    }

    fn catalog(load_delay_ms: u64) -> Catalog {
        let yaml = format!(
            r#"
username: liesen
load_delay_ms: {load_delay_ms}
sync_delay_ms: 200
playlists:
  - uri: "{mine}"
    title: Road trip
    owner: liesen
    tracks: ["{t1}", "{t2}"]
  - uri: "{theirs}"
    title: Not yours
    owner: bob
    tracks: ["{t1}"]
"#,
            mine = playlist("mine", "liesen"),
            theirs = playlist("theirs", "bob"),
            t1 = track("t1"),
            t2 = track("t2"),
        );
        Catalog::from_yaml(&yaml).unwrap()
    }

    fn app_with(catalog: Catalog, timeout: Duration) -> (Router, watch::Sender<bool>) {
        let notifier = MainLoopNotifier::new();
        let session = MemorySession::new(&catalog, notifier.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_loop, handle) = EventLoop::new(session, notifier, shutdown_rx);
        tokio::spawn(event_loop.run());
        (api_router(handle, timeout), shutdown_tx)
    }

    fn app() -> (Router, watch::Sender<bool>) {
        app_with(catalog(100), Duration::from_secs(60))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn mine_path(action: &str) -> String {
        format!("/playlist/{}{action}", playlist("mine", "liesen"))
    }

    #[tokio::test(start_paused = true)]
    async fn get_playlist() {
        let (app, _shutdown) = app();
        let (status, body) = send(&app, Method::GET, &mine_path(""), "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tracks"], json!([track("t1"), track("t2")]));
        assert_eq!(body["title"], "Road trip");
        assert_eq!(body["creator"], "liesen");
        assert_eq!(body["collaborative"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn responses_carry_server_and_content_type() {
        let (app, _shutdown) = app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nothing/here")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::SERVER], "sphttpd");
        assert_eq!(response.headers()[header::CONTENT_TYPE], JSON_CONTENT_TYPE);
    }

    #[tokio::test(start_paused = true)]
    async fn add_with_no_valid_tracks() {
        let (app, _shutdown) = app();
        let (status, body) = send(
            &app,
            Method::PUT,
            &mine_path("/add?index=0"),
            r#"["badtrack"]"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "message": "No valid tracks" }));
    }

    #[tokio::test(start_paused = true)]
    async fn add_without_index() {
        let (app, _shutdown) = app();
        let body = json!([track("t3")]).to_string();
        let (status, body) = send(&app, Method::PUT, &mine_path("/add"), &body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Bad parameter: index must be numeric");
    }

    #[tokio::test(start_paused = true)]
    async fn add_then_read() {
        let (app, _shutdown) = app();
        let body = json!([track("t3")]).to_string();
        let (status, body) = send(&app, Method::POST, &mine_path("/add?index=1"), &body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tracks"], json!([track("t1"), track("t3"), track("t2")]));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_everything_then_read() {
        let (app, _shutdown) = app();
        let (status, _) = send(&app, Method::PUT, &mine_path("/remove?index=0&count=2"), "").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, Method::GET, &mine_path(""), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tracks"], json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn patch_then_read() {
        let (app, _shutdown) = app();
        let body = json!([track("t2"), track("t1")]).to_string();
        let (status, _) = send(&app, Method::PUT, &mine_path("/patch"), &body).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, Method::GET, &mine_path(""), "").await;
        assert_eq!(body["tracks"], json!([track("t2"), track("t1")]));
    }

    #[tokio::test(start_paused = true)]
    async fn percent_encoded_playlist_uri() {
        let (app, _shutdown) = app();
        let encoded = urlencoding::encode(&playlist("mine", "liesen")).into_owned();
        let path = format!("/playlist/{encoded}/collaborative");
        let (status, body) = send(&app, Method::GET, &path, "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "collaborative": false }));
    }

    #[tokio::test(start_paused = true)]
    async fn error_statuses() {
        let (app, _shutdown) = app();

        let (status, body) = send(&app, Method::DELETE, &mine_path(""), "").await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["message"], "Not Implemented");

        let (status, body) = send(&app, Method::GET, "/playlist/bogus", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Link not found");

        let missing = format!("/playlist/{}", playlist("gone", "liesen"));
        let (status, body) = send(&app, Method::GET, &missing, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Playlist not found");

        let theirs = format!("/playlist/{}/remove?index=0&count=1", playlist("theirs", "bob"));
        let (status, body) = send(&app, Method::PUT, &theirs, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Permission denied");

        let (status, body) = send(&app, Method::PUT, &mine_path("/patch"), "{").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_load_times_out_at_the_transport() {
        let (app, _shutdown) = app_with(catalog(5_000), Duration::from_secs(1));
        let (status, _) = send(&app, Method::GET, &mine_path(""), "").await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

        // The parked request still completes in the core; later reads succeed.
        let (status, _) = send(&app, Method::GET, &mine_path(""), "").await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        tokio::time::sleep(Duration::from_secs(5)).await;
        let (status, _) = send(&app, Method::GET, &mine_path(""), "").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_answers_with_service_unavailable() {
        let (app, shutdown) = app_with(catalog(5_000), Duration::from_secs(60));
        let pending = {
            let app = app.clone();
            tokio::spawn(async move { send(&app, Method::GET, &mine_path(""), "").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.send(true).unwrap();

        let (status, body) = pending.await.unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["message"], "Session logged out");

        let (status, _) = send(&app, Method::GET, &mine_path(""), "").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
