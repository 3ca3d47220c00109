//! QuickPoll Web Server
//!
//! Axum-based REST API for polls plus the WebSocket endpoints that stream
//! live updates.

pub mod routes;
pub mod state;
pub mod websocket;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Polls
        .route("/polls", get(routes::polls::list_polls))
        .route("/polls", post(routes::polls::create_poll))
        .route("/polls/{id}", get(routes::polls::get_poll))
        .route("/polls/{id}", delete(routes::polls::delete_poll))
        .route("/polls/{id}/like", post(routes::polls::toggle_like))
        // Votes
        .route("/votes", post(routes::votes::cast_vote))
        .route("/votes/users/{poll_id}", get(routes::votes::get_user_vote))
        .with_state(state.clone());

    Router::new()
        .nest("/api", api_routes)
        .route("/ws/poll", get(websocket::all_polls_handler))
        .route("/ws/poll/{poll_id}", get(websocket::poll_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the web server.
pub async fn run_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    tracing::info!("Web server listening on http://{}:{}", host, port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use quickpoll_bus::{poll_channel, InMemoryBus, MessageBus, GLOBAL_CHANNEL};
    use quickpoll_core::{BridgeOptions, MemoryPollStore};
    use futures::StreamExt;
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use tower::ServiceExt;

    type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn app() -> (Router, Arc<InMemoryBus>, AppState) {
        let bus = Arc::new(InMemoryBus::new());
        let state = AppState::new(
            Arc::new(MemoryPollStore::new()),
            bus.clone(),
            BridgeOptions::default(),
        );
        (create_router(state.clone()), bus, state)
    }

    async fn call(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header("x-user", user);
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn create(app: &Router) -> Value {
        let (status, poll) = call(
            app,
            "POST",
            "/api/polls",
            Some("admin"),
            Some(json!({"title": "Pets?", "description": "pick one", "options": [{"text": "cats"}, {"text": "dogs"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        poll
    }

    #[tokio::test]
    async fn test_create_poll_broadcasts_globally() {
        let (app, bus, _) = app();
        let mut global = bus.subscribe(GLOBAL_CHANNEL).await.unwrap();

        let poll = create(&app).await;
        assert_eq!(poll["created_by"], "admin");
        assert_eq!(poll["likes_count"], 0);

        let msg: Value = serde_json::from_str(&global.next_message().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "new_poll");
        assert_eq!(msg["id"], poll["id"]);
        assert_eq!(msg["options"][1]["text"], "dogs");

        let (_, stored) = call(&app, "GET", &format!("/api/polls/{}", poll["id"].as_str().unwrap()), None, None).await;
        for field in ["title", "description", "created_at", "created_by", "likes_count"] {
            assert_eq!(msg[field], stored[field], "field {}", field);
        }
        assert_eq!(msg["options"][0]["id"], stored["options"][0]["id"]);
    }

    #[tokio::test]
    async fn test_create_poll_requires_user() {
        let (app, _, _) = app();
        let (status, _) = call(&app, "POST", "/api/polls", None, Some(json!({"title": "x", "options": []}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_vote_broadcasts_tally() {
        let (app, bus, _) = app();
        let poll = create(&app).await;
        let poll_id = poll["id"].as_str().unwrap();
        let option_id = poll["options"][0]["id"].as_str().unwrap();
        let mut sub = bus.subscribe(&poll_channel(poll_id)).await.unwrap();

        let (status, _) = call(
            &app,
            "POST",
            "/api/votes",
            Some("alice"),
            Some(json!({"poll_id": poll_id, "option_id": option_id})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let msg: Value = serde_json::from_str(&sub.next_message().await.unwrap()).unwrap();
        assert_eq!(msg["options"][0], json!({"option_id": option_id, "text": "cats", "votes": 1}));

        let (status, _) = call(
            &app,
            "POST",
            "/api/votes",
            Some("alice"),
            Some(json!({"poll_id": poll_id, "option_id": option_id})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, mine) = call(&app, "GET", &format!("/api/votes/users/{}", poll_id), Some("alice"), None).await;
        assert_eq!(mine, json!({"voted": true, "option_id": option_id}));
        let (_, theirs) = call(&app, "GET", &format!("/api/votes/users/{}", poll_id), Some("bob"), None).await;
        assert_eq!(theirs, json!({"voted": false}));
    }

    #[tokio::test]
    async fn test_like_toggle_broadcasts_count() {
        let (app, bus, _) = app();
        let poll = create(&app).await;
        let poll_id = poll["id"].as_str().unwrap();
        let mut sub = bus.subscribe(&poll_channel(poll_id)).await.unwrap();

        let uri = format!("/api/polls/{}/like", poll_id);
        let (_, body) = call(&app, "POST", &uri, Some("alice"), None).await;
        assert_eq!(body, json!({"poll_id": poll_id, "liked": true, "likes": 1}));
        let (_, body) = call(&app, "POST", &uri, Some("bob"), None).await;
        assert_eq!(body, json!({"poll_id": poll_id, "liked": true, "likes": 2}));
        let (_, body) = call(&app, "POST", &uri, Some("alice"), None).await;
        assert_eq!(body, json!({"poll_id": poll_id, "liked": false, "likes": 1}));

        for expected in [1, 2, 1] {
            let msg: Value = serde_json::from_str(&sub.next_message().await.unwrap()).unwrap();
            assert_eq!(msg["likes"], expected);
        }
    }

    #[tokio::test]
    async fn test_delete_poll_only_by_creator() {
        let (app, bus, _) = app();
        let poll = create(&app).await;
        let poll_id = poll["id"].as_str().unwrap();
        let uri = format!("/api/polls/{}", poll_id);

        let (status, _) = call(&app, "DELETE", &uri, Some("mallory"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let mut global = bus.subscribe(GLOBAL_CHANNEL).await.unwrap();
        let (status, body) = call(&app, "DELETE", &uri, Some("admin"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["poll_id"], poll_id);

        let msg: Value = serde_json::from_str(&global.next_message().await.unwrap()).unwrap();
        assert_eq!(msg, json!({"type": "delete_poll", "poll_id": poll_id}));

        let (status, _) = call(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_writes_succeed_when_bus_down() {
        let (app, bus, state) = app();
        bus.set_available(false);

        let poll = create(&app).await;
        let poll_id = poll["id"].as_str().unwrap();
        let option_id = poll["options"][1]["id"].as_str().unwrap();
        let (status, _) = call(
            &app,
            "POST",
            "/api/votes",
            Some("alice"),
            Some(json!({"poll_id": poll_id, "option_id": option_id})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, fetched) = call(&app, "GET", &format!("/api/polls/{}", poll_id), None, None).await;
        assert_eq!(fetched["options"][1]["votes"], 1);
        assert_eq!(state.broadcaster.registry().poll_count(), 0);
    }

    #[tokio::test]
    async fn test_list_polls() {
        let (app, _, _) = app();
        create(&app).await;
        create(&app).await;
        let (status, polls) = call(&app, "GET", "/api/polls", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(polls.as_array().unwrap().len(), 2);
    }

    async fn listen(state: AppState) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });
        addr
    }

    async fn next_json(ws: &mut ClientSocket) -> Value {
        loop {
            let msg = timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("socket closed")
                .unwrap();
            if msg.is_text() {
                return serde_json::from_str(msg.to_text().unwrap()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_poll_socket_streams_updates_and_cleans_up_on_close() {
        let (app, _, state) = app();
        let poll = create(&app).await;
        let poll_id = poll["id"].as_str().unwrap();
        let option_id = poll["options"][0]["id"].as_str().unwrap();
        let addr = listen(state.clone()).await;

        let (mut ws, _) = connect_async(format!("ws://{}/ws/poll/{}", addr, poll_id)).await.unwrap();
        let tally = next_json(&mut ws).await;
        assert_eq!(tally["poll_id"], poll_id);
        assert_eq!(tally["options"][0]["votes"], 0);
        assert_eq!(next_json(&mut ws).await, json!({"type": "like_update", "poll_id": poll_id, "likes": 0}));
        assert_eq!(state.broadcaster.registry().connection_count(poll_id), 1);

        call(
            &app,
            "POST",
            "/api/votes",
            Some("alice"),
            Some(json!({"poll_id": poll_id, "option_id": option_id})),
        )
        .await;
        assert_eq!(next_json(&mut ws).await["options"][0]["votes"], 1);

        ws.close(None).await.unwrap();
        let registry = state.broadcaster.registry().clone();
        timeout(Duration::from_secs(2), async {
            while registry.has_poll(poll_id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection still registered after close");
    }

    #[tokio::test]
    async fn test_global_socket_receives_new_polls() {
        let (app, bus, state) = app();
        let addr = listen(state).await;

        let (mut ws, _) = connect_async(format!("ws://{}/ws/poll", addr)).await.unwrap();
        timeout(Duration::from_secs(2), async {
            while bus.subscriber_count(GLOBAL_CHANNEL) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let poll = create(&app).await;
        let msg = next_json(&mut ws).await;
        assert_eq!(msg["type"], "new_poll");
        assert_eq!(msg["id"], poll["id"]);

        drop(ws);
        timeout(Duration::from_secs(2), async {
            while bus.subscriber_count(GLOBAL_CHANNEL) > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("global subscription still open after disconnect");
    }
}
