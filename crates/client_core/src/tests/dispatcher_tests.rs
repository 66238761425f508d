use super::*;
use crate::{
    api::HttpProfileApi,
    session::{MutationStatus, SessionState},
};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::domain::Credential;
use tokio::{
    net::TcpListener,
    sync::{Mutex, Notify},
};

#[derive(Clone, Default)]
struct TestServer {
    bodies: Arc<Mutex<Vec<Value>>>,
    gate: Arc<Notify>,
}

fn identity(username: &str) -> Identity {
    Identity {
        id: UserId("u1".into()),
        username: username.into(),
        email: "u1@example.com".into(),
        password: None,
        avatar: None,
        created_at: None,
        updated_at: None,
    }
}

async fn spawn_server(app: Router) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn dispatcher_for(server_url: &str, state: SessionState, timeout: Duration) -> MutationDispatcher {
    let api = HttpProfileApi::new(server_url).expect("http api");
    MutationDispatcher::new(Arc::new(api), SessionStore::with_state(state), timeout)
}

async fn update_echo(
    State(state): State<TestServer>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.bodies.lock().await.push(body.clone());
    let username = body
        .get("username")
        .and_then(Value::as_str)
        .unwrap_or("old")
        .to_string();
    Json(json!({
        "success": true,
        "_id": id,
        "username": username,
        "email": "u1@example.com",
        "avatar": body.get("avatar").cloned(),
    }))
}

async fn update_gated(
    State(state): State<TestServer>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.gate.notified().await;
    update_echo(State(state), Path(id), Json(body)).await
}

async fn reject(message: &'static str) -> Json<Value> {
    Json(json!({ "success": false, "statusCode": 401, "message": message }))
}

#[tokio::test]
async fn update_replaces_identity_on_success() {
    let server = TestServer::default();
    let app = Router::new()
        .route("/api/user/update/:id", post(update_echo))
        .with_state(server.clone());
    let url = spawn_server(app).await;
    let dispatcher = dispatcher_for(
        &url,
        SessionState::signed_in(identity("old")),
        Duration::from_secs(5),
    );

    let updated = dispatcher
        .update_profile(
            &UserId("u1".into()),
            PendingFormEdits {
                username: Some("alice".into()),
                ..PendingFormEdits::default()
            },
        )
        .await
        .expect("update");

    assert_eq!(updated.username, "alice");
    let snapshot = dispatcher.store().snapshot();
    assert_eq!(
        snapshot.status,
        MutationStatus::Succeeded(MutationKind::UpdateProfile)
    );
    assert_eq!(snapshot.identity.map(|i| i.username), Some("alice".into()));
    assert_eq!(
        server.bodies.lock().await.clone(),
        vec![json!({ "username": "alice" })]
    );
}

#[tokio::test]
async fn update_with_success_false_leaves_identity_untouched() {
    let app = Router::new().route(
        "/api/user/update/:id",
        post(|| reject("username already taken")),
    );
    let url = spawn_server(app).await;
    let dispatcher = dispatcher_for(
        &url,
        SessionState::signed_in(identity("old")),
        Duration::from_secs(5),
    );

    let err = dispatcher
        .update_profile(
            &UserId("u1".into()),
            PendingFormEdits {
                username: Some("alice".into()),
                ..PendingFormEdits::default()
            },
        )
        .await
        .expect_err("must fail");

    assert_eq!(err.message(), "username already taken");
    let snapshot = dispatcher.store().snapshot();
    assert_eq!(snapshot.identity, Some(identity("old")));
    assert_eq!(snapshot.status.error_message(), Some("username already taken"));
}

#[tokio::test]
async fn delete_rejection_keeps_identity() {
    let app = Router::new().route("/api/user/delete/:id", delete(|| reject("not authorized")));
    let url = spawn_server(app).await;
    let dispatcher = dispatcher_for(
        &url,
        SessionState::signed_in(identity("old")),
        Duration::from_secs(5),
    );

    let err = dispatcher
        .delete_account(&UserId("u1".into()))
        .await
        .expect_err("must fail");

    assert!(matches!(err, MutationError::Application { .. }));
    let snapshot = dispatcher.store().snapshot();
    assert_eq!(snapshot.identity, Some(identity("old")));
    assert_eq!(
        snapshot.status,
        MutationStatus::Failed {
            kind: MutationKind::DeleteAccount,
            message: "not authorized".into(),
        }
    );
}

#[tokio::test]
async fn delete_success_clears_identity() {
    let app = Router::new().route(
        "/api/user/delete/:id",
        delete(|| async { Json(json!("User has been deleted!")) }),
    );
    let url = spawn_server(app).await;
    let dispatcher = dispatcher_for(
        &url,
        SessionState::signed_in(identity("old")),
        Duration::from_secs(5),
    );

    dispatcher
        .delete_account(&UserId("u1".into()))
        .await
        .expect("delete");

    let snapshot = dispatcher.store().snapshot();
    assert!(snapshot.identity.is_none());
    assert_eq!(
        snapshot.status,
        MutationStatus::Succeeded(MutationKind::DeleteAccount)
    );
}

#[tokio::test]
async fn non_json_error_status_maps_to_application_failure() {
    let app = Router::new().route(
        "/api/auth/signout",
        get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
    );
    let url = spawn_server(app).await;
    let dispatcher = dispatcher_for(
        &url,
        SessionState::signed_in(identity("old")),
        Duration::from_secs(5),
    );

    let err = dispatcher.sign_out().await.expect_err("must fail");

    assert_eq!(
        err,
        MutationError::Application {
            status: Some(502),
            message: "server returned 502 Bad Gateway".into(),
        }
    );
    assert_eq!(dispatcher.store().snapshot().identity, Some(identity("old")));
}

#[tokio::test]
async fn transport_failure_is_captured_into_failed_status() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let dispatcher = dispatcher_for(
        &format!("http://{addr}"),
        SessionState::signed_in(identity("old")),
        Duration::from_secs(5),
    );

    let err = dispatcher.sign_out().await.expect_err("must fail");

    assert!(matches!(err, MutationError::Transport(_)), "got {err:?}");
    let snapshot = dispatcher.store().snapshot();
    assert_eq!(snapshot.identity, Some(identity("old")));
    assert!(snapshot.status.error_message().is_some());
}

#[tokio::test]
async fn slow_backend_times_out() {
    let app = Router::new().route(
        "/api/auth/signout",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "success": true }))
        }),
    );
    let url = spawn_server(app).await;
    let dispatcher = dispatcher_for(
        &url,
        SessionState::signed_in(identity("old")),
        Duration::from_millis(100),
    );

    let err = dispatcher.sign_out().await.expect_err("must time out");

    assert_eq!(err, MutationError::Timeout);
    assert_eq!(
        dispatcher.store().snapshot().status.error_message(),
        Some("timeout")
    );
}

#[tokio::test]
async fn second_mutation_while_pending_is_rejected() {
    let server = TestServer::default();
    let app = Router::new()
        .route("/api/user/update/:id", post(update_gated))
        .route("/api/user/delete/:id", delete(|| async { Json(json!({ "success": true })) }))
        .with_state(server.clone());
    let url = spawn_server(app).await;
    let dispatcher = Arc::new(dispatcher_for(
        &url,
        SessionState::signed_in(identity("old")),
        Duration::from_secs(5),
    ));

    let mut updates = dispatcher.store().subscribe();
    let pending_update = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            dispatcher
                .update_profile(
                    &UserId("u1".into()),
                    PendingFormEdits {
                        username: Some("alice".into()),
                        ..PendingFormEdits::default()
                    },
                )
                .await
        })
    };

    loop {
        let state = updates.recv().await.expect("session update");
        if state.status.is_pending() {
            break;
        }
    }

    let err = dispatcher
        .delete_account(&UserId("u1".into()))
        .await
        .expect_err("must be rejected");
    assert_eq!(err, MutationError::Busy);
    assert_eq!(
        dispatcher.store().snapshot().status,
        MutationStatus::Pending(MutationKind::UpdateProfile)
    );

    server.gate.notify_one();
    let updated = pending_update.await.expect("join").expect("update");
    assert_eq!(updated.username, "alice");

    let mut statuses = Vec::new();
    while let Ok(state) = updates.try_recv() {
        statuses.push(state.status);
    }
    assert_eq!(
        statuses,
        vec![MutationStatus::Succeeded(MutationKind::UpdateProfile)]
    );
}

async fn sign_in_sets_cookie(Json(body): Json<Value>) -> impl IntoResponse {
    if body["password"] != "hunter2" {
        return (
            StatusCode::UNAUTHORIZED,
            HeaderMap::new(),
            Json(json!({ "success": false, "statusCode": 401, "message": "Wrong credentials!" })),
        );
    }
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        "access_token=token-u1; Path=/; HttpOnly".parse().expect("cookie"),
    );
    (
        StatusCode::OK,
        headers,
        Json(json!({ "_id": "u1", "username": "old", "email": "u1@example.com" })),
    )
}

async fn sign_out_requires_cookie(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let has_cookie = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("access_token=token-u1"));
    if has_cookie {
        (StatusCode::OK, Json(json!("User has been logged out!")))
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "statusCode": 401, "message": "Unauthorized" })),
        )
    }
}

#[tokio::test]
async fn sign_in_then_sign_out_round_trips_session_cookie() {
    let app = Router::new()
        .route("/api/auth/signin", post(sign_in_sets_cookie))
        .route("/api/auth/signout", get(sign_out_requires_cookie));
    let url = spawn_server(app).await;
    let dispatcher = dispatcher_for(&url, SessionState::default(), Duration::from_secs(5));

    let err = dispatcher
        .sign_in(SignInRequest {
            email: "u1@example.com".into(),
            password: Credential::new("wrong"),
        })
        .await
        .expect_err("wrong password");
    assert_eq!(err.message(), "Wrong credentials!");
    assert!(dispatcher.store().snapshot().identity.is_none());

    let identity = dispatcher
        .sign_in(SignInRequest {
            email: "u1@example.com".into(),
            password: Credential::new("hunter2"),
        })
        .await
        .expect("sign in");
    assert_eq!(identity.id, UserId("u1".into()));
    assert!(dispatcher.store().snapshot().identity.is_some());

    dispatcher.sign_out().await.expect("sign out");
    let snapshot = dispatcher.store().snapshot();
    assert!(snapshot.identity.is_none());
    assert_eq!(
        snapshot.status,
        MutationStatus::Succeeded(MutationKind::SignOut)
    );
}

#[tokio::test]
async fn abandoned_mutation_does_not_stay_pending() {
    let server = TestServer::default();
    let app = Router::new()
        .route("/api/user/update/:id", post(update_gated))
        .with_state(server);
    let url = spawn_server(app).await;
    let dispatcher = dispatcher_for(
        &url,
        SessionState::signed_in(identity("old")),
        Duration::from_secs(5),
    );

    let id = UserId("u1".into());
    let update = dispatcher.update_profile(&id, PendingFormEdits::default());
    let _ = tokio::time::timeout(Duration::from_millis(100), update).await;

    let snapshot = dispatcher.store().snapshot();
    assert_eq!(snapshot.status.error_message(), Some("cancelled"));
    assert_eq!(snapshot.identity, Some(identity("old")));
}

#[tokio::test]
async fn error_status_keeps_server_message_with_unknown_code() {
    let app = Router::new().route(
        "/api/user/update/:id",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "statusCode": 500,
                    "code": 11000,
                    "message": "E11000 duplicate key error collection: users"
                })),
            )
        }),
    );
    let url = spawn_server(app).await;
    let dispatcher = dispatcher_for(
        &url,
        SessionState::signed_in(identity("old")),
        Duration::from_secs(5),
    );

    let err = dispatcher
        .update_profile(
            &UserId("u1".into()),
            PendingFormEdits {
                email: Some("taken@example.com".into()),
                ..PendingFormEdits::default()
            },
        )
        .await
        .expect_err("must fail");

    assert_eq!(
        err,
        MutationError::Application {
            status: Some(500),
            message: "E11000 duplicate key error collection: users".into(),
        }
    );
}
