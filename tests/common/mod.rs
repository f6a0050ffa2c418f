//! In-process mock AceQL gateway for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Form, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

pub const SESSION_ID: &str = "s1";
pub const CONNECTION_ID: &str = "c1";
pub const PASSWORD: &str = "secret";

#[derive(Debug, Default)]
pub struct MockState {
    /// "METHOD action[/param]" per request, in arrival order.
    pub calls: Mutex<Vec<String>>,
    /// Form bodies of execute_update / execute_query.
    pub forms: Mutex<Vec<HashMap<String, String>>>,
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
    pub auto_commit: Mutex<bool>,
    pub fail_next_commit: Mutex<bool>,
    pub fail_next_auto_commit_restore: Mutex<bool>,
    pub logins: Mutex<u32>,
}

impl MockState {
    pub fn calls(&self) -> Vec<String> { self.calls.lock().clone() }

    pub fn last_form(&self) -> HashMap<String, String> { self.forms.lock().last().cloned().unwrap_or_default() }

    fn record(&self, call: String) { self.calls.lock().push(call); }
}

pub struct MockGateway {
    pub url: String,
    pub state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl Drop for MockGateway {
    fn drop(&mut self) { self.handle.abort(); }
}

impl MockGateway {
    pub async fn start() -> MockGateway {
        let state = Arc::new(MockState { auto_commit: Mutex::new(true), ..Default::default() });
        let app = Router::new()
            .route("/aceql/database/{db}/username/{user}/connect", get(connect))
            .route("/aceql/session/{sid}/connection/{cid}/blob_upload", post(blob_upload))
            .route("/aceql/session/{sid}/connection/{cid}/{action}", get(session_get).post(session_post))
            .route("/aceql/session/{sid}/connection/{cid}/{action}/{param}", get(session_get_param))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.expect("bind 127.0.0.1:0");
        let port = listener.local_addr().expect("local addr").port();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("mock gateway error: {e:?}");
            }
        });
        MockGateway { url: format!("http://127.0.0.1:{}/aceql", port), state, handle }
    }

    pub fn connection_string(&self) -> String {
        format!("Server={};Database=sampledb;Username=user1;Password={}", self.url, PASSWORD)
    }
}

fn json(status: StatusCode, body: serde_json::Value) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}

fn ok(extra: serde_json::Value) -> Response {
    let mut body = serde_json::json!({ "status": "OK" });
    if let (Some(obj), Some(more)) = (body.as_object_mut(), extra.as_object()) {
        for (k, v) in more {
            obj.insert(k.clone(), v.clone());
        }
    }
    json(StatusCode::OK, body)
}

fn fail(status: StatusCode, error_type: i32, message: &str) -> Response {
    json(
        status,
        serde_json::json!({
            "status": "FAIL",
            "error_type": error_type,
            "error_message": message,
            "stack_trace": "org.kawanfw.sql.servlet.ServerSqlManager.mock(Mock.java:1)",
        }),
    )
}

fn check_session(sid: &str, cid: &str) -> Option<Response> {
    if sid != SESSION_ID || cid != CONNECTION_ID {
        return Some(fail(StatusCode::OK, 1, "Unknown session"));
    }
    None
}

async fn connect(
    State(state): State<Arc<MockState>>,
    Path((db, user)): Path<(String, String)>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    state.record(format!("GET connect {}/{}", db, user));
    if q.get("password").map(String::as_str) != Some(PASSWORD) {
        // the gateway reports bad credentials with HTTP 200 and a FAIL status
        return fail(StatusCode::OK, 1, "Invalid username or password.");
    }
    *state.logins.lock() += 1;
    ok(serde_json::json!({ "session_id": SESSION_ID, "connection_id": CONNECTION_ID }))
}

async fn session_get(
    State(state): State<Arc<MockState>>,
    Path((sid, cid, action)): Path<(String, String, String)>,
) -> Response {
    state.record(format!("GET {}", action));
    if let Some(r) = check_session(&sid, &cid) {
        return r;
    }
    match action.as_str() {
        "disconnect" => ok(serde_json::json!({})),
        "get_version" => ok(serde_json::json!({ "result": "AceQL HTTP mock 12.0" })),
        "get_auto_commit" => ok(serde_json::json!({ "result": state.auto_commit.lock().to_string() })),
        "is_read_only" => ok(serde_json::json!({ "result": "false" })),
        "get_transaction_isolation_level" => ok(serde_json::json!({ "result": "read_committed" })),
        "commit" => {
            let mut fail_next = state.fail_next_commit.lock();
            if *fail_next {
                *fail_next = false;
                return fail(StatusCode::OK, 2, "ERROR: could not serialize access due to concurrent update");
            }
            ok(serde_json::json!({}))
        }
        "rollback" => ok(serde_json::json!({})),
        other => fail(StatusCode::NOT_FOUND, 3, &format!("unknown action {}", other)),
    }
}

async fn session_get_param(
    State(state): State<Arc<MockState>>,
    Path((sid, cid, action, param)): Path<(String, String, String, String)>,
) -> Response {
    state.record(format!("GET {}/{}", action, param));
    if let Some(r) = check_session(&sid, &cid) {
        return r;
    }
    match action.as_str() {
        "set_auto_commit" => {
            if param == "true" {
                let mut fail_next = state.fail_next_auto_commit_restore.lock();
                if *fail_next {
                    *fail_next = false;
                    return fail(StatusCode::OK, 2, "connection reset while restoring auto-commit");
                }
            }
            *state.auto_commit.lock() = param == "true";
            ok(serde_json::json!({}))
        }
        "set_transaction_isolation_level" | "set_read_only" => ok(serde_json::json!({})),
        other => fail(StatusCode::NOT_FOUND, 3, &format!("unknown action {}", other)),
    }
}

async fn session_post(
    State(state): State<Arc<MockState>>,
    Path((sid, cid, action)): Path<(String, String, String)>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.record(format!("POST {}", action));
    if let Some(r) = check_session(&sid, &cid) {
        return r;
    }
    match action.as_str() {
        "execute_update" => {
            state.forms.lock().push(form.clone());
            execute_update(&state, &form)
        }
        "execute_query" => {
            state.forms.lock().push(form.clone());
            execute_query(&state, &form)
        }
        "blob_download" => {
            let id = form.get("blob_id").cloned().unwrap_or_default();
            match state.blobs.lock().get(&id) {
                Some(bytes) => (StatusCode::OK, [(header::CONTENT_TYPE, "application/octet-stream")], chunked(bytes.clone(), 1024)).into_response(),
                None => fail(StatusCode::NOT_FOUND, 2, &format!("no such blob: {}", id)),
            }
        }
        "get_blob_length" => {
            let id = form.get("blob_id").cloned().unwrap_or_default();
            match state.blobs.lock().get(&id) {
                Some(bytes) => ok(serde_json::json!({ "length": bytes.len() })),
                None => fail(StatusCode::OK, 2, &format!("no such blob: {}", id)),
            }
        }
        other => fail(StatusCode::NOT_FOUND, 3, &format!("unknown action {}", other)),
    }
}

fn execute_update(state: &MockState, form: &HashMap<String, String>) -> Response {
    let sql = form.get("sql").cloned().unwrap_or_default();
    if sql.contains("no_such_table") {
        return fail(StatusCode::OK, 2, "ERROR: relation \"no_such_table\" does not exist");
    }
    // every BLOB parameter must have been uploaded first
    for (k, v) in form {
        if k.starts_with("param_type_") && v == "BLOB" {
            let value_key = k.replace("param_type_", "param_value_");
            let id = form.get(&value_key).cloned().unwrap_or_default();
            if !state.blobs.lock().contains_key(&id) {
                return fail(StatusCode::OK, 2, &format!("blob {} was not uploaded", id));
            }
        }
    }
    if sql.to_ascii_lowercase().starts_with("{call") {
        return ok(serde_json::json!({ "row_count": 0, "parameters_out_per_name": { "total": "42" } }));
    }
    ok(serde_json::json!({ "row_count": 1 }))
}

fn execute_query(state: &MockState, form: &HashMap<String, String>) -> Response {
    let sql = form.get("sql").cloned().unwrap_or_default();
    if sql.contains("http_error") {
        return fail(StatusCode::INTERNAL_SERVER_ERROR, 4, "gateway exploded");
    }
    if sql.contains("no_such_table") {
        return fail(StatusCode::OK, 2, "ERROR: relation \"no_such_table\" does not exist");
    }
    let body = if sql.contains("empty") {
        r#"{"status":"OK","column_types":["INTEGER"],"query_rows":[],"row_count":0}"#.to_string()
    } else if sql.contains("image") {
        let ids: Vec<String> = state.blobs.lock().keys().cloned().collect();
        let rows: Vec<serde_json::Value> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| serde_json::json!({ (format!("row_{}", i + 1)): [{ "id": (i + 1).to_string() }, { "image": id }] }))
            .collect();
        serde_json::json!({ "status": "OK", "column_types": ["INTEGER", "BLOB"], "query_rows": rows, "row_count": ids.len() }).to_string()
    } else {
        // three rows; the `row_count` column collides with the trailing sentinel on purpose
        r#"{
  "status" : "OK",
  "column_types" : ["INTEGER", "VARCHAR", "INTEGER", "TIMESTAMP"],
  "query_rows" : [
    { "row_1" : [ { "customer_id" : "1" }, { "name" : "Smith" }, { "row_count" : "10" }, { "created" : "1700000000000" } ] },
    { "row_2" : [ { "customer_id" : "2" }, { "name" : "Jones" }, { "row_count" : "20" }, { "created" : "NULL" } ] },
    { "row_3" : [ { "customer_id" : "3" }, { "name" : "Martin" }, { "row_count" : "30" }, { "created" : "1700000001000" } ] }
  ],
  "row_count" : 3
}"#
        .to_string()
    };
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], chunked(body.into_bytes(), 16)).into_response()
}

/// Body sent in fixed-size chunks so clients see many frame boundaries.
fn chunked(bytes: Vec<u8>, size: usize) -> Body {
    let chunks: Vec<Result<Bytes, std::io::Error>> = bytes.chunks(size).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
    Body::from_stream(futures::stream::iter(chunks))
}

async fn blob_upload(
    State(state): State<Arc<MockState>>,
    Path((sid, cid)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Response {
    state.record("POST blob_upload".to_string());
    if let Some(r) = check_session(&sid, &cid) {
        return r;
    }
    let mut blob_id: Option<String> = None;
    let mut content: Vec<u8> = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "blob_id" => blob_id = field.text().await.ok(),
            "file" => content = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default(),
            _ => {}
        }
    }
    match blob_id {
        Some(id) => {
            state.blobs.lock().insert(id, content);
            ok(serde_json::json!({}))
        }
        None => fail(StatusCode::BAD_REQUEST, 2, "blob_id part missing"),
    }
}
