// src/server.rs
//! HTTP 层：
//! - `POST /` 执行单条命令，`POST /pipeline` 执行一批命令
//! - 请求体是 JSON 数组 `["SET", "k", "v"]`（也接受 `[[...]]` 和 `{"_json": ...}`）
//! - 校验 `Authorization: Bearer <token>`
//! - 回复 `{"result": ...}` 或 `{"error": "..."}`
use anyhow::{Context, Result};
use std::convert::Infallible;
use std::net::SocketAddr;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply as _};

use crate::auth::bearer_token;
use crate::config::Config;
use crate::engine::{Engine, Reply};

const WELCOME: &str = "Welcome to crab-stash!";
const MALFORMED_COMMAND: &str =
    "Invalid command array. Expected a string array at root of the command and its arguments.";
const MALFORMED_PIPELINE: &str = "Invalid command array. Expected an array of string arrays at root.";

/// Request headers every command route looks at, plus the raw body.
#[derive(Debug)]
struct CommandRequest {
    authorization: Option<String>,
    base64: bool,
    body: Bytes,
}

fn json_response(status: StatusCode, body: &Value) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    json_response(status, &json!({ "error": message }))
}

/// Render an engine reply as JSON. Strings are base64 encoded when the client
/// asked for it, and bulk strings that are not UTF-8 always are.
pub fn reply_to_json(reply: Reply, base64: bool) -> Value {
    match reply {
        Reply::Status(s) if base64 => Value::String(STANDARD.encode(s)),
        Reply::Status(s) => Value::String(s.to_string()),
        Reply::Integer(n) => Value::Number(n.into()),
        Reply::Bulk(None) => Value::Null,
        Reply::Bulk(Some(b)) if base64 => Value::String(STANDARD.encode(&b)),
        Reply::Bulk(Some(b)) => match std::str::from_utf8(&b) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::String(STANDARD.encode(&b)),
        },
        Reply::Array(items) => Value::Array(items.into_iter().map(|r| reply_to_json(r, base64)).collect()),
    }
}

/// JSON scalars become their text form; `null` is the empty string.
fn json_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The body's top-level array, unwrapping `{"_json": [...]}`.
fn root_array<'a>(body: &'a Value, malformed: &str) -> Result<&'a Vec<Value>, String> {
    match body {
        Value::Array(items) => Ok(items),
        other => other
            .get("_json")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed.to_string()),
    }
}

/// `["CMD", ...]`, `[["CMD", ...]]` or `{"_json": ...}` to `["CMD", ...]` as text.
fn parse_command_body(body: &Value) -> Result<Vec<String>, String> {
    let root = root_array(body, MALFORMED_COMMAND)?;
    let parts = match root.first() {
        Some(Value::Array(inner)) => inner,
        _ => root,
    };
    if parts.is_empty() {
        return Err("Command array cannot be empty".to_string());
    }
    Ok(parts.iter().map(json_arg).collect())
}

/// An array of command arrays. Empty inner arrays are dropped.
fn parse_pipeline_body(body: &Value) -> Result<Vec<Vec<String>>, String> {
    let root = root_array(body, MALFORMED_PIPELINE)?;
    root.iter()
        .map(|item| {
            item.as_array()
                .map(|parts| parts.iter().map(json_arg).collect::<Vec<_>>())
                .ok_or_else(|| MALFORMED_PIPELINE.to_string())
        })
        .filter(|parts| parts.as_ref().map_or(true, |p| !p.is_empty()))
        .collect()
}

fn run(engine: &Engine, parts: Vec<String>, base64: bool) -> Value {
    let mut parts = parts.into_iter();
    let name = parts.next().unwrap_or_default();
    let args = parts.map(Bytes::from).collect();
    match engine.dispatch(&name, args) {
        Ok(reply) => json!({ "result": reply_to_json(reply, base64) }),
        Err(err) => json!({ "error": err.to_string() }),
    }
}

/// Authenticate and decode the body, or produce the error response to send.
fn prepare(engine: &Engine, req: &CommandRequest) -> Result<Value, Response> {
    let credential = req.authorization.as_deref().and_then(bearer_token);
    if engine.authenticate(credential).is_err() {
        warn!("rejected request with missing or invalid token");
        return Err(error_response(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }
    serde_json::from_slice(&req.body)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &format!("Invalid JSON body: {e}")))
}

/// Run `work` on the blocking pool; shard locks must not be taken on a runtime worker.
async fn off_runtime<F>(work: F) -> Response
where
    F: FnOnce() -> Value + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(body) => json_response(StatusCode::OK, &body),
        Err(err) => {
            error!(%err, "command task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

async fn handle_command(req: CommandRequest, engine: Engine) -> Result<Response, Infallible> {
    let body = match prepare(&engine, &req) {
        Ok(body) => body,
        Err(resp) => return Ok(resp),
    };
    let parts = match parse_command_body(&body) {
        Ok(parts) => parts,
        Err(msg) => return Ok(error_response(StatusCode::BAD_REQUEST, &msg)),
    };
    let base64 = req.base64;
    Ok(off_runtime(move || run(&engine, parts, base64)).await)
}

async fn handle_pipeline(req: CommandRequest, engine: Engine) -> Result<Response, Infallible> {
    let body = match prepare(&engine, &req) {
        Ok(body) => body,
        Err(resp) => return Ok(resp),
    };
    let commands = match parse_pipeline_body(&body) {
        Ok(commands) => commands,
        Err(msg) => return Ok(error_response(StatusCode::BAD_REQUEST, &msg)),
    };
    debug!(commands = commands.len(), "pipeline");
    let base64 = req.base64;
    Ok(off_runtime(move || {
        Value::Array(commands.into_iter().map(|parts| run(&engine, parts, base64)).collect())
    })
    .await)
}

async fn handle_metrics(engine: Engine, enabled: bool) -> Result<Response, Infallible> {
    if !enabled {
        return Ok(error_response(StatusCode::NOT_FOUND, "Not Found"));
    }
    let text = engine.metrics().to_prometheus(engine.keyspace());
    Ok(warp::reply::with_header(text, "content-type", "text/plain; version=0.0.4").into_response())
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Length Required")
    } else if err.find::<warp::reject::InvalidHeader>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid header")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
    } else {
        warn!(?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    };
    Ok(error_response(status, message))
}

fn command_request(max_body: u64) -> impl Filter<Extract = (CommandRequest,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::header::optional::<String>("upstash-encoding"))
        .and(warp::body::content_length_limit(max_body))
        .and(warp::body::bytes())
        .map(|authorization: Option<String>, encoding: Option<String>, body: Bytes| CommandRequest {
            authorization,
            base64: encoding.is_some_and(|e| e.trim().eq_ignore_ascii_case("base64")),
            body,
        })
}

/// All routes, ready for `warp::serve` or `warp::test`.
pub fn routes(
    engine: Engine,
    max_body: u64,
    metrics_enabled: bool,
) -> impl Filter<Extract = (Response,), Error = Infallible> + Clone {
    let with_engine = warp::any().map(move || engine.clone());

    // Path before method, so unknown paths reject as 404 rather than 405.
    let index = warp::path::end()
        .and(warp::get())
        .map(|| WELCOME.into_response());
    let health = warp::path!("health")
        .and(warp::get())
        .map(|| warp::reply::json(&json!({ "status": "ok" })).into_response());
    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and(with_engine.clone())
        .and_then(move |engine| handle_metrics(engine, metrics_enabled));
    let command = warp::path::end()
        .and(warp::post())
        .and(command_request(max_body))
        .and(with_engine.clone())
        .and_then(handle_command);
    let pipeline = warp::path!("pipeline")
        .and(warp::post())
        .and(command_request(max_body))
        .and(with_engine)
        .and_then(handle_pipeline);

    index
        .or(health)
        .unify()
        .or(metrics)
        .unify()
        .or(command)
        .unify()
        .or(pipeline)
        .unify()
        .recover(handle_rejection)
        .unify()
}

/// Bind `cfg.host:cfg.port` and serve until Ctrl-C.
pub async fn start(engine: Engine, cfg: &Config) -> Result<()> {
    let addr: SocketAddr = cfg
        .server_address()
        .parse()
        .with_context(|| format!("Invalid listen address {}", cfg.server_address()))?;
    let routes = routes(engine, cfg.max_body_bytes, cfg.metrics_enabled);
    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%bound, "crab-stash listening");
    server.await;
    Ok(())
}
