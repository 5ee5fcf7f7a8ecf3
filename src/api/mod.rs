use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::application::{parse_instant, AppError, LedgerService};

/// Shared state behind the request surface.
pub struct ApiState {
    pub service: LedgerService,
    /// Opaque bearer token gating the mutating routes. None leaves them open;
    /// the ledger itself never inspects this.
    pub auth_token: Option<String>,
}

/// Run the HTTP API until the server stops.
pub async fn serve(addr: SocketAddr, state: Arc<ApiState>) -> anyhow::Result<()> {
    let make_svc = make_service_fn(move |_| {
        let state = Arc::clone(&state);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(handle_request(req, state).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    info!("listening on http://{}", addr);
    server.await?;
    Ok(())
}

/// Dispatch a single request. Exposed so tests can drive the surface without
/// binding a socket.
pub async fn handle_request(req: Request<Body>, state: Arc<ApiState>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match route(req, &state).await {
        Ok(response) => response,
        Err(err) => {
            if matches!(err, AppError::Storage(_)) {
                error!("{} {} failed: {}", method, path, err);
            }
            error_response(&err)
        }
    };

    info!("{} {} -> {}", method, path, response.status());
    response
}

async fn route(req: Request<Body>, state: &ApiState) -> Result<Response<Body>, AppError> {
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (req.method(), segments.as_slice()) {
        (&Method::GET, ["entries"]) => list_entries(state).await,
        (&Method::POST, ["entries"]) => {
            if !authorized(&req, state) {
                return Ok(unauthorized_response());
            }
            open_entry(req, state).await
        }
        (&Method::PUT, ["entries", id]) => {
            let id = id.to_string();
            if !authorized(&req, state) {
                return Ok(unauthorized_response());
            }
            close_entry(req, &id, state).await
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("Not Found"))
            .unwrap()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenRequest {
    #[serde(default)]
    departure_time: Option<String>,
    estimated_duration: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseRequest {
    return_time: String,
}

async fn list_entries(state: &ApiState) -> Result<Response<Body>, AppError> {
    let entries = state.service.list().await?;
    json_response(StatusCode::OK, &entries)
}

async fn open_entry(req: Request<Body>, state: &ApiState) -> Result<Response<Body>, AppError> {
    let body: OpenRequest = read_json_body(req).await?;

    // "now" is supplied here, at the boundary; the core takes an explicit
    // instant so it stays deterministic.
    let departure_time = match body.departure_time.as_deref() {
        Some(raw) => parse_instant("departureTime", raw)?,
        None => Utc::now(),
    };

    let entry = state
        .service
        .open(departure_time, body.estimated_duration)
        .await?;
    json_response(StatusCode::CREATED, &entry)
}

async fn close_entry(
    req: Request<Body>,
    raw_id: &str,
    state: &ApiState,
) -> Result<Response<Body>, AppError> {
    let body: CloseRequest = read_json_body(req).await?;
    let return_time = parse_instant("returnTime", &body.return_time)?;

    // An id that does not even parse cannot reference an existing entry.
    let id = Uuid::parse_str(raw_id).map_err(|_| AppError::NotFound(raw_id.to_string()))?;

    let entry = state.service.close(id, return_time).await?;
    json_response(StatusCode::OK, &entry)
}

async fn read_json_body<T: serde::de::DeserializeOwned>(
    req: Request<Body>,
) -> Result<T, AppError> {
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|_| AppError::Validation("Failed to read request body".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| AppError::Validation(format!("Invalid request body: {}", err)))
}

/// Opaque pass/fail gate in front of the mutating routes. The ledger never
/// inspects this.
fn authorized(req: &Request<Body>, state: &ApiState) -> bool {
    let Some(expected) = &state.auth_token else {
        return true;
    };

    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    presented == Some(expected.as_str())
}

fn unauthorized_response() -> Response<Body> {
    let body = json!({
        "error": "unauthorized",
        "message": "Missing or invalid credentials",
    });
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn json_response(
    status: StatusCode,
    payload: &impl serde::Serialize,
) -> Result<Response<Body>, AppError> {
    let body = serde_json::to_vec(payload)
        .map_err(|err| AppError::Storage(anyhow::Error::new(err)))?;
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap())
}

/// Map each error kind to its stable response category.
fn error_response(err: &AppError) -> Response<Body> {
    let status = match err {
        AppError::Validation(_) => StatusCode::BAD_REQUEST,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Conflict(_) => StatusCode::CONFLICT,
        AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = json!({
        "error": err.kind(),
        "message": err.to_string(),
    });
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
