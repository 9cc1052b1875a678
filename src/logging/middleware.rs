use std::time::Instant;

use actix_web::body::MessageBody;
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse};
use actix_web::http::{header, Method, StatusCode};
use actix_web::middleware::Next;
use actix_web::{web, HttpRequest};
use serde_json::Value;
use tracing::{debug, error, info, warn, Level};

use crate::auth::bearer_token;
use crate::logging::mask_sensitive;
use crate::AppState;

/// Matches the default `web::Bytes` limit; larger bodies are not logged.
const LOGGED_BODY_LIMIT: usize = 256 * 1024;

/// Client address, preferring the first `X-Forwarded-For` hop.
pub fn client_ip(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn request_user(req: &HttpRequest) -> String {
    let state = req.app_data::<web::Data<AppState>>();
    match (state, bearer_token(req)) {
        (Some(state), Some(token)) => state
            .auth
            .authenticate(token)
            .map(|user| user.username)
            .unwrap_or_else(|_| "anonymous".to_string()),
        _ => "anonymous".to_string(),
    }
}

fn logs_body(req: &ServiceRequest) -> bool {
    let writes = matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH);
    let json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    let length = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.parse::<usize>().ok());

    writes && json && length.is_some_and(|len| len > 0 && len <= LOGGED_BODY_LIMIT)
}

/// Logs the masked JSON body and puts the bytes back for the handler.
async fn log_body(req: &mut ServiceRequest) -> Result<(), actix_web::Error> {
    let bytes = req.extract::<web::Bytes>().await?;
    if let Ok(body) = serde_json::from_slice::<Value>(&bytes) {
        debug!("Request body: {}", mask_sensitive(&body));
    }
    req.set_payload(Payload::from(bytes));
    Ok(())
}

pub fn level_for(status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else if status.is_client_error() {
        Level::WARN
    } else {
        Level::INFO
    }
}

/// Logs every request on entry and exit; use with `middleware::from_fn`.
pub async fn request_logger(
    mut req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let started = Instant::now();
    let method = req.method().to_string();
    let path = req.path().to_string();
    let ip = client_ip(req.request());
    let user = request_user(req.request());

    info!("-> {} {} - User: {} - IP: {}", method, path, user, ip);
    if logs_body(&req) {
        log_body(&mut req).await?;
    }

    let res = next.call(req).await?;
    let status = res.status();
    let elapsed = started.elapsed().as_millis();

    let level = level_for(status);
    if level == Level::ERROR {
        error!(
            "<- {} {} - User: {} - IP: {} - Status: {} - Time: {}ms",
            method, path, user, ip, status.as_u16(), elapsed
        );
    } else if level == Level::WARN {
        warn!(
            "<- {} {} - User: {} - IP: {} - Status: {} - Time: {}ms",
            method, path, user, ip, status.as_u16(), elapsed
        );
    } else {
        info!(
            "<- {} {} - User: {} - IP: {} - Status: {} - Time: {}ms",
            method, path, user, ip, status.as_u16(), elapsed
        );
    }

    Ok(res)
}
