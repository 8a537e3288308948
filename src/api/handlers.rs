use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::errors::AppError;
use crate::models::schemas::{
    GatewayRequest, GatewayResponse, HealthResponse, McpGatewayResponse, Route,
};
use crate::pipeline::{self, PipelineResult};
use crate::AppState;

/// Rate-limit key: first `X-Forwarded-For` entry when present, else the
/// peer address, else a shared bucket.
fn client_ip(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Admission middleware for `/gateway`. Requests denied here never reach
/// the pipeline; admitted requests only count against the bucket once the
/// handler produced a 200.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if req.uri().path() != "/gateway" {
        return next.run(req).await;
    }

    let ip = client_ip(
        req.headers(),
        req.extensions().get::<ConnectInfo<SocketAddr>>(),
    );

    let (allowed, retry_after) = state.rate_limiter.is_allowed(&ip);
    if !allowed {
        return AppError::RateLimited { retry_after }.into_response();
    }

    let response = next.run(req).await;
    if response.status() == StatusCode::OK {
        state.rate_limiter.record(&ip);
    }
    response
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        memory_entries: state.memory.count(),
        datahaven_available: state.datahaven.is_available().await,
        providers_available: state.registry.list_available().await,
    })
}

fn user_id_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

pub async fn gateway(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<GatewayRequest>,
) -> Result<Json<GatewayResponse>, AppError> {
    request.validate().map_err(AppError::Validation)?;
    let user_id = user_id_from(&headers);
    let result = pipeline::run(&state, request, user_id).await;
    Ok(Json(gateway_response(result)))
}

pub async fn mcp_gateway(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<GatewayRequest>,
) -> Result<Json<McpGatewayResponse>, AppError> {
    request.validate().map_err(AppError::Validation)?;
    let user_id = user_id_from(&headers);
    let result = pipeline::run(&state, request, user_id).await;
    Ok(Json(mcp_response(result)))
}

fn gateway_response(result: PipelineResult) -> GatewayResponse {
    let ctx = result.ctx;
    GatewayResponse {
        request_id: ctx.request_id.to_string(),
        response: result.response_text,
        route: ctx.route.unwrap_or(Route::Blocked),
        model_used: ctx.model,
        token_stats: ctx.token_stats,
        latency: ctx.latency,
        estimated_cost: result.estimated_cost,
        redaction: ctx.redaction,
        privacy_level: result.privacy_level,
        guardrails: result.guardrails,
        datahaven_proof: result.proof,
    }
}

fn mcp_response(result: PipelineResult) -> McpGatewayResponse {
    let ctx = result.ctx;
    McpGatewayResponse {
        request_id: ctx.request_id.to_string(),
        response: result.response_text,
        route: ctx.route.unwrap_or(Route::Blocked),
        provider: ctx.provider.unwrap_or_default(),
        model_used: ctx.model,
        token_stats: ctx.token_stats,
        latency: ctx.latency,
        estimated_cost: result.estimated_cost,
        redaction: ctx.redaction,
        privacy_level: result.privacy_level,
        guardrails: result.guardrails,
        audit_trail: ctx.audit_trail,
        policy_applied: result.policy,
        datahaven_proof: result.proof,
    }
}
