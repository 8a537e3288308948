//! The nine-stage request pipeline.
//!
//! Stages run sequentially inside the request task; each one appends an
//! audit entry with its measured duration. No stage may fail the request:
//! soft failures demote to default behavior and are recorded in audit
//! metadata. The only hard exits are the input-guardrail block at S1 and
//! the admission checks that run before the pipeline starts.

pub mod post;

use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::datahaven::{content_hash, InferenceRecord};
use crate::jobs::Task;
use crate::middleware::guardrail::{self, ERROR_SENTINEL};
use crate::middleware::pii::PiiGuard;
use crate::middleware::policy::PolicyEngine;
use crate::models::context::{round2, stages, AuditEntry, RequestContext};
use crate::models::policy::Policy;
use crate::models::schemas::{
    DataHavenVerification, GatewayRequest, GuardrailInfo, Route,
};
use crate::proxy::FALLBACK_ORDER;
use crate::AppState;

/// Everything the HTTP surface needs to assemble either response shape.
pub struct PipelineResult {
    pub ctx: RequestContext,
    pub response_text: String,
    pub guardrails: GuardrailInfo,
    pub estimated_cost: f64,
    pub privacy_level: String,
    pub policy: Policy,
    pub proof: Option<DataHavenVerification>,
}

/// Clears the PII store entry when the request scope ends, whatever path
/// it took out — early return, panic, or client disconnect.
struct PiiClearGuard {
    guard: Arc<PiiGuard>,
    request_id: Uuid,
}

impl Drop for PiiClearGuard {
    fn drop(&mut self) {
        self.guard.clear(self.request_id);
    }
}

fn ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub async fn run(
    state: &AppState,
    request: GatewayRequest,
    user_id: Option<String>,
) -> PipelineResult {
    let request_id = Uuid::new_v4();
    let t_start = Instant::now();
    let mut ctx = RequestContext::new(request_id, user_id, request.prompt.clone());

    // ─── [S0] Policy fetch ────────────────────────────────────
    let t0 = Instant::now();
    let (policy, policy_error) = state
        .policy_engine
        .fetch_policy(ctx.user_id.as_deref())
        .await;
    ctx.latency.policy_fetch_ms = round2(ms_since(t0));
    {
        let mut entry = AuditEntry::new(stages::POLICY_FETCH)
            .duration(ctx.latency.policy_fetch_ms)
            .meta("mode", format!("{:?}", policy.mode).to_uppercase())
            .meta("allow_cloud", policy.allow_cloud);
        if let Some(error) = &policy_error {
            entry = entry.error(error);
        }
        ctx.record(entry);
    }
    let effective_mode = PolicyEngine::effective_mode(&policy, request.mode);

    // ─── [S1] Input guardrails ────────────────────────────────
    let t0 = Instant::now();
    let input_check = guardrail::check_input(&request.prompt);
    ctx.latency.input_guardrails_ms = round2(ms_since(t0));
    {
        let mut entry = AuditEntry::new(stages::INPUT_GUARDRAILS)
            .duration(ctx.latency.input_guardrails_ms)
            .meta("passed", input_check.passed);
        if let Some(fragment) = &input_check.injection_match {
            entry = entry.meta("injection_match", fragment.as_str());
        }
        if let Some(phrase) = &input_check.toxicity_match {
            entry = entry.meta("toxicity_match", phrase.as_str());
        }
        ctx.record(entry);
    }

    if !input_check.passed {
        // Blocked before any PII entry exists; no background tasks.
        ctx.route = Some(Route::Blocked);
        ctx.latency.total_ms = round2(ms_since(t_start));
        return PipelineResult {
            response_text: input_check.reason.clone(),
            guardrails: GuardrailInfo {
                input_blocked: true,
                input_reason: input_check.reason,
                ..GuardrailInfo::default()
            },
            estimated_cost: 0.0,
            privacy_level: "BLOCKED".to_string(),
            policy,
            proof: None,
            ctx,
        };
    }

    // ─── [S2] PII guard ───────────────────────────────────────
    let t0 = Instant::now();
    if policy.require_pii_masking {
        let (masked, info) = state.pii_guard.mask(&request.prompt, request_id);
        ctx.masked_prompt = masked;
        ctx.redaction = info;
    } else {
        ctx.masked_prompt = request.prompt.clone();
    }
    ctx.latency.pii_ms = round2(ms_since(t0));
    let _pii_clear = PiiClearGuard {
        guard: state.pii_guard.clone(),
        request_id,
    };
    {
        let mut entry = AuditEntry::new(stages::PII_GUARD)
            .duration(ctx.latency.pii_ms)
            .meta("redaction_count", ctx.redaction.count);
        if !policy.require_pii_masking {
            entry = entry.meta("masking", "disabled by policy");
        }
        ctx.record(entry);
    }

    // ─── [S3] Memory retrieval ────────────────────────────────
    let t0 = Instant::now();
    ctx.context_snippets = state
        .memory
        .retrieve(&ctx.masked_prompt, state.config.memory_top_k);
    ctx.latency.memory_ms = round2(ms_since(t0));
    ctx.record(
        AuditEntry::new(stages::MEMORY_RETRIEVAL)
            .duration(ctx.latency.memory_ms)
            .meta("snippets", ctx.context_snippets.len()),
    );

    // ─── [S4] Prompt build ────────────────────────────────────
    let t0 = Instant::now();
    let context = if ctx.context_snippets.is_empty() {
        None
    } else {
        Some(ctx.context_snippets.as_slice())
    };
    let (messages, tokens_before) = state.prompt_builder.build(&ctx.masked_prompt, context);
    ctx.messages = messages;
    ctx.token_stats.original = tokens_before;
    ctx.latency.prompt_build_ms = round2(ms_since(t0));
    {
        let mut entry = AuditEntry::new(stages::PROMPT_BUILD)
            .duration(ctx.latency.prompt_build_ms)
            .tokens(tokens_before)
            .meta("messages", ctx.messages.len());
        if let Err(reason) = PolicyEngine::enforce_token_limit(&policy, tokens_before) {
            entry = entry.meta("token_limit_exceeded", true).meta("limit_reason", reason);
        }
        ctx.record(entry);
    }

    // ─── [S5] Prompt compression ──────────────────────────────
    let t0 = Instant::now();
    let (tokens_after, tokens_saved) = if PolicyEngine::should_compress(&policy) {
        let (compressed, after, saved) = state.shrinker.compress(&ctx.messages, tokens_before);
        ctx.compressed_messages = compressed;
        (after, saved)
    } else {
        (tokens_before, 0)
    };
    ctx.token_stats.compressed = tokens_after;
    ctx.token_stats.saved = tokens_saved;
    ctx.token_stats.compression_ratio = if tokens_before > 0 {
        round3(tokens_saved as f64 / tokens_before as f64)
    } else {
        0.0
    };
    ctx.latency.compression_ms = round2(ms_since(t0));
    {
        let mut entry = AuditEntry::new(stages::PROMPT_COMPRESS)
            .duration(ctx.latency.compression_ms)
            .tokens(tokens_after)
            .meta("saved", tokens_saved);
        if !PolicyEngine::should_compress(&policy) {
            entry = entry.meta("compression", "disabled by policy");
        }
        ctx.record(entry);
    }

    // ─── [S6] Routing ─────────────────────────────────────────
    let t0 = Instant::now();
    let decision = state.policy_engine.decide_route(
        &policy,
        request.mode,
        tokens_after,
        request.cloud_provider,
    );
    ctx.route = Some(decision.route);
    ctx.provider = Some(decision.provider.clone());
    ctx.model = decision.model.clone();
    ctx.latency.routing_ms = round2(ms_since(t0));
    ctx.record(
        AuditEntry::new(stages::ROUTING)
            .duration(ctx.latency.routing_ms)
            .route(decision.route)
            .provider(&decision.provider)
            .tokens(tokens_after)
            .meta("model", decision.model.clone())
            .meta("threshold", state.config.token_threshold),
    );

    // ─── [S7] Inference (with policy-gated failover) ──────────
    let t0 = Instant::now();
    let (raw_response, usage_tokens) = run_inference(state, &mut ctx, &policy, effective_mode).await;
    ctx.inference_tokens = usage_tokens;
    ctx.latency.inference_ms = round2(ms_since(t0));
    {
        let mut entry = AuditEntry::new(stages::INFERENCE)
            .duration(ctx.latency.inference_ms)
            .tokens(usage_tokens);
        if let Some(provider) = &ctx.provider {
            entry = entry.provider(provider);
        }
        if raw_response.starts_with(ERROR_SENTINEL) {
            entry = entry.error(&raw_response);
        }
        ctx.record(entry);
    }

    // ─── [S8] Output guardrails ───────────────────────────────
    let t0 = Instant::now();
    let output_check = guardrail::check_output(&raw_response);
    let output_filtered = !output_check.passed;
    ctx.latency.output_guardrails_ms = round2(ms_since(t0));
    ctx.record(
        AuditEntry::new(stages::OUTPUT_GUARDRAILS)
            .duration(ctx.latency.output_guardrails_ms)
            .meta("filtered", output_filtered)
            .meta("leak_detected", output_check.leak_detected),
    );

    // ─── [S9] Post-process ────────────────────────────────────
    let t0 = Instant::now();
    let final_response = state.pii_guard.unmask(&output_check.text, request_id);
    state.pii_guard.clear(request_id);

    let route = ctx.route.unwrap_or(Route::Local);
    // Exhausted-failover error strings travel the normal response path but
    // are never billed.
    let estimated_cost = if raw_response.starts_with(ERROR_SENTINEL) {
        0.0
    } else {
        post::estimate_cost(
            &ctx.token_stats,
            usage_tokens,
            route,
            state.config.cost_per_1k_input,
            state.config.cost_per_1k_output,
        )
    };
    let privacy_level = post::determine_privacy_level(route, ctx.redaction.count).to_string();
    ctx.latency.post_process_ms = round2(ms_since(t0));
    ctx.latency.total_ms = round2(ms_since(t_start));
    ctx.record(
        AuditEntry::new(stages::POST_PROCESS)
            .duration(ctx.latency.post_process_ms)
            .meta("estimated_cost", estimated_cost)
            .meta("privacy_level", privacy_level.clone()),
    );

    // ── DataHaven proof (synchronous, only when reachable) ────
    let audit_record = InferenceRecord {
        request_id: request_id.to_string(),
        user_id: ctx.user_id.clone().unwrap_or_else(|| "anonymous".into()),
        route: route.to_string(),
        provider: ctx.provider.clone().unwrap_or_default(),
        model: ctx.model.clone(),
        token_count: usage_tokens,
        latency_ms: ctx.latency.total_ms,
        privacy_level: privacy_level.clone(),
        cost_estimate: estimated_cost,
        policy_mode: format!("{:?}", policy.mode).to_uppercase(),
        content_hash: content_hash(&final_response),
    };
    let proof = if state.datahaven.is_available().await {
        state.datahaven.log_inference(&audit_record).await
    } else {
        None
    };

    // ── [S10/S11] Background tasks after the response commits ─
    // Snapshot of masked prompt + chosen content: later mutations to the
    // context cannot leak into the store.
    let content_to_store = if output_filtered {
        truncate_chars(&final_response, 300)
    } else {
        truncate_chars(&raw_response, 300)
    };
    state.tasks.enqueue(Task::StoreMemory {
        text: format!("Q: {}\nA: {}", ctx.masked_prompt, content_to_store),
        doc_id: request_id.to_string(),
        metadata: serde_json::json!({
            "route": route.to_string(),
            "mode": format!("{:?}", request.mode).to_uppercase(),
        }),
    });
    if proof.is_none() {
        state.tasks.enqueue(Task::AuditLog {
            record: audit_record,
        });
    }

    PipelineResult {
        response_text: final_response,
        guardrails: GuardrailInfo {
            input_blocked: false,
            input_reason: String::new(),
            output_filtered,
            output_reason: if output_filtered {
                output_check.text.clone()
            } else {
                String::new()
            },
        },
        estimated_cost,
        privacy_level,
        policy,
        proof,
        ctx,
    }
}

/// Dispatch inference to the routed provider, walking the fallback order
/// on `[Error]` responses. Cloud hops are gated by the policy; falling
/// back to `local` is always admissible. Route/provider/model fields end
/// up reflecting whoever actually produced the bytes.
async fn run_inference(
    state: &AppState,
    ctx: &mut RequestContext,
    policy: &Policy,
    effective_mode: crate::models::schemas::UserMode,
) -> (String, usize) {
    let route = ctx.route.unwrap_or(Route::Local);
    let provider_name = ctx.provider.clone().unwrap_or_else(|| "local".into());

    // Whitelist check at the dispatch boundary. STRICT routing may force
    // `local` even when the whitelist omits it; a cloud provider is never
    // dispatched off-whitelist.
    if let Err(reason) = PolicyEngine::validate_provider(policy, &provider_name) {
        if provider_name != "local" {
            return (format!("[Error] {}", reason), 0);
        }
        tracing::warn!("local provider not in policy whitelist, dispatching anyway");
    }

    let Some(mut provider) = state.registry.get_for_route(route, &provider_name) else {
        return (
            format!("[Error] Provider '{}' is not registered.", provider_name),
            0,
        );
    };

    let cloud_fallback_allowed = PolicyEngine::can_fallback_to_cloud(policy, effective_mode);

    let mut hops = 0;
    loop {
        let (text, tokens) = provider
            .infer(ctx.outbound_messages(), &ctx.model)
            .await;

        if !text.starts_with(ERROR_SENTINEL) || hops >= FALLBACK_ORDER.len() {
            return (text, tokens);
        }

        let current = provider.name().to_string();
        let next = state
            .registry
            .next_fallback(&current, &policy.whitelisted_providers)
            .await;

        let Some(next) = next else {
            return (text, tokens);
        };
        if next.name() != "local" && !cloud_fallback_allowed {
            return (text, tokens);
        }

        ctx.record_fallback(&current, next.name(), &truncate_chars(&text, 200));

        ctx.model = next.model().to_string();
        ctx.provider = Some(next.name().to_string());
        ctx.route = Some(if next.name() == "local" {
            Route::Local
        } else {
            Route::Cloud
        });
        provider = next;
        hops += 1;
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 300), "short");
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.33333), 0.333);
        assert_eq!(round3(0.6666), 0.667);
    }
}
