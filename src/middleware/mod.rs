pub mod guardrail;
pub mod pii;
pub mod policy;
pub mod rate_limit;
