//! Derived response fields: cost estimate and privacy classification.

use crate::models::schemas::{Route, TokenStats};

/// Cloud cost estimate in USD, 6 decimal places. Local and blocked
/// requests cost nothing.
pub fn estimate_cost(
    stats: &TokenStats,
    usage_tokens: usize,
    route: Route,
    cost_per_1k_input: f64,
    cost_per_1k_output: f64,
) -> f64 {
    if route != Route::Cloud {
        return 0.0;
    }
    let input_cost = (stats.compressed as f64 / 1000.0) * cost_per_1k_input;
    let output_cost = (usage_tokens as f64 / 1000.0) * cost_per_1k_output;
    round6(input_cost + output_cost)
}

/// Privacy classification of the route the request actually took.
pub fn determine_privacy_level(route: Route, redaction_count: usize) -> &'static str {
    match route {
        Route::Local => "HIGH",
        Route::Blocked => "BLOCKED",
        Route::Cloud => {
            if redaction_count > 0 {
                "BALANCED"
            } else {
                "CLOUD_HEAVY"
            }
        }
    }
}

fn round6(x: f64) -> f64 {
    (x * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(compressed: usize) -> TokenStats {
        TokenStats {
            original: compressed + 10,
            compressed,
            saved: 10,
            compression_ratio: 0.1,
        }
    }

    #[test]
    fn test_local_route_is_free() {
        assert_eq!(estimate_cost(&stats(1000), 1000, Route::Local, 0.0005, 0.0015), 0.0);
    }

    #[test]
    fn test_blocked_route_is_free() {
        assert_eq!(estimate_cost(&stats(1000), 0, Route::Blocked, 0.0005, 0.0015), 0.0);
    }

    #[test]
    fn test_cloud_cost_formula() {
        // 2000 input tokens * 0.0005/1k + 1000 output * 0.0015/1k
        let cost = estimate_cost(&stats(2000), 1000, Route::Cloud, 0.0005, 0.0015);
        assert_eq!(cost, 0.0025);
    }

    #[test]
    fn test_cloud_cost_rounds_to_six_decimals() {
        let cost = estimate_cost(&stats(1), 1, Route::Cloud, 0.0005, 0.0015);
        assert_eq!(cost, 0.000002);
    }

    #[test]
    fn test_privacy_levels() {
        assert_eq!(determine_privacy_level(Route::Local, 0), "HIGH");
        assert_eq!(determine_privacy_level(Route::Local, 5), "HIGH");
        assert_eq!(determine_privacy_level(Route::Cloud, 2), "BALANCED");
        assert_eq!(determine_privacy_level(Route::Cloud, 0), "CLOUD_HEAVY");
        assert_eq!(determine_privacy_level(Route::Blocked, 0), "BLOCKED");
    }
}
