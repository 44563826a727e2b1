//! Shared test helpers

#![allow(dead_code)]

mod mock_platform;

pub use mock_platform::{
    CreatePrCall, GREEN, MergePrCall, MockPlatformService, PENDING, Reply, merged, rejected,
};

use merge_retry::types::{Platform, PlatformConfig, PrId, PullRequest};
use std::time::Duration;

/// GitHub config for `acme/widgets`
pub fn github_config() -> PlatformConfig {
    PlatformConfig {
        platform: Platform::GitHub,
        owner: "acme".to_string(),
        repo: "widgets".to_string(),
        host: None,
    }
}

/// Open PR fixture
pub fn make_pr(number: u64, head: &str, title: &str) -> PullRequest {
    PullRequest {
        id: PrId::new(number),
        html_url: format!("https://github.com/acme/widgets/pull/{number}"),
        base_ref: "main".to_string(),
        head_ref: head.to_string(),
        title: title.to_string(),
        is_draft: false,
    }
}

/// Whether `actual` lies in `[base, base * 1.1]`, with 1ms slack for float
/// rounding
pub fn within_jitter(actual: Duration, base: Duration) -> bool {
    actual >= base && actual <= base.mul_f64(1.1) + Duration::from_millis(1)
}
