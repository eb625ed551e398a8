use serde::{Deserialize, Serialize};

use crate::params::QueryParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_page: u64,
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page: 1,
            default_limit: 20,
            max_limit: 100,
        }
    }
}

/// A page request after clamping: `page >= 1`, `1 <= limit <= max_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
}

impl Pagination {
    /// Reads `page` and `limit`. Out-of-range or unparseable input is clamped
    /// or defaulted, never rejected.
    pub fn from_params(params: &QueryParams, config: &PaginationConfig) -> Self {
        let max_limit = config.max_limit.max(1);
        let page = parse_int(params.scalar("page")).unwrap_or(config.default_page as i64);
        let limit = parse_int(params.scalar("limit")).unwrap_or(config.default_limit as i64);
        Self {
            page: page.max(1) as u64,
            limit: (limit.max(1) as u64).min(max_limit),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(self.limit)
    }
}

/// Leading-integer parse: `"2"`, `" 3 "`, `"10abc"` and `"2.9"` all yield
/// their integer prefix.
fn parse_int(raw: Option<&str>) -> Option<i64> {
    let s = raw?.trim();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().ok()
}
