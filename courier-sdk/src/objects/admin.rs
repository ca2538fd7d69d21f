//! Admin API request types.

use serde::{Deserialize, Serialize};

use super::dispatch::DispatchStatus;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 200;
const MAX_OFFSET: i64 = 100_000;

/// Query parameters for listing dispatch units.
#[derive(Debug, Clone, Deserialize)]
pub struct ListUnitsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub status: Option<DispatchStatus>,
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

/// Clamp user-supplied pagination to sane bounds.
pub fn clamp_pagination(limit: i64, offset: i64) -> (i64, i64) {
    (limit.clamp(1, MAX_LIMIT), offset.clamp(0, MAX_OFFSET))
}

/// Body of `POST /admin/units/{id}/skip`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSkipRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_pagination() {
        assert_eq!(clamp_pagination(0, -5), (1, 0));
        assert_eq!(clamp_pagination(20, 40), (20, 40));
        assert_eq!(clamp_pagination(10_000, 10_000_000), (MAX_LIMIT, MAX_OFFSET));
    }
}
