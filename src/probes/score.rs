//! Performance scoring and status derivation.
//!
//! The final score is `base(load) - slow_penalty(load) - 10*errors - 5*warnings`,
//! clamped to 0..=100. Status is a pure function of the score, the error count
//! and whether navigation succeeded.

use serde::{Deserialize, Serialize};

use crate::model::TestStatus;

/// Points removed per recorded error.
pub const ERROR_PENALTY: u32 = 10;
/// Points removed per recorded warning.
pub const WARNING_PENALTY: u32 = 5;

/// How load time maps to a base score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorePolicy {
    /// 100 / 90 / 70 / 50, then one point per second down from 30.
    Banded,
    /// `100 - load_ms / 100`.
    Linear,
}

impl ScorePolicy {
    /// Base score for a load time; never increases as load time grows.
    pub fn base_score(&self, load_time_ms: u64) -> u32 {
        match self {
            ScorePolicy::Banded => match load_time_ms {
                0..=999 => 100,
                1_000..=2_999 => 90,
                3_000..=4_999 => 70,
                5_000..=7_999 => 50,
                t => 30u64.saturating_sub((t - 8_000) / 1_000) as u32,
            },
            ScorePolicy::Linear => 100u64.saturating_sub(load_time_ms / 100) as u32,
        }
    }
}

/// Two-tier deduction for slow pages, on top of the base score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlowLoadPenalty {
    pub moderate_ms: u64,
    pub moderate_penalty: u32,
    pub severe_ms: u64,
    pub severe_penalty: u32,
}

impl Default for SlowLoadPenalty {
    fn default() -> Self {
        Self {
            moderate_ms: 3_000,
            moderate_penalty: 5,
            severe_ms: 5_000,
            severe_penalty: 15,
        }
    }
}

impl SlowLoadPenalty {
    pub fn penalty(&self, load_time_ms: u64) -> u32 {
        if load_time_ms >= self.severe_ms {
            self.severe_penalty
        } else if load_time_ms >= self.moderate_ms {
            self.moderate_penalty
        } else {
            0
        }
    }
}

/// Combine the base score with all deductions and clamp to 0..=100.
pub fn final_score(
    policy: ScorePolicy,
    slow: &SlowLoadPenalty,
    load_time_ms: u64,
    error_count: usize,
    warning_count: usize,
) -> u8 {
    let deductions = slow
        .penalty(load_time_ms)
        .saturating_add(ERROR_PENALTY.saturating_mul(error_count as u32))
        .saturating_add(WARNING_PENALTY.saturating_mul(warning_count as u32));

    policy
        .base_score(load_time_ms)
        .saturating_sub(deductions)
        .min(100) as u8
}

/// Status rule applied to every result, local or ingested.
pub fn derive_status(score: u8, error_count: usize, navigation_succeeded: bool) -> TestStatus {
    if !navigation_succeeded {
        TestStatus::Error
    } else if score < 50 || error_count > 5 {
        TestStatus::Critical
    } else if score < 70 || error_count > 2 {
        TestStatus::Warning
    } else {
        TestStatus::Success
    }
}
