//! Output token ceilings derived from character targets.
//!
//! The ceiling biases the model toward the requested length; it does not
//! guarantee it. Recovery handles the cases where the model stops early.

use crate::config::GenerationConfig;
use crate::constants::generation::CHARS_PER_TOKEN;

/// Token ceiling policy
#[derive(Debug, Clone, Copy)]
pub struct TokenCeiling {
    headroom: f64,
    floor: u32,
    ceiling: u32,
}

impl Default for TokenCeiling {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

impl From<&GenerationConfig> for TokenCeiling {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            headroom: config.token_headroom,
            floor: config.min_output_tokens,
            ceiling: config.max_output_tokens,
        }
    }
}

impl TokenCeiling {
    /// `ceil(chars / 4 * headroom)`, clamped to the model bounds
    pub fn for_chars(&self, target_chars: usize) -> u32 {
        let estimate = (target_chars as f64 / CHARS_PER_TOKEN * self.headroom).ceil();
        (estimate as u32).clamp(self.floor, self.ceiling)
    }

    /// Largest ceiling the model accepts; used for structured calls on big inputs
    pub fn max(&self) -> u32 {
        self.ceiling
    }

    /// Characters a single call can be expected to produce at the ceiling
    pub fn max_chars_per_call(&self) -> usize {
        (self.ceiling as f64 * CHARS_PER_TOKEN / self.headroom) as usize
    }
}
