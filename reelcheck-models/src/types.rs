//! Shared model types.

use serde::{Deserialize, Serialize};

/// Pricing for a model, in USD per million tokens.
///
/// # Examples
///
/// ```
/// use reelcheck_models::Pricing;
///
/// let pricing = Pricing::new(3.0, 15.0);
/// assert!((pricing.calculate(1_000_000, 0) - 3.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Cost per million input tokens in USD.
    pub input_per_million: f64,
    /// Cost per million output tokens in USD.
    pub output_per_million: f64,
}

impl Pricing {
    /// Pricing for models that run on local hardware.
    pub const FREE: Pricing = Pricing::new(0.0, 0.0);

    /// Create new pricing information.
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Calculate cost for a given number of input and output tokens.
    pub fn calculate(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_per_million;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_per_million;
        input_cost + output_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculate_combines_input_and_output() {
        let pricing = Pricing::new(3.0, 15.0);
        let cost = pricing.calculate(1_000, 500);
        assert!((cost - 0.0105).abs() < 1e-12);
    }

    #[test]
    fn free_pricing_is_zero() {
        assert_eq!(Pricing::FREE.calculate(10_000_000, 10_000_000), 0.0);
    }
}
