use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

const MICROS_PER_USD: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetExceeded {
    pub requested_usd: f64,
    pub remaining_usd: f64,
}

impl fmt::Display for BudgetExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "llm budget exceeded: requested ${:.4}, remaining ${:.4}",
            self.requested_usd, self.remaining_usd
        )
    }
}

impl std::error::Error for BudgetExceeded {}

#[derive(Debug)]
pub struct CostBudget {
    limit_micros: u64,
    spent_micros: AtomicU64,
}

impl CostBudget {
    pub fn new(limit_usd: f64) -> Self {
        Self {
            limit_micros: to_micros(limit_usd),
            spent_micros: AtomicU64::new(0),
        }
    }

    pub fn estimate_cost(prompt_chars: usize, max_tokens: u32, price_per_1k_usd: f64) -> f64 {
        let tokens = prompt_chars as f64 / 4.0 + f64::from(max_tokens);
        tokens / 1000.0 * price_per_1k_usd
    }

    /// Reserves `cost_usd` or refuses without changing the spend.
    pub fn try_charge(&self, cost_usd: f64) -> Result<u64, BudgetExceeded> {
        let cost = to_micros(cost_usd);
        let mut spent = self.spent_micros.load(Ordering::Acquire);
        loop {
            let next = spent.saturating_add(cost);
            if next > self.limit_micros {
                return Err(BudgetExceeded {
                    requested_usd: cost_usd,
                    remaining_usd: from_micros(self.limit_micros.saturating_sub(spent)),
                });
            }
            match self.spent_micros.compare_exchange_weak(
                spent,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(cost),
                Err(actual) => spent = actual,
            }
        }
    }

    pub fn refund(&self, charged_micros: u64) {
        let _ = self
            .spent_micros
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |spent| {
                Some(spent.saturating_sub(charged_micros))
            });
    }

    pub fn limit_usd(&self) -> f64 {
        from_micros(self.limit_micros)
    }

    pub fn spent_usd(&self) -> f64 {
        from_micros(self.spent_micros.load(Ordering::Acquire))
    }

    pub fn remaining_usd(&self) -> f64 {
        from_micros(
            self.limit_micros
                .saturating_sub(self.spent_micros.load(Ordering::Acquire)),
        )
    }
}

fn to_micros(usd: f64) -> u64 {
    if usd.is_finite() && usd > 0.0 {
        (usd * MICROS_PER_USD).round() as u64
    } else {
        0
    }
}

fn from_micros(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_USD
}
