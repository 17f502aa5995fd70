//! Electricity cost schedules.
//!
//! Tiered schedules are expressed the way utilities publish them: each tier
//! runs until the bill reaches a budget threshold, and the matching kWh
//! breakpoint is derived as `budget_limit / rate`.

use serde::{Deserialize, Serialize};

use crate::error::{ReportError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TariffTier {
    /// Budget (in currency units) at which this tier ends; `None` for the last tier.
    #[serde(default)]
    pub budget_limit: Option<f64>,
    /// Marginal price per kWh inside this tier.
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TariffSchedule {
    Flat { rate: f64 },
    Tiered { tiers: Vec<TariffTier> },
}

impl Default for TariffSchedule {
    fn default() -> Self {
        Self::uae_residential()
    }
}

impl TariffSchedule {
    /// Residential slab tariff: 0.23 up to 2000 AED, 0.28 up to 4000 AED,
    /// 0.32 up to 6000 AED, 0.36 beyond.
    pub fn uae_residential() -> Self {
        TariffSchedule::Tiered {
            tiers: vec![
                TariffTier {
                    budget_limit: Some(2000.0),
                    rate: 0.23,
                },
                TariffTier {
                    budget_limit: Some(4000.0),
                    rate: 0.28,
                },
                TariffTier {
                    budget_limit: Some(6000.0),
                    rate: 0.32,
                },
                TariffTier {
                    budget_limit: None,
                    rate: 0.36,
                },
            ],
        }
    }

    pub fn flat(rate: f64) -> Self {
        TariffSchedule::Flat { rate }
    }

    /// kWh breakpoints of the limited tiers, in tier order.
    pub fn breakpoints(&self) -> Vec<f64> {
        match self {
            TariffSchedule::Flat { .. } => Vec::new(),
            TariffSchedule::Tiered { tiers } => tiers
                .iter()
                .filter_map(|t| t.budget_limit.map(|b| b / t.rate))
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            TariffSchedule::Flat { rate } => {
                if !rate.is_finite() || *rate < 0.0 {
                    return Err(ReportError::invalid(format!("flat rate {rate} must be >= 0")));
                }
            }
            TariffSchedule::Tiered { tiers } => {
                if tiers.is_empty() {
                    return Err(ReportError::invalid("tiered tariff needs at least one tier"));
                }
                if tiers.iter().any(|t| !t.rate.is_finite() || t.rate <= 0.0) {
                    return Err(ReportError::invalid("tier rates must be positive"));
                }
                let last = tiers.len() - 1;
                if tiers[..last].iter().any(|t| t.budget_limit.is_none())
                    || tiers[last].budget_limit.is_some()
                {
                    return Err(ReportError::invalid(
                        "only the last tier may (and must) be unlimited",
                    ));
                }
                let bps = self.breakpoints();
                if bps.windows(2).any(|w| w[1] <= w[0]) || bps.first().is_some_and(|b| *b <= 0.0)
                {
                    return Err(ReportError::invalid(format!(
                        "tier breakpoints must be strictly increasing, got {bps:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Cost of consuming `kwh` in one billing period.
    pub fn cost(&self, kwh: f64) -> f64 {
        let kwh = if kwh.is_finite() { kwh.max(0.0) } else { 0.0 };
        match self {
            TariffSchedule::Flat { rate } => kwh * rate,
            TariffSchedule::Tiered { tiers } => {
                let mut cost = 0.0;
                let mut lower = 0.0;
                for tier in tiers {
                    match tier.budget_limit {
                        Some(budget) => {
                            let upper = budget / tier.rate;
                            if kwh <= upper {
                                return cost + (kwh - lower) * tier.rate;
                            }
                            cost += (upper - lower) * tier.rate;
                            lower = upper;
                        }
                        None => return cost + (kwh - lower) * tier.rate,
                    }
                }
                // misconfigured schedule without an open tier: keep the last rate
                let last_rate = tiers.last().map_or(0.0, |t| t.rate);
                cost + (kwh - lower) * last_rate
            }
        }
    }
}
