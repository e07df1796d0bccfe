use crate::error::OptimizerError;
use configuration::{AnalyseMode, CorridorConfig, ParameterGrid};
use itertools::iproduct;
use rust_decimal::Decimal;
use std::iter;

/// `min, min + step, ...` strictly below `max`.
pub fn decimal_steps(min: Decimal, max: Decimal, step: Decimal) -> Vec<Decimal> {
    let mut values = Vec::new();
    let mut value = min;
    while value < max {
        values.push(value);
        value += step;
    }
    values
}

/// Every configuration of the grid, in grid order: for each
/// `(stop_loss, days, min_profit)` one best-width config followed by one
/// math-stat config per percentile `p` with corridor `[p, 100 - p]`.
pub fn generate_configs(grid: &ParameterGrid) -> Result<Vec<CorridorConfig>, OptimizerError> {
    grid.validate()?;
    if grid.commission_pct < Decimal::ZERO {
        return Err(OptimizerError::ParameterGeneration(format!(
            "commission_pct must not be negative, got {}",
            grid.commission_pct
        )));
    }

    let stop_losses = decimal_steps(grid.stop_loss_min, grid.stop_loss_max, ParameterGrid::DECIMAL_STEP);
    let min_profits = decimal_steps(grid.min_profit_min, grid.min_profit_max, ParameterGrid::DECIMAL_STEP);
    let percentiles: Vec<u32> = if grid.include_math_stat {
        (grid.percentile_min..grid.percentile_max).collect()
    } else {
        Vec::new()
    };

    let configs = iproduct!(stop_losses, grid.days_min..grid.days_max, min_profits)
        .flat_map(|(stop_loss_pct, days, min_profit_pct)| {
            let best_width = CorridorConfig {
                analyse: AnalyseMode::BestWidth,
                low_percentile: Decimal::ZERO,
                high_percentile: Decimal::ONE_HUNDRED,
                min_profit_pct,
                stop_loss_pct,
                days_to_calculate_interval: days,
                commission_pct: grid.commission_pct,
            };
            let math_stat = percentiles.iter().map({
                let base = best_width.clone();
                move |p| CorridorConfig {
                    analyse: AnalyseMode::MathStat,
                    low_percentile: Decimal::from(*p),
                    high_percentile: Decimal::from(100 - *p),
                    ..base.clone()
                }
            });
            iter::once(best_width).chain(math_stat).collect::<Vec<_>>()
        })
        .collect();

    Ok(configs)
}
