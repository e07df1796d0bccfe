use crate::error::OptimizerError;
use backtester::BacktestReport;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// A backtest report together with its position in the grid and in the
/// ranking.
#[derive(Debug, Clone, Serialize)]
pub struct RankedReport {
    /// 1-based; rank 1 has the lowest average day percent.
    pub rank: usize,
    /// Position of the configuration in the generated grid.
    pub index: usize,
    pub report: BacktestReport,
}

/// Sorts ascending by `average_day_percent`, ties in grid order.
pub fn rank(mut results: Vec<(usize, BacktestReport)>) -> Vec<RankedReport> {
    results.sort_by(|(a_index, a), (b_index, b)| {
        a.average_day_percent
            .cmp(&b.average_day_percent)
            .then_with(|| a_index.cmp(b_index))
    });
    results
        .into_iter()
        .enumerate()
        .map(|(position, (index, report))| RankedReport {
            rank: position + 1,
            index,
            report,
        })
        .collect()
}

/// Writes the ranking as pretty-printed JSON.
pub fn write_json(path: impl AsRef<Path>, ranked: &[RankedReport]) -> Result<(), OptimizerError> {
    let writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer_pretty(writer, ranked)?;
    tracing::info!(path = %path.as_ref().display(), rows = ranked.len(), "Ranked report written.");
    Ok(())
}
