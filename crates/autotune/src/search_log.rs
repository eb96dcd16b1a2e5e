//! Search-log parsing, candidate ranking and final selection.
//!
//! A search log is a flat text file written by the measurement harness.
//! Each non-blank line is an opaque tiling descriptor whose trailing token,
//! after the last `#`, is the measured cost. The final line is always the
//! baseline (origin) configuration.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Cost the harness prints for a failed measurement (`DBL_MAX` at `%g`).
pub const FAILED_COST_SENTINEL: f64 = 1.79769e308;

/// Number of candidates refined when no override is configured.
pub const DEFAULT_TOP_N: usize = 5;

/// One candidate decision as produced by the harness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TilingConfigLine(String);

impl TilingConfigLine {
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Measured cost, `+inf` when the sample failed or is unreadable.
    pub fn cost(&self) -> f64 {
        line_cost(&self.0)
    }

    pub fn is_failed(&self) -> bool {
        self.cost().is_infinite()
    }
}

impl fmt::Display for TilingConfigLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TilingConfigLine {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TilingConfigLine {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Extract the cost token after the final `#`. Anything that is not a finite
/// cost below the failure sentinel reads as `+inf`.
pub fn line_cost(line: &str) -> f64 {
    let Some((_, token)) = line.rsplit_once('#') else {
        return f64::INFINITY;
    };
    match token.trim().parse::<f64>() {
        Ok(cost) if !cost.is_finite() || cost >= FAILED_COST_SENTINEL => f64::INFINITY,
        Ok(cost) => cost,
        Err(_) => f64::INFINITY,
    }
}

/// Outcome of ranking a broad-pass search log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    /// Fastest pool entries, ascending by cost.
    pub top: Vec<TilingConfigLine>,
    /// Origin configuration, never part of `top`.
    pub baseline: TilingConfigLine,
    pub effective_n: usize,
}

impl Ranking {
    /// Refine order: ranked candidates first, baseline last.
    pub fn refine_order(&self) -> impl Iterator<Item = &TilingConfigLine> {
        self.top.iter().chain(std::iter::once(&self.baseline))
    }

    pub fn candidate_count(&self) -> usize {
        self.effective_n + 1
    }
}

/// Read every non-blank line, trailing whitespace stripped.
pub fn read_log_lines(path: &Path) -> std::io::Result<Vec<TilingConfigLine>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(TilingConfigLine::from)
        .collect())
}

/// Rank the search log at `path`, keeping the `top_n` fastest pool entries.
///
/// Returns `None` when the log is missing, unreadable or empty.
pub fn rank(path: &Path, top_n: i64) -> Option<Ranking> {
    match read_log_lines(path) {
        Ok(lines) => rank_lines(lines, top_n),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "search log unavailable");
            None
        }
    }
}

/// Rank in-memory log lines. `top_n <= 0` or larger than the pool keeps the
/// whole pool.
pub fn rank_lines(mut lines: Vec<TilingConfigLine>, top_n: i64) -> Option<Ranking> {
    let baseline = lines.pop()?;
    let mut pool: Vec<(f64, TilingConfigLine)> =
        lines.into_iter().map(|line| (line.cost(), line)).collect();

    // sort_by is stable, so equal costs keep their log order.
    pool.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let effective_n = match usize::try_from(top_n) {
        Ok(n) if n > 0 && n <= pool.len() => n,
        _ => pool.len(),
    };
    let top: Vec<_> = pool
        .into_iter()
        .take(effective_n)
        .map(|(_, line)| line)
        .collect();

    debug!(
        baseline = baseline.as_str(),
        effective_n,
        best = top.first().map(|l| l.as_str()),
        "ranked search log"
    );

    Some(Ranking {
        top,
        baseline,
        effective_n,
    })
}

/// Pick the cheapest refined entry. The last line is the baseline and wins
/// whenever no entry carries a usable cost. Ties keep the first entry seen.
pub fn select_final(lines: &[TilingConfigLine]) -> Option<TilingConfigLine> {
    let baseline = lines.last()?;

    let mut best: Option<(f64, &TilingConfigLine)> = None;
    for line in lines {
        let cost = line.cost();
        if cost.is_infinite() {
            continue;
        }
        match best {
            Some((best_cost, _)) if cost >= best_cost => continue,
            _ => best = Some((cost, line)),
        }
    }

    Some(best.map(|(_, line)| line).unwrap_or(baseline).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lines(raw: &[&str]) -> Vec<TilingConfigLine> {
        raw.iter().copied().map(TilingConfigLine::from).collect()
    }

    fn write_log(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_cost_parsing() {
        assert_eq!(line_cost("tile=4,8#12.5"), 12.5);
        assert_eq!(line_cost("a#b#3"), 3.0);
        assert_eq!(line_cost("cfg# 7.25 "), 7.25);
        assert!(line_cost("no-cost-token").is_infinite());
        assert!(line_cost("cfg#abc").is_infinite());
        assert!(line_cost("cfg#1.79769e+308").is_infinite());
        assert!(line_cost("cfg#nan").is_infinite());
        assert_eq!(line_cost("cfg#-inf"), f64::INFINITY);
        assert_eq!(line_cost("cfg#inf"), f64::INFINITY);
    }

    #[test]
    fn test_rank_top_two() {
        let log = write_log("cfgA#12.5\ncfgB#9.0\ncfgC#20.0\norigin#15.0\n");
        let ranking = rank(log.path(), 2).unwrap();
        assert_eq!(ranking.top, lines(&["cfgB#9.0", "cfgA#12.5"]));
        assert_eq!(ranking.baseline.as_str(), "origin#15.0");
        assert_eq!(ranking.effective_n, 2);
    }

    #[test]
    fn test_rank_zero_keeps_whole_pool() {
        let log = write_log("cfgA#12.5\ncfgB#9.0\ncfgC#20.0\norigin#15.0\n");
        let ranking = rank(log.path(), 0).unwrap();
        assert_eq!(ranking.top, lines(&["cfgB#9.0", "cfgA#12.5", "cfgC#20.0"]));
        assert_eq!(ranking.effective_n, 3);
    }

    #[test]
    fn test_rank_oversized_and_negative_n() {
        let pool = lines(&["x#3", "y#1", "z#2", "origin#0.5"]);
        for n in [-1, 4, 100] {
            let ranking = rank_lines(pool.clone(), n).unwrap();
            assert_eq!(ranking.effective_n, 3);
            assert!(!ranking.top.contains(&ranking.baseline));
        }
    }

    #[test]
    fn test_rank_skips_blank_lines_and_trailing_whitespace() {
        let log = write_log("\ncfgA#2.0   \n\n  \ncfgB#1.0\t\norigin#5.0  \n\n");
        let ranking = rank(log.path(), 5).unwrap();
        assert_eq!(ranking.top, lines(&["cfgB#1.0", "cfgA#2.0"]));
        assert_eq!(ranking.baseline.as_str(), "origin#5.0");
    }

    #[test]
    fn test_rank_is_stable_and_failed_samples_sink() {
        let pool = lines(&["a#2", "b#1.79769e+308", "c#2", "d#1", "origin#9"]);
        let ranking = rank_lines(pool, 0).unwrap();
        assert_eq!(ranking.top, lines(&["d#1", "a#2", "c#2", "b#1.79769e+308"]));
    }

    #[test]
    fn test_negative_infinity_ranks_and_selects_as_failed() {
        let pool = lines(&["a#-inf", "b#3.0", "origin#4.0"]);
        let ranking = rank_lines(pool.clone(), 0).unwrap();
        assert_eq!(ranking.top, lines(&["b#3.0", "a#-inf"]));
        assert_eq!(select_final(&pool).unwrap().as_str(), "b#3.0");
    }

    #[test]
    fn test_rank_missing_or_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        assert!(rank(&dir.path().join("absent.log"), 5).is_none());

        let empty = write_log("\n   \n");
        assert!(rank(empty.path(), 5).is_none());
    }

    #[test]
    fn test_rank_baseline_only() {
        let ranking = rank_lines(lines(&["origin#4.0"]), 5).unwrap();
        assert!(ranking.top.is_empty());
        assert_eq!(ranking.candidate_count(), 1);
        assert_eq!(
            ranking.refine_order().collect::<Vec<_>>(),
            vec![&ranking.baseline]
        );
    }

    #[test]
    fn test_select_final_picks_minimum() {
        let refined = lines(&["cfgB#8.0", "cfgA#7.5", "origin#9.0"]);
        assert_eq!(select_final(&refined).unwrap().as_str(), "cfgA#7.5");
    }

    #[test]
    fn test_select_final_first_minimum_wins() {
        let refined = lines(&["cfgB#7.5", "cfgA#7.5", "origin#7.5"]);
        assert_eq!(select_final(&refined).unwrap().as_str(), "cfgB#7.5");
    }

    #[test]
    fn test_select_final_all_failed_falls_back_to_baseline() {
        let refined = lines(&[
            "cfgB#1.79769e+308",
            "cfgA#1.79769e+308",
            "origin#1.79769e+308",
        ]);
        assert_eq!(
            select_final(&refined).unwrap().as_str(),
            "origin#1.79769e+308"
        );
        assert!(select_final(&[]).is_none());
    }
}
