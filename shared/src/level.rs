/// Total score needed to reach level `index + 1`.
pub const LEVEL_THRESHOLDS: [u64; 10] = [50, 150, 300, 500, 800, 1200, 1700, 2300, 3000, 4000];

/// Past the table, every additional block of points grants one more level.
pub const POINTS_PER_EXTRA_LEVEL: u64 = 1000;

/// Level reached with the given total score. Monotonic non-decreasing.
pub fn level_for(total_score: u64) -> u32 {
    let reached = LEVEL_THRESHOLDS
        .iter()
        .take_while(|threshold| total_score >= **threshold)
        .count();

    if reached < LEVEL_THRESHOLDS.len() {
        return reached as u32;
    }

    let last = LEVEL_THRESHOLDS[LEVEL_THRESHOLDS.len() - 1];
    let extra = (total_score - last) / POINTS_PER_EXTRA_LEVEL;
    (reached as u32).saturating_add(u32::try_from(extra).unwrap_or(u32::MAX))
}
