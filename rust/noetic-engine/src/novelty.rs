//! Pure functions over a trajectory: novelty scoring and stagnation
//! detection.

use crate::trajectory::TrajectoryPoint;

/// Fixed diameter used to normalize novelty into `[0, 1]`.
pub const SPACE_DIAMETER: f64 = 10.0;
/// Maximum bonus `apply_novelty_bonus` can add to confidence.
pub const MAX_NOVELTY_BONUS: f64 = 0.05;
/// Number of consecutive sub-threshold movements that counts as stagnant.
pub const STAGNATION_RUN_LENGTH: usize = 5;

fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Minimum distance from `claim_vec` to any vector in `trajectory`,
/// normalized by [`SPACE_DIAMETER`] and clamped to `1.0`. An empty
/// trajectory is maximally novel.
pub fn novelty(claim_vec: &[f64], trajectory: &[TrajectoryPoint]) -> f64 {
    if trajectory.is_empty() {
        return 1.0;
    }
    let min_distance = trajectory
        .iter()
        .map(|point| euclidean_distance(claim_vec, &point.embedding))
        .fold(f64::INFINITY, f64::min);
    (min_distance / SPACE_DIAMETER).clamp(0.0, 1.0)
}

/// Adds up to [`MAX_NOVELTY_BONUS`] to `base_confidence`, scaled by
/// `novelty` (itself clamped to `[0, 1]`).
pub fn apply_novelty_bonus(novelty: f64, base_confidence: f64) -> f64 {
    base_confidence + novelty.clamp(0.0, 1.0) * MAX_NOVELTY_BONUS
}

/// Result of scanning a trajectory slice for a trailing run of
/// small movements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagnationReport {
    pub is_stagnant: bool,
    pub consecutive: usize,
    pub mean_movement: f64,
}

/// Walks the pairwise movements between consecutive points in
/// `trajectory_slice` and measures the trailing run of movements below
/// `threshold`; any movement at or above `threshold` resets the run.
pub fn stagnation(trajectory_slice: &[TrajectoryPoint], threshold: f64) -> StagnationReport {
    if trajectory_slice.len() < 2 {
        return StagnationReport {
            is_stagnant: false,
            consecutive: 0,
            mean_movement: 0.0,
        };
    }

    let movements: Vec<f64> = trajectory_slice
        .windows(2)
        .map(|pair| euclidean_distance(&pair[0].embedding, &pair[1].embedding))
        .collect();

    let mut consecutive = 0usize;
    for &movement in movements.iter().rev() {
        if movement < threshold {
            consecutive += 1;
        } else {
            break;
        }
    }

    let mean_movement = if consecutive == 0 {
        0.0
    } else {
        let tail = &movements[movements.len() - consecutive..];
        tail.iter().sum::<f64>() / tail.len() as f64
    };

    StagnationReport {
        is_stagnant: consecutive >= STAGNATION_RUN_LENGTH,
        consecutive,
        mean_movement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(cycle: u64, embedding: Vec<f64>) -> TrajectoryPoint {
        TrajectoryPoint {
            cycle_number: cycle,
            embedding,
            claim_text: format!("claim {cycle}"),
            support_strength: 0.5,
        }
    }

    #[test]
    fn novelty_of_empty_trajectory_is_maximal() {
        assert_eq!(novelty(&[1.0, 2.0], &[]), 1.0);
    }

    #[test]
    fn novelty_bonus_is_additive_and_zero_novelty_is_identity() {
        assert_eq!(apply_novelty_bonus(0.0, 0.5), 0.5);
        assert!((apply_novelty_bonus(1.0, 0.5) - 0.55).abs() < 1e-9);
    }

    #[test]
    fn fewer_than_two_points_is_never_stagnant() {
        let report = stagnation(&[point(1, vec![0.0])], 0.01);
        assert!(!report.is_stagnant);
        assert_eq!(report.consecutive, 0);
    }

    #[test]
    fn trailing_run_of_small_movements_is_stagnant() {
        let vectors = [0.0, 0.006, 0.010, 0.013, 0.016, 0.019, 0.022, 0.025];
        let trajectory: Vec<TrajectoryPoint> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| point(i as u64 + 1, vec![*v]))
            .collect();
        let report = stagnation(&trajectory, 0.01);
        assert!(report.is_stagnant);
        assert_eq!(report.consecutive, 7);
    }

    #[test]
    fn a_large_jump_resets_the_trailing_run() {
        let mut values = vec![0.0, 0.006, 0.012, 0.018];
        values.push(values.last().unwrap() + 0.3);
        values.push(values.last().unwrap() + 0.004);
        values.push(values.last().unwrap() + 0.008);
        let trajectory: Vec<TrajectoryPoint> = values
            .iter()
            .enumerate()
            .map(|(i, v)| point(i as u64 + 1, vec![*v]))
            .collect();
        let report = stagnation(&trajectory, 0.01);
        assert_eq!(report.consecutive, 2);
        assert!(!report.is_stagnant);
    }

    #[test]
    fn stagnation_is_idempotent_under_duplicated_input() {
        let vectors = [0.0, 0.006, 0.010, 0.013, 0.016, 0.019];
        let trajectory: Vec<TrajectoryPoint> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| point(i as u64 + 1, vec![*v]))
            .collect();
        let first = stagnation(&trajectory, 0.01);
        let second = stagnation(&trajectory, 0.01);
        assert_eq!(first, second);
    }
}
