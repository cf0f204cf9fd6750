//! Geometry flow policies

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the active geometry advances when a change fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryFlow {
    /// Next index, wrapping
    Forward,
    /// Uniformly random index other than the current one
    Shuffle,
    /// Walk in the stored direction, reflecting at either end
    Pendulum,
    /// Jump ahead by one or two, wrapping
    Burst,
}

/// Travel direction remembered between pendulum steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendulumDirection {
    #[default]
    Up,
    Down,
}

impl PendulumDirection {
    fn flipped(self) -> Self {
        match self {
            PendulumDirection::Up => PendulumDirection::Down,
            PendulumDirection::Down => PendulumDirection::Up,
        }
    }
}

/// Next geometry index under `flow`.
///
/// `direction` is only read and updated by [`GeometryFlow::Pendulum`].
/// With fewer than two geometries there is nowhere to go and index 0 is
/// returned.
pub fn next_geometry<R: Rng + ?Sized>(
    flow: GeometryFlow,
    current: usize,
    count: usize,
    direction: &mut PendulumDirection,
    rng: &mut R,
) -> usize {
    if count < 2 {
        return 0;
    }
    let current = current.min(count - 1);

    match flow {
        GeometryFlow::Forward => (current + 1) % count,
        GeometryFlow::Shuffle => {
            // Draw from the other count-1 slots so the current index is
            // never picked
            let pick = rng.random_range(0..count - 1);
            if pick >= current {
                pick + 1
            } else {
                pick
            }
        }
        GeometryFlow::Pendulum => match *direction {
            PendulumDirection::Up if current + 1 < count => current + 1,
            PendulumDirection::Down if current > 0 => current - 1,
            PendulumDirection::Up => {
                *direction = direction.flipped();
                current - 1
            }
            PendulumDirection::Down => {
                *direction = direction.flipped();
                current + 1
            }
        },
        GeometryFlow::Burst => {
            let jump = rng.random_range(1..3);
            (current + jump) % count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn forward_wraps() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut dir = PendulumDirection::Up;
        assert_eq!(next_geometry(GeometryFlow::Forward, 3, 8, &mut dir, &mut rng), 4);
        assert_eq!(next_geometry(GeometryFlow::Forward, 7, 8, &mut dir, &mut rng), 0);
    }

    #[test]
    fn pendulum_stays_in_bounds_and_reverses_at_edges() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut dir = PendulumDirection::Up;
        let mut idx = 0;
        let mut visited = vec![idx];
        for _ in 0..30 {
            let prev_dir = dir;
            let next = next_geometry(GeometryFlow::Pendulum, idx, 8, &mut dir, &mut rng);
            assert!(next <= 7);
            assert_eq!((next as i64 - idx as i64).abs(), 1);
            if dir != prev_dir {
                // Flips only happen at the ends
                assert!(idx == 7 || idx == 0, "flipped at {idx}");
            }
            idx = next;
            visited.push(idx);
        }
        assert_eq!(&visited[..10], &[0, 1, 2, 3, 4, 5, 6, 7, 6, 5]);
        assert!(visited[14..16] == [1, 0] && visited[16] == 1);
    }

    #[test]
    fn shuffle_never_repeats_current() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut dir = PendulumDirection::Up;
        for current in 0..8 {
            for _ in 0..200 {
                let next = next_geometry(GeometryFlow::Shuffle, current, 8, &mut dir, &mut rng);
                assert_ne!(next, current);
                assert!(next < 8);
            }
        }
        // Two geometries: always the other one
        assert_eq!(next_geometry(GeometryFlow::Shuffle, 0, 2, &mut dir, &mut rng), 1);
    }

    #[test]
    fn burst_jumps_one_or_two() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut dir = PendulumDirection::Up;
        let mut seen = [false; 3];
        for _ in 0..200 {
            let next = next_geometry(GeometryFlow::Burst, 6, 8, &mut dir, &mut rng);
            let jump = (next + 8 - 6) % 8;
            assert!(jump == 1 || jump == 2);
            seen[jump] = true;
        }
        assert!(seen[1] && seen[2]);
    }

    #[test]
    fn degenerate_counts_return_zero() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut dir = PendulumDirection::Up;
        for flow in [
            GeometryFlow::Forward,
            GeometryFlow::Shuffle,
            GeometryFlow::Pendulum,
            GeometryFlow::Burst,
        ] {
            assert_eq!(next_geometry(flow, 0, 0, &mut dir, &mut rng), 0);
            assert_eq!(next_geometry(flow, 3, 1, &mut dir, &mut rng), 0);
        }
    }

    #[test]
    fn out_of_range_current_is_clamped() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut dir = PendulumDirection::Up;
        let next = next_geometry(GeometryFlow::Pendulum, 42, 8, &mut dir, &mut rng);
        assert_eq!(next, 6);
        assert_eq!(dir, PendulumDirection::Down);
    }
}
