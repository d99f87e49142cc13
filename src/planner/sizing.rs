//! Adaptive sizing rules
//!
//! ID pages shrink along a descending ladder of preset sizes; time windows
//! halve down to a floor.

use super::types::UnitSize;
use crate::error::{Error, Result};
use chrono::Duration;

/// Default page sizes, largest first
pub const DEFAULT_TAKE_SIZES: [u64; 6] = [1000, 500, 250, 50, 10, 1];

/// Descending ladder of page sizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeLadder {
    sizes: Vec<u64>,
}

impl SizeLadder {
    /// Create a ladder; sizes must be non-empty, positive and strictly descending
    pub fn new(sizes: Vec<u64>) -> Result<Self> {
        if sizes.is_empty() {
            return Err(Error::invalid_value("take_sizes", "must not be empty"));
        }
        if sizes.contains(&0) {
            return Err(Error::invalid_value("take_sizes", "sizes must be positive"));
        }
        if sizes.windows(2).any(|w| w[1] >= w[0]) {
            return Err(Error::invalid_value(
                "take_sizes",
                "sizes must be strictly descending",
            ));
        }
        Ok(Self { sizes })
    }

    /// Largest (initial) size
    pub fn largest(&self) -> u64 {
        self.sizes[0]
    }

    /// Smallest size
    pub fn floor(&self) -> u64 {
        self.sizes[self.sizes.len() - 1]
    }

    /// Next size strictly smaller than `size`, if any
    pub fn next_smaller(&self, size: u64) -> Option<u64> {
        self.sizes.iter().copied().find(|&s| s < size)
    }

    /// All sizes, largest first
    pub fn sizes(&self) -> &[u64] {
        &self.sizes
    }
}

impl Default for SizeLadder {
    fn default() -> Self {
        Self {
            sizes: DEFAULT_TAKE_SIZES.to_vec(),
        }
    }
}

/// Window sizing for time-partitioned streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSizing {
    /// Window size for a stream with no history
    pub initial: Duration,
    /// Windows are never halved below this
    pub floor: Duration,
    /// A window returning more records than this makes future windows smaller
    pub large_window_threshold: u64,
}

impl Default for WindowSizing {
    fn default() -> Self {
        Self {
            initial: Duration::days(90),
            floor: Duration::days(14),
            large_window_threshold: 200_000,
        }
    }
}

impl WindowSizing {
    /// Half of `window`, clamped to the floor; `None` once at the floor
    pub fn next_smaller(&self, window: Duration) -> Option<Duration> {
        if window <= self.floor {
            return None;
        }
        Some(std::cmp::max(window / 2, self.floor))
    }

    /// Default window to use after a window of `window` returned `count` records
    pub fn after_volume(&self, window: Duration, count: u64) -> Duration {
        if count > self.large_window_threshold {
            self.next_smaller(window).unwrap_or(window)
        } else {
            window
        }
    }
}

/// Complete sizing policy for planning and shrinking
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizingPolicy {
    /// Page ladder for ID streams
    pub ladder: SizeLadder,
    /// Window rules for time streams
    pub windows: WindowSizing,
    /// Keep planning with a shrunk size after a retry succeeded
    pub sticky_shrink: bool,
}

impl SizingPolicy {
    /// Next smaller size for a unit of `size`, if it can still shrink
    pub fn shrink(&self, size: UnitSize) -> Option<UnitSize> {
        match size {
            UnitSize::Records(take) => self.ladder.next_smaller(take).map(UnitSize::Records),
            UnitSize::Window(window) => self.windows.next_smaller(window).map(UnitSize::Window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_default_ladder() {
        let ladder = SizeLadder::default();
        assert_eq!(ladder.largest(), 1000);
        assert_eq!(ladder.floor(), 1);
        assert_eq!(ladder.next_smaller(1000), Some(500));
        assert_eq!(ladder.next_smaller(500), Some(250));
        assert_eq!(ladder.next_smaller(250), Some(50));
        assert_eq!(ladder.next_smaller(1), None);
    }

    #[test]
    fn test_off_ladder_size_steps_down() {
        let ladder = SizeLadder::default();
        assert_eq!(ladder.next_smaller(700), Some(500));
        assert_eq!(ladder.next_smaller(5000), Some(1000));
    }

    #[test_case(vec![] ; "empty")]
    #[test_case(vec![100, 0] ; "zero")]
    #[test_case(vec![100, 100] ; "duplicate")]
    #[test_case(vec![50, 100] ; "ascending")]
    fn test_invalid_ladders(sizes: Vec<u64>) {
        assert!(SizeLadder::new(sizes).is_err());
    }

    #[test]
    fn test_ladder_shrinking_terminates() {
        // Walking the ladder from any starting size strictly decreases and stops
        let ladder = SizeLadder::default();
        for &start in ladder.sizes() {
            let mut size = start;
            let mut steps = 0;
            while let Some(next) = ladder.next_smaller(size) {
                assert!(next < size);
                size = next;
                steps += 1;
                assert!(steps <= ladder.sizes().len());
            }
            assert_eq!(size, ladder.floor());
        }
    }

    #[test]
    fn test_window_halving_stops_at_floor() {
        let sizing = WindowSizing::default();
        let mut window = sizing.initial;
        let mut seen = vec![window];
        while let Some(next) = sizing.next_smaller(window) {
            assert!(next < window);
            window = next;
            seen.push(window);
        }
        assert_eq!(window, sizing.floor);
        assert_eq!(
            seen,
            vec![
                Duration::days(90),
                Duration::days(45),
                Duration::hours(540),
                Duration::days(14)
            ]
        );
    }

    #[test]
    fn test_window_after_volume() {
        let sizing = WindowSizing {
            large_window_threshold: 100,
            ..WindowSizing::default()
        };
        assert_eq!(
            sizing.after_volume(Duration::days(90), 100),
            Duration::days(90)
        );
        assert_eq!(
            sizing.after_volume(Duration::days(90), 101),
            Duration::days(45)
        );
        assert_eq!(
            sizing.after_volume(Duration::days(14), 5000),
            Duration::days(14)
        );
    }

    #[test]
    fn test_policy_shrink() {
        let policy = SizingPolicy::default();
        assert_eq!(
            policy.shrink(UnitSize::Records(1000)),
            Some(UnitSize::Records(500))
        );
        assert_eq!(policy.shrink(UnitSize::Records(1)), None);
        assert_eq!(
            policy.shrink(UnitSize::Window(Duration::days(20))),
            Some(UnitSize::Window(Duration::days(14)))
        );
        assert_eq!(policy.shrink(UnitSize::Window(Duration::days(14))), None);
    }
}
