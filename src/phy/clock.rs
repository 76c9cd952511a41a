//! Bit clock recovery
//!
//! The master tick runs at four times the bit rate. The phase counter counts
//! ticks within a bit, and the bit strobe fires at phase 3. A J/K edge
//! should land at phase 1, two ticks ahead of the strobe. An edge seen at
//! phase 2 is late, and an edge seen at phase 0 is early. Either way the
//! counter is reset to phase 1, moving the next strobe by exactly one tick.
//! Only one correction is allowed between strobes.

/// Modulo-4 recovered phase counter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitClock {
    phase: u8,
    nudged: bool,
}

/// Phase that produces the strobe
const STROBE: u8 = 3;
/// Phase at which a J/K edge should appear
const EDGE: u8 = 1;

impl BitClock {
    pub const fn new() -> Self {
        BitClock {
            phase: 0,
            nudged: false,
        }
    }

    /// Advance one tick
    ///
    /// `edge` is true when the filtered line just changed between J and K.
    /// Returns true on the bit strobe.
    pub fn tick(&mut self, edge: bool) -> bool {
        self.phase = (self.phase + 1) & 0b11;
        if edge && !self.nudged && matches!(self.phase, 0 | 2) {
            self.phase = EDGE;
            self.nudged = true;
        }
        let strobe = self.phase == STROBE;
        if strobe {
            self.nudged = false;
        }
        strobe
    }

    /// Align to a packet's first edge, seen on this tick
    ///
    /// Call after [`tick()`](Self::tick). The next strobe fires two ticks
    /// later.
    pub fn sync(&mut self) {
        self.phase = EDGE;
        self.nudged = false;
    }

    /// Start a transmit bit on this tick
    ///
    /// Call after [`tick()`](Self::tick). The next strobe fires four ticks
    /// later, ending the bit.
    pub fn restart(&mut self) {
        self.phase = STROBE;
        self.nudged = false;
    }

    pub fn phase(&self) -> u8 {
        self.phase
    }
}

#[cfg(test)]
mod test {
    use super::BitClock;

    /// Returns the tick offsets of the strobes in `ticks` ticks
    fn strobes(clock: &mut BitClock, edges: &[usize], ticks: usize) -> std::vec::Vec<usize> {
        (0..ticks)
            .filter(|tick| clock.tick(edges.contains(tick)))
            .collect()
    }

    #[test]
    fn free_running() {
        let mut clock = BitClock::new();
        assert_eq!(strobes(&mut clock, &[], 16), [2, 6, 10, 14]);
    }

    #[test]
    fn sync_strobes_two_ticks_later() {
        let mut clock = BitClock::new();
        clock.tick(true);
        clock.sync();
        assert_eq!(strobes(&mut clock, &[], 10), [1, 5, 9]);
    }

    #[test]
    fn restart_strobes_four_ticks_later() {
        let mut clock = BitClock::new();
        clock.tick(false);
        clock.restart();
        assert_eq!(strobes(&mut clock, &[], 8), [3, 7]);
    }

    #[test]
    fn centered_edges_change_nothing() {
        let mut clock = BitClock::new();
        clock.tick(false);
        clock.sync();
        // Phase 1 lands on offsets 3, 7, 11.
        assert_eq!(strobes(&mut clock, &[3, 7, 11], 14), [1, 5, 9, 13]);
    }

    #[test]
    fn late_edge_delays_the_strobe() {
        let mut clock = BitClock::new();
        clock.tick(false);
        clock.sync();
        // Offset 4 is phase 2.
        assert_eq!(strobes(&mut clock, &[4], 12), [1, 6, 10]);
    }

    #[test]
    fn early_edge_advances_the_strobe() {
        let mut clock = BitClock::new();
        clock.tick(false);
        clock.sync();
        // Offset 2 is phase 0.
        assert_eq!(strobes(&mut clock, &[2], 12), [1, 4, 8]);
    }

    #[test]
    fn one_nudge_per_bit() {
        let mut clock = BitClock::new();
        clock.tick(false);
        clock.sync();
        // Offset 2 is phase 0. After the nudge, offset 3 is phase 2 of the
        // same bit.
        assert_eq!(strobes(&mut clock, &[2, 3], 12), [1, 4, 8]);
    }
}
