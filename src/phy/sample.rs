//! Line sampling and glitch filtering

/// Symbolic state of the differential pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LineState {
    /// Single-ended zero: both lines low
    Se0,
    /// Idle state: D+ high, D- low
    #[default]
    J,
    /// D+ low, D- high
    K,
    /// Both lines high; never valid
    Se1,
}

impl LineState {
    pub const fn from_pair(dp: bool, dn: bool) -> Self {
        match (dp, dn) {
            (false, false) => LineState::Se0,
            (true, false) => LineState::J,
            (false, true) => LineState::K,
            (true, true) => LineState::Se1,
        }
    }

    /// Returns the (D+, D-) levels that drive this state
    pub const fn pair(self) -> (bool, bool) {
        match self {
            LineState::Se0 => (false, false),
            LineState::J => (true, false),
            LineState::K => (false, true),
            LineState::Se1 => (true, true),
        }
    }

    /// Indicates a J or K state
    pub const fn is_differential(self) -> bool {
        matches!(self, LineState::J | LineState::K)
    }

    /// Returns the opposite differential state
    ///
    /// SE0 and SE1 map to themselves.
    pub const fn toggled(self) -> Self {
        match self {
            LineState::J => LineState::K,
            LineState::K => LineState::J,
            other => other,
        }
    }
}

/// One line's three-stage shift register
///
/// Stage 0 synchronizes the raw input. The filtered level only changes when
/// stages 1 and 2 agree, so a single-tick glitch never passes.
#[derive(Clone, Copy, Debug)]
struct LineFilter {
    stages: u8,
    level: bool,
}

impl LineFilter {
    const fn new(level: bool) -> Self {
        LineFilter {
            stages: if level { 0b111 } else { 0 },
            level,
        }
    }

    fn sample(&mut self, raw: bool) -> bool {
        self.stages = ((self.stages << 1) | raw as u8) & 0b111;
        match self.stages >> 1 {
            0b11 => self.level = true,
            0b00 => self.level = false,
            _ => {}
        }
        self.level
    }
}

/// Filters both lines, and decodes the pair
#[derive(Clone, Copy, Debug)]
pub struct Sampler {
    dp: LineFilter,
    dn: LineFilter,
}

impl Sampler {
    /// Start from an idle (J) bus
    pub const fn new() -> Self {
        let (dp, dn) = LineState::J.pair();
        Sampler {
            dp: LineFilter::new(dp),
            dn: LineFilter::new(dn),
        }
    }

    /// Take this tick's raw sample, and return the filtered state
    ///
    /// The filtered state lags the raw input by two ticks.
    pub fn sample(&mut self, dp: bool, dn: bool) -> LineState {
        LineState::from_pair(self.dp.sample(dp), self.dn.sample(dn))
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::{LineState, Sampler};

    fn feed(sampler: &mut Sampler, state: LineState, ticks: usize) -> LineState {
        let (dp, dn) = state.pair();
        let mut last = LineState::Se1;
        for _ in 0..ticks {
            last = sampler.sample(dp, dn);
        }
        last
    }

    #[test]
    fn two_tick_latency() {
        let mut sampler = Sampler::new();
        assert_eq!(feed(&mut sampler, LineState::J, 4), LineState::J);
        assert_eq!(feed(&mut sampler, LineState::K, 1), LineState::J);
        assert_eq!(feed(&mut sampler, LineState::K, 1), LineState::J);
        assert_eq!(feed(&mut sampler, LineState::K, 1), LineState::K);
    }

    #[test]
    fn single_tick_glitches_are_rejected() {
        let mut sampler = Sampler::new();
        for glitch in [LineState::K, LineState::Se0, LineState::Se1] {
            feed(&mut sampler, LineState::J, 3);
            let (dp, dn) = glitch.pair();
            assert_eq!(sampler.sample(dp, dn), LineState::J);
            for _ in 0..4 {
                assert_eq!(feed(&mut sampler, LineState::J, 1), LineState::J);
            }
        }
    }

    #[test]
    fn two_tick_pulses_pass() {
        let mut sampler = Sampler::new();
        feed(&mut sampler, LineState::J, 3);
        feed(&mut sampler, LineState::Se0, 2);
        assert_eq!(feed(&mut sampler, LineState::J, 1), LineState::Se0);
        assert_eq!(feed(&mut sampler, LineState::J, 1), LineState::Se0);
        assert_eq!(feed(&mut sampler, LineState::J, 1), LineState::J);
    }

    #[test]
    fn toggled() {
        assert_eq!(LineState::J.toggled(), LineState::K);
        assert_eq!(LineState::K.toggled(), LineState::J);
        assert_eq!(LineState::Se0.toggled(), LineState::Se0);
    }
}
