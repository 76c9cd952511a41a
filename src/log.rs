//! Logging interface, contingent on the `defmt-03` or hidden `__log` feature
//!
//! Only enable `__log` when debugging, and when you're certain that your
//! logger isn't using this USB device!
//!
//! Keep arguments to integers and booleans so that both backends can
//! format them.

macro_rules! debug {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt_03::debug!($($args)*);
        #[cfg(feature = "__log")]
        ::log::debug!($($args)*);
    };
}

macro_rules! warn {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt_03::warn!($($args)*);
        #[cfg(feature = "__log")]
        ::log::warn!($($args)*);
    };
}

macro_rules! trace {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt_03::trace!($($args)*);
        #[cfg(feature = "__log")]
        ::log::trace!($($args)*);
    };
}
