//! Logging interface, contingent on the `defmt-03` feature
//!
//! Log points track the streamer lifecycle. Only enable `defmt-03` when
//! you're certain that your logging sink isn't the streaming transport!

macro_rules! debug {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt_03::debug!($($args)*)
    };
}

macro_rules! warn {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt_03::warn!($($args)*)
    };
}
