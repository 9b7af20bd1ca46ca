//! Automated time tracking for code repositories. A daemon watches the repositories you work
//! on and credits time while files keep changing, the `glass` cli talks to it and attaches the
//! time spent to commits.

pub mod cli;
pub mod daemon;
pub mod fs;
pub mod protocol;
pub mod utils;
pub mod vcs;
