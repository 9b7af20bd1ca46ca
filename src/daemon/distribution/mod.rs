//! Apportions a project's active time across the files that were being edited.
//!
//!  - A [timeline::Timeline] is the record of activity spans ("edges") of one file.
//!  - The [distributor::Distributor] keeps exactly one timeline open at a time and moves the open
//!    span from file to file as activity is registered, so no time is counted twice at a switch.

pub mod distributor;
pub mod timeline;

pub use distributor::{DistributionError, Distributor, OVERHEAD_TIMELINE};
pub use timeline::Timeline;
