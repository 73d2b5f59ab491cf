//! Background tasks for Vision Service.
//!
//! # Tasks
//!
//! - `sweeper` - Ends expired meetings and purges old ended ones

pub mod sweeper;

pub use sweeper::{run_sweep, start_sweeper, SweepReport, SweeperConfig};
