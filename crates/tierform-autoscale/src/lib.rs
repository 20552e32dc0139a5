//! tierform-autoscale — CPU target tracking for the application service.
//!
//! Reads recent `CpuSnapshot`s for each service from the state store,
//! compares their average against the target utilisation, and moves the
//! desired task count toward the value that would bring utilisation back
//! to target. Scale-out and scale-in each have their own cooldown.
//!
//! # Scaling Algorithm
//!
//! ```text
//! cpu    = mean of the latest `samples` snapshots
//! ideal  = current * cpu / target
//!
//! current outside [min, max]                    => ScaleTo(clamped)
//! cpu > target and scale-out cooldown elapsed   => ScaleTo(clamp(ceil(ideal)))
//! cpu < target and scale-in cooldown elapsed    => ScaleTo(clamp(floor(ideal)))
//! ```

pub mod scaler;

pub use scaler::{Autoscaler, ScaleCallback, ScaleDecision, ScalingTarget};
