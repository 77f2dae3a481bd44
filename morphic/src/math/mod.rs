//! Numerical building blocks shared by the analyzer and the bakers.

mod homography;
mod linear;
mod stats;

pub use homography::Homography;
pub use linear::solve_linear_system;
pub use stats::{median_and_mad_f32, median_f32_mut};
