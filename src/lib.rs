//! Real-time imaging of LOFAR station cross-correlation statistics (XST).
//!
//! A station writes one `num_rcu × num_rcu` correlation matrix per
//! integration to a `.dat` file. This crate reads those records (following
//! the file as it grows, if asked), turns the subband the user picks into a
//! sky image, and saves each image as a PNG frame.

pub mod calibration;
pub mod cancel;
pub mod constants;
mod error;
pub mod freq;
pub mod imaging;
pub mod pipeline;
pub mod present;
pub mod read;
pub mod recording;
pub mod session;
pub mod station;
pub mod synth;
pub mod write;

pub use error::XstError;
