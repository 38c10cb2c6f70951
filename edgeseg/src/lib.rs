pub mod app;
pub mod batch;
pub mod camera;
pub mod dataset;
pub mod error;
pub mod progress;
pub mod render;
pub mod weights;

pub use error::{Error, Result};
