#![doc = include_str!("../../README.md")]

pub mod config;
pub mod error;
pub mod functions;
pub mod geometry;
pub mod reference;
pub mod table;

pub use error::{GeoWrangleError, Result};
pub use functions::codec;
