#![allow(dead_code)]
pub mod error;
pub mod minimize;
pub mod objective;
pub mod params;
pub mod prelude;
