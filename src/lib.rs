#[macro_use]
extern crate tracing;

pub mod diagnostics;
pub mod error;
pub mod expr;
pub mod generator;
pub mod spec;
pub mod template;
pub mod value;

pub use error::{Error, EvalError};
