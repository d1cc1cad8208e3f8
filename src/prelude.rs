//! fitkit prelude.
//!
//! This module contains the most used types, type aliases, traits, functions,
//! and macros that you can import easily as a group.
//!
//! ```
//! use fitkit::prelude::*;
//!
//! ```

#[doc(no_inline)]
pub use crate::error::MinimizerError;

#[doc(no_inline)]
pub use crate::params::{ParameterSet, ParameterSpec, MAX_PARAMS};

#[doc(no_inline)]
pub use crate::objective::{MultiDimFn, ObjFn, ObjectiveAdapter, SingleDimFn};

#[doc(no_inline)]
pub use crate::minimize::{
    FitOptions, FitResult, FitStatus, Minimizer, DEFAULT_MAX_CALLS, DEFAULT_TOLERANCE,
};

#[doc(no_inline)]
pub use crate::minimize::{Brent, Powell, Simplex, VariableMetric};

#[doc(no_inline)]
pub use crate::minimize::{ErrorMatrix, MinosDirection, MinosOutcome, MinosResult};
