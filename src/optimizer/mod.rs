//! Hyperparameter sweeps
//!
//! Provides the pieces a sweep is assembled from:
//! - Parameter grids built from configuration
//! - K-fold and time-series cross-validation splitters
//! - The `SearchBackend` seam with a grid / random-subsample implementation
//! - Trial tables that can be logged or written as CSV

mod cross_validation;
mod search;
mod search_space;

pub use cross_validation::{CVSplit, SplitStrategy};
pub use search::{
    GridSearch, SearchAlgorithm, SearchBackend, SearchTask, TrialRecord, TrialStatus, TrialTable,
};
pub use search_space::{merge_params, Parameter, SweepSpace};
