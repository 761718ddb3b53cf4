//! Question sampling.
//!
//! This module selects balanced, bounded question sets from the pool of
//! stored questions.

pub mod sampler;

pub use sampler::{QuestionSampler, SamplingConfig, SamplingError, SamplingResult};
