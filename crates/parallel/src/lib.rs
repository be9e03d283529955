//! # hubflow parallel
//!
//! Scheduling of independent tile computations.
//!
//! This crate provides:
//! - `ProcessingMode`: sequential, rayon-parallel or fixed-size pool
//! - `ParallelStrategy`: ordered, fail-fast map over task indices

pub mod strategy;

pub use strategy::{available_threads, ParallelStrategy, PoolError, ProcessingMode};
