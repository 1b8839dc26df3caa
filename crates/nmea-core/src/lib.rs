//! # nmea-core
//!
//! Core navigation model, cache and derived computations.
//!
//! This crate provides:
//! - Data model types (angles, speeds, positions, cache keys)
//! - The lock-protected navigation cache and its recompute pass
//! - True wind computation
//! - Sliding-window water current estimation
//!
//! This crate is intentionally runtime-agnostic and contains no async code.

pub mod config;
pub mod current;
pub mod model;
pub mod store;
pub mod vector;
pub mod wind;

pub use config::{CacheSettings, ConfigError};
pub use current::{
    CurrentError, CurrentEstimate, CurrentEstimator, CurrentEstimators, CurrentSample,
    EstimatorState,
};
pub use model::*;
pub use store::{CacheState, DataCache, NavStore};
