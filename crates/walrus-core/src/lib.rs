//! Core domain types and traits for walrus.
//!
//! This crate contains:
//! - Pipeline, stage and variable definitions
//! - The container runtime capability trait
//! - The large-file store capability trait
//! - The runtime error enum

pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod store;

pub use error::{Error, Result};
pub use pipeline::{PARALLEL_IDENTIFIER, Parallelism, Pipeline, Stage, Variable};
pub use runtime::{ContainerRuntime, ContainerSpec, ContainerState, PortMapping};
pub use store::LargeFileStore;
