//! Docker-backed container runtime for walrus.

pub mod docker;

pub use docker::DockerRuntime;
