//! gostrap installer library.
//!
//! Provisions a Go toolchain, protoc and the auxiliary code generators into a
//! private workspace directory, then runs a project's build steps in
//! dependency order. It backs the `gostrap` CLI binary and can be driven
//! programmatically with substitute collaborators for testing.
//!
//! # Modules
//!
//! - [`artefact`] - Tool descriptions, download, extraction and acquisition
//! - [`cli`] - Command-line argument definitions
//! - [`codegen`] - gRPC stub and swagger generation
//! - [`coordinator`] - Concurrent fail-together provisioning batches
//! - [`deps`] - The Dep step's provisioning jobs
//! - [`environment`] - Layered subprocess environments
//! - [`error`] - Error taxonomy and cause-chain rendering
//! - [`exec`] - Subprocess invocation with timeouts
//! - [`graph`] - Step prerequisites, plans and dependency sets
//! - [`layout`] - Workspace directory layout
//! - [`orchestrator`] - Plan execution over a step runner
//! - [`output`] - Dry-run and summary text
//! - [`platform`] - Host platform resolution and per-tool naming
//! - [`steps`] - The action behind every build step
//! - [`toolchain`] - Go toolchain selection and environment layer
//! - [`version`] - Version normalisation and minimum-version gate

pub mod artefact;
pub mod cli;
pub mod codegen;
pub mod coordinator;
pub mod deps;
pub mod environment;
pub mod error;
pub mod exec;
pub mod graph;
pub mod layout;
pub mod orchestrator;
pub mod output;
pub mod platform;
pub mod steps;
pub mod toolchain;
pub mod version;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
