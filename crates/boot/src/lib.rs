//! stackup-boot - Bootstrap library for a local two-layer devnet.
//!
//! This crate provides the bootstrap orchestration and configuration
//! derivation engine: a fixed, gated stage pipeline that derives runtime
//! configuration from live chain state, propagates it into downstream
//! service configs, verifies on-chain side effects and launches the
//! off-chain services.

pub mod config;
pub mod derive;
pub mod error;
pub mod fs;
pub mod keys;
pub mod launcher;
pub mod pipeline;
pub mod poll;
pub mod propagate;
pub mod rpc;
pub mod stage;

pub use config::ConfigStore;
pub use error::{BootError, Result};
pub use launcher::{
    DockerImage, DockerLauncher, DockerLauncherConfig, LaunchHandle, LaunchMode, PortMapping,
    ServiceLauncher, ServiceSpec,
};
pub use pipeline::{BOOTCONF_FILENAME, BootConfig, BootCtx, ContractAddresses, ServiceImages};
pub use poll::{PollOutcome, poll_until};
pub use propagate::{PropagationReport, PropagationTarget};
pub use rpc::{AbiValue, BlockInfo, ChainClient, ChainQueryResult, HttpChainReader, Signature};
pub use stage::{PipelineReport, Stage, StageContext, StageOutcome, StageSequencer, StageStatus};
