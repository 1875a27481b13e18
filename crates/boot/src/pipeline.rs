//! The devnet bootstrap pipeline.
//!
//! Wires the generic components into the fixed stage list that brings up a
//! local two-layer network: prepare downstream configs, derive values from
//! live L1 state, register the dispute game, verify the registration became
//! observable, then launch the off-chain services.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use alloy_core::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::config::ConfigStore;
use crate::derive::{genesis_time_override, resolve_anchor_height};
use crate::error::{BootError, Result};
use crate::launcher::{DockerImage, LaunchMode, PortMapping, ServiceLauncher, ServiceSpec};
use crate::poll::poll_until;
use crate::propagate::{self, PropagationTarget};
use crate::rpc::{AbiValue, ChainClient, ChainQueryResult};
use crate::stage::{PipelineReport, Stage, StageContext, StageSequencer};
use crate::{fs, keys};

/// Default name for the orchestrator's own configuration file.
pub const BOOTCONF_FILENAME: &str = "Stackup.toml";

/// Downstream services whose env files the pipeline owns.
pub const TARGET_SERVICES: &[&str] = &["rollup-node", "proposer", "challenger"];

/// Signatures of the on-chain entry points the pipeline touches.
const ANCHORS_SIG: &str = "anchors(uint32)(bytes32,uint256)";
const GAME_IMPLS_SIG: &str = "gameImpls(uint32)(address)";
const SET_RESPECTED_GAME_TYPE_SIG: &str = "setRespectedGameType(uint32)";

/// Docker images for the launchable services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceImages {
    pub rollup_node: DockerImage,
    pub proposer: DockerImage,
    pub challenger: DockerImage,
}

impl Default for ServiceImages {
    fn default() -> Self {
        Self {
            rollup_node: DockerImage::new(
                "us-docker.pkg.dev/oplabs-tools-artifacts/images/op-node",
                "v1.10.0",
            ),
            proposer: DockerImage::new(
                "us-docker.pkg.dev/oplabs-tools-artifacts/images/op-proposer",
                "v1.10.0",
            ),
            challenger: DockerImage::new(
                "us-docker.pkg.dev/oplabs-tools-artifacts/images/op-challenger",
                "v1.3.1",
            ),
        }
    }
}

/// Orchestrator configuration, serializable to `Stackup.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootConfig {
    /// Base-layer JSON-RPC endpoint.
    pub l1_rpc_url: String,
    /// Rollup-layer JSON-RPC endpoint.
    pub l2_rpc_url: String,
    /// Directory holding the base env, target envs, templates and artifacts.
    pub workdir: PathBuf,
    /// Maximum attempts for on-chain observation polls.
    pub poll_max_attempts: u32,
    /// Seconds between poll attempts.
    pub poll_interval_secs: u64,
    /// Seconds to wait for the contract addresses artifact.
    pub artifact_timeout_secs: u64,
    /// Start services detached instead of foreground.
    pub detach: bool,
    /// Host port the rollup node RPC is published on.
    pub rollup_node_port: u16,
    /// Docker images for the launchable services.
    pub images: ServiceImages,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            l1_rpc_url: "http://localhost:8545".to_string(),
            l2_rpc_url: "http://localhost:9545".to_string(),
            workdir: PathBuf::from("./devnet"),
            poll_max_attempts: 30,
            poll_interval_secs: 2,
            artifact_timeout_secs: 120,
            detach: true,
            rollup_node_port: 9545,
            images: ServiceImages::default(),
        }
    }
}

impl BootConfig {
    /// The base `KEY=VALUE` configuration file.
    pub fn base_env(&self) -> PathBuf {
        self.workdir.join("devnet.env")
    }

    /// The env file of a downstream service.
    pub fn target_env(&self, service: &str) -> PathBuf {
        self.workdir.join(format!("{service}.env"))
    }

    /// The template a missing target env is created from.
    pub fn target_template(&self, service: &str) -> PathBuf {
        self.workdir.join(format!("{service}.env.template"))
    }

    /// The contract addresses artifact written by the deployment toolchain.
    pub fn addresses_path(&self) -> PathBuf {
        self.workdir.join("addresses.json")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            BootError::InvalidValue {
                key: "BootConfig".to_string(),
                value: e.to_string(),
                expected: "serializable configuration",
            }
        })?;
        std::fs::write(path, content).map_err(|e| BootError::io(path, e))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file or a directory containing one.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let config_path = if path.is_dir() {
            path.join(BOOTCONF_FILENAME)
        } else {
            path.to_path_buf()
        };
        let content =
            std::fs::read_to_string(&config_path).map_err(|e| BootError::io(&config_path, e))?;
        let config: Self = toml::from_str(&content).map_err(|e| BootError::InvalidValue {
            key: config_path.display().to_string(),
            value: e.to_string(),
            expected: "TOML boot configuration",
        })?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }
}

/// Addresses of the rollup contracts, produced by the external deployment
/// toolchain as `addresses.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractAddresses {
    #[serde(rename = "DisputeGameFactoryProxy")]
    pub dispute_game_factory: Address,
    #[serde(rename = "AnchorStateRegistryProxy")]
    pub anchor_state_registry: Address,
    #[serde(rename = "OptimismPortalProxy")]
    pub portal: Address,
}

impl ContractAddresses {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| BootError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| {
            BootError::MalformedResult(format!(
                "addresses artifact {} is invalid: {e}",
                path.display()
            ))
        })
    }
}

/// Everything a stage body can touch. Owns the authoritative configuration
/// for the lifetime of the run; no component holds an independent copy.
pub struct BootCtx<C: ChainClient, L: ServiceLauncher> {
    pub store: ConfigStore,
    pub chain: C,
    pub launcher: L,
    pub boot: BootConfig,
    addresses: Option<ContractAddresses>,
}

impl<C: ChainClient, L: ServiceLauncher> BootCtx<C, L> {
    pub fn new(store: ConfigStore, chain: C, launcher: L, boot: BootConfig) -> Self {
        Self {
            store,
            chain,
            launcher,
            boot,
            addresses: None,
        }
    }

    /// The contract addresses artifact, waiting for it to appear on first use.
    pub async fn contract_addresses(&mut self) -> Result<ContractAddresses> {
        if let Some(addresses) = &self.addresses {
            return Ok(addresses.clone());
        }
        let path = self.boot.addresses_path();
        fs::wait_for_file(&path, Duration::from_secs(self.boot.artifact_timeout_secs)).await?;
        let addresses = ContractAddresses::load(&path)?;
        tracing::debug!(
            dispute_game_factory = %addresses.dispute_game_factory,
            anchor_state_registry = %addresses.anchor_state_registry,
            portal = %addresses.portal,
            "Contract addresses loaded"
        );
        self.addresses = Some(addresses.clone());
        Ok(addresses)
    }

    /// Propagate a derived value into every target env that declares `key`,
    /// and into the base store.
    fn propagate(&mut self, key: &str, value: &str) -> Result<()> {
        self.store.set(key, value);

        let mut targets = Vec::new();
        for service in TARGET_SERVICES {
            let path = self.boot.target_env(service);
            if path.exists() && ConfigStore::target_declares(&path, key)? {
                targets.push(PropagationTarget::new(path, key));
            }
        }

        propagate::apply(&self.store, value, &targets).into_result()
    }
}

impl<C: ChainClient, L: ServiceLauncher> StageContext for BootCtx<C, L> {
    fn config(&self) -> &ConfigStore {
        &self.store
    }
}

/// Gate: the fault proof engine is selected.
fn fault_engine(config: &ConfigStore) -> bool {
    config.get(keys::PROOF_ENGINE) == Some("fault")
}

/// The fixed, ordered stage list of the bootstrap pipeline.
pub fn stages<C, L>() -> Vec<Stage<BootCtx<C, L>>>
where
    C: ChainClient + 'static,
    L: ServiceLauncher + 'static,
{
    vec![
        Stage::new("prepare-targets", |ctx| Box::pin(prepare_targets(ctx))),
        Stage::new("genesis-time", |ctx| Box::pin(derive_genesis_time(ctx)))
            .requires(&[keys::STARTING_BLOCK_NUMBER, keys::L2_BLOCK_TIME]),
        Stage::new("anchor-state", |ctx| Box::pin(resolve_anchor_state(ctx)))
            .gate(fault_engine)
            .requires(&[keys::RESPECTED_GAME_TYPE]),
        Stage::new("respected-game-type", |ctx| Box::pin(register_game_type(ctx)))
            .gate(fault_engine)
            .requires(&[keys::RESPECTED_GAME_TYPE, keys::ADMIN_ADDRESS]),
        Stage::new("launch-services", |ctx| Box::pin(launch_services(ctx)))
            .gate(|config| !config.flag(keys::SKIP_LAUNCH)),
    ]
}

/// Build a sequencer over the standard stage list.
pub fn sequencer<C, L>() -> StageSequencer<BootCtx<C, L>>
where
    C: ChainClient + 'static,
    L: ServiceLauncher + 'static,
{
    StageSequencer::new(stages())
}

/// Run the standard pipeline to completion.
pub async fn run<C, L>(ctx: &mut BootCtx<C, L>) -> PipelineReport
where
    C: ChainClient + 'static,
    L: ServiceLauncher + 'static,
{
    sequencer().run(ctx).await
}

/// Stage 1: create every target env from its template where missing.
async fn prepare_targets<C: ChainClient, L: ServiceLauncher>(
    ctx: &mut BootCtx<C, L>,
) -> Result<()> {
    fs::ensure_dir(&ctx.boot.workdir)?;
    for service in TARGET_SERVICES {
        ctx.store.ensure_from_template(
            ctx.boot.target_env(service),
            ctx.boot.target_template(service),
        )?;
    }
    Ok(())
}

/// Stage 2: derive the genesis time override from the latest L1 block and
/// push it into every config that declares it. Recomputed on every run.
async fn derive_genesis_time<C: ChainClient, L: ServiceLauncher>(
    ctx: &mut BootCtx<C, L>,
) -> Result<()> {
    let block = ctx.chain.latest_block(&ctx.boot.l1_rpc_url).await?;
    let starting_block = ctx.store.require_u64(keys::STARTING_BLOCK_NUMBER)?;
    let block_time = ctx.store.require_u64(keys::L2_BLOCK_TIME)?;

    let value = genesis_time_override(block.timestamp, starting_block, block_time)?;
    tracing::info!(
        l1_timestamp = block.timestamp,
        l1_block = block.number,
        starting_block,
        block_time,
        genesis_time_override = value,
        "Derived genesis time override"
    );

    ctx.propagate(keys::GENESIS_TIME_OVERRIDE, &value.to_string())
}

/// Stage 3: read the trusted anchor from the registry and propagate its
/// height to the proving services.
async fn resolve_anchor_state<C: ChainClient, L: ServiceLauncher>(
    ctx: &mut BootCtx<C, L>,
) -> Result<()> {
    let addresses = ctx.contract_addresses().await?;
    let game_type = ctx.store.require_u64(keys::RESPECTED_GAME_TYPE)?;

    let result = ctx
        .chain
        .call(
            &ctx.boot.l1_rpc_url,
            addresses.anchor_state_registry,
            ANCHORS_SIG,
            &[AbiValue::Uint(U256::from(game_type))],
        )
        .await?;

    let height = resolve_anchor_height(&result)?;
    tracing::info!(game_type, anchor_height = height, "Resolved anchor state");

    ctx.propagate(keys::STARTING_ANCHOR_HEIGHT, &height.to_string())
}

/// Stage 4: make the dispute game type respected on-chain, then poll the
/// factory until the registration is observable.
async fn register_game_type<C: ChainClient, L: ServiceLauncher>(
    ctx: &mut BootCtx<C, L>,
) -> Result<()> {
    let addresses = ctx.contract_addresses().await?;
    let game_type = ctx.store.require_u64(keys::RESPECTED_GAME_TYPE)?;
    let admin = parse_address(ctx.store.require(keys::ADMIN_ADDRESS)?, keys::ADMIN_ADDRESS)?;

    let tx_hash = ctx
        .chain
        .send_transaction(
            &ctx.boot.l1_rpc_url,
            admin,
            addresses.portal,
            SET_RESPECTED_GAME_TYPE_SIG,
            &[AbiValue::Uint(U256::from(game_type))],
        )
        .await?;
    tracing::info!(game_type, tx_hash, "Respected game type set");

    let what = format!("game implementation for type {game_type}");
    let chain = &ctx.chain;
    let endpoint = &ctx.boot.l1_rpc_url;
    let factory = addresses.dispute_game_factory;
    let args = [AbiValue::Uint(U256::from(game_type))];

    poll_until(
        &what,
        ctx.boot.poll_max_attempts,
        ctx.boot.poll_interval(),
        || chain.call(endpoint, factory, GAME_IMPLS_SIG, &args),
        // The factory returns the zero address until an implementation is
        // registered; that sentinel must not terminate the wait.
        |result: &ChainQueryResult| result.values.first().is_some_and(|v| !v.is_zero_address()),
    )
    .await
    .into_result(&what)?;

    Ok(())
}

/// Stage 5: bring up the off-chain services through the launcher.
async fn launch_services<C: ChainClient, L: ServiceLauncher>(
    ctx: &mut BootCtx<C, L>,
) -> Result<()> {
    let mode = if ctx.boot.detach {
        LaunchMode::Detached
    } else {
        LaunchMode::Foreground
    };

    let mut specs = vec![
        service_spec(&ctx.boot, "rollup-node", ctx.boot.images.rollup_node.clone())
            .port(PortMapping::same(ctx.boot.rollup_node_port)),
    ];
    if fault_engine(&ctx.store) {
        specs.push(service_spec(&ctx.boot, "proposer", ctx.boot.images.proposer.clone()));
        specs.push(service_spec(&ctx.boot, "challenger", ctx.boot.images.challenger.clone()));
    }

    let handles = ctx.launcher.launch(&specs, mode).await?;
    for handle in &handles {
        tracing::info!(
            service = handle.service,
            container = handle.container_name,
            "Service up"
        );
    }

    // A detached rollup node comes up asynchronously; wait until its RPC
    // answers before declaring the bootstrap done.
    if mode == LaunchMode::Detached {
        let chain = &ctx.chain;
        let endpoint = &ctx.boot.l2_rpc_url;
        poll_until(
            "rollup node rpc",
            ctx.boot.poll_max_attempts,
            ctx.boot.poll_interval(),
            || chain.latest_block(endpoint),
            |_| true,
        )
        .await
        .into_result(&format!("rollup node rpc at {endpoint}"))?;
        tracing::info!(endpoint, "Rollup node RPC ready");
    }
    Ok(())
}

/// A service container that reads its env file from the mounted workdir.
fn service_spec(boot: &BootConfig, service: &str, image: DockerImage) -> ServiceSpec {
    ServiceSpec::new(service, image)
        .cmd(["--config", &format!("/config/{service}.env")])
        .bind(&boot.workdir, "/config", "ro")
}

fn parse_address(text: &str, key: &str) -> Result<Address> {
    Address::from_str(text).map_err(|_| BootError::InvalidValue {
        key: key.to_string(),
        value: text.to_string(),
        expected: "0x-prefixed 20-byte address",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_boot_config_roundtrip() {
        let dir = TempDir::new("bootconf").unwrap();
        let path = dir.path().join(BOOTCONF_FILENAME);

        let mut config = BootConfig::default();
        config.l1_rpc_url = "http://l1:8545".to_string();
        config.poll_max_attempts = 7;
        config.save_to_file(&path).unwrap();

        let loaded = BootConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_boot_config_load_from_directory() {
        let dir = TempDir::new("bootconf").unwrap();
        let config = BootConfig::default();
        config
            .save_to_file(&dir.path().join(BOOTCONF_FILENAME))
            .unwrap();

        let loaded = BootConfig::load_from_file(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_contract_addresses_artifact() {
        let dir = TempDir::new("addresses").unwrap();
        let path = dir.path().join("addresses.json");
        std::fs::write(
            &path,
            r#"{
                "DisputeGameFactoryProxy": "0x1111111111111111111111111111111111111111",
                "AnchorStateRegistryProxy": "0x2222222222222222222222222222222222222222",
                "OptimismPortalProxy": "0x3333333333333333333333333333333333333333"
            }"#,
        )
        .unwrap();

        let addresses = ContractAddresses::load(&path).unwrap();
        assert_eq!(
            addresses.dispute_game_factory,
            Address::repeat_byte(0x11)
        );
        assert_eq!(addresses.portal, Address::repeat_byte(0x33));
    }

    #[test]
    fn test_contract_addresses_invalid_artifact() {
        let dir = TempDir::new("addresses").unwrap();
        let path = dir.path().join("addresses.json");
        std::fs::write(&path, r#"{"DisputeGameFactoryProxy": "not an address"}"#).unwrap();

        let err = ContractAddresses::load(&path).unwrap_err();
        assert_eq!(err.kind(), "MalformedResultError");
    }

    #[test]
    fn test_fault_engine_gate() {
        let mut store = ConfigStore::default();
        assert!(!fault_engine(&store));
        store.set(keys::PROOF_ENGINE, "fault");
        assert!(fault_engine(&store));
        store.set(keys::PROOF_ENGINE, "validity");
        assert!(!fault_engine(&store));
    }

    #[test]
    fn test_paths_derive_from_workdir() {
        let config = BootConfig {
            workdir: PathBuf::from("/tmp/net"),
            ..Default::default()
        };
        assert_eq!(config.base_env(), PathBuf::from("/tmp/net/devnet.env"));
        assert_eq!(
            config.target_env("proposer"),
            PathBuf::from("/tmp/net/proposer.env")
        );
        assert_eq!(
            config.target_template("proposer"),
            PathBuf::from("/tmp/net/proposer.env.template")
        );
        assert_eq!(
            config.addresses_path(),
            PathBuf::from("/tmp/net/addresses.json")
        );
    }
}
