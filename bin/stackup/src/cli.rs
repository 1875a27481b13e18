use std::path::PathBuf;

use clap::Parser;
use stackup_boot::keys;
use tracing::level_filters::LevelFilter;

/// Proof engine the devnet is configured for. Gates the proving stages of
/// the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ProofEngine {
    Fault,
    Validity,
}

#[derive(Parser)]
#[command(name = "stackup")]
#[command(
    author,
    version,
    about = "Bootstrap a local two-layer devnet: derive config from live chain state, wire it into the services, bring them up"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "STACKUP_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Directory holding the base env, target env files and deployment
    /// artifacts.
    #[arg(short, long, env = "STACKUP_WORKDIR", default_value = "./devnet")]
    pub workdir: PathBuf,

    /// The base-layer JSON-RPC endpoint.
    #[arg(long, alias = "l1-rpc", env = "STACKUP_L1_RPC_URL", default_value = "http://localhost:8545")]
    pub l1_rpc_url: String,

    /// The rollup-layer JSON-RPC endpoint.
    #[arg(long, alias = "l2-rpc", env = "STACKUP_L2_RPC_URL", default_value = "http://localhost:9545")]
    pub l2_rpc_url: String,

    /// Override the proof engine declared in the base configuration.
    #[arg(long, env = "STACKUP_PROOF_ENGINE")]
    pub proof_engine: Option<ProofEngine>,

    /// Path to an existing Stackup.toml configuration file to load.
    ///
    /// When provided, the run uses the configuration from this file instead
    /// of building one from CLI arguments.
    #[arg(long, alias = "conf", env = "STACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Evaluate which stages would run and exit without touching anything.
    #[arg(long, env = "STACKUP_DRY_RUN")]
    pub dry_run: bool,

    /// Skip the service launch stage.
    #[arg(long, env = "STACKUP_SKIP_LAUNCH")]
    pub skip_launch: bool,

    /// Keep services in the foreground instead of detaching.
    #[arg(long, env = "STACKUP_FOREGROUND")]
    pub foreground: bool,

    /// Skips the cleanup of docker containers when the program exits.
    #[arg(long, env = "STACKUP_NO_CLEANUP")]
    pub no_cleanup: bool,

    /// Maximum attempts for on-chain observation polls.
    #[arg(long, env = "STACKUP_POLL_MAX_ATTEMPTS", default_value_t = 30)]
    pub poll_max_attempts: u32,

    /// Seconds between poll attempts.
    #[arg(long, env = "STACKUP_POLL_INTERVAL", default_value_t = 2)]
    pub poll_interval: u64,

    /// Seconds to wait for the contract addresses artifact.
    #[arg(long, env = "STACKUP_ARTIFACT_TIMEOUT", default_value_t = 120)]
    pub artifact_timeout: u64,

    /// Host port the rollup node RPC is published on.
    #[arg(long, env = "STACKUP_ROLLUP_NODE_PORT", default_value_t = 9545)]
    pub rollup_node_port: u16,
}

impl Cli {
    /// Base-config overrides implied by the flags, as `KEY=VALUE` pairs.
    pub fn store_overrides(&self) -> Vec<(&'static str, String)> {
        let mut overrides = Vec::new();
        if let Some(engine) = self.proof_engine {
            overrides.push((keys::PROOF_ENGINE, engine.to_string()));
        }
        if self.skip_launch {
            overrides.push((keys::SKIP_LAUNCH, "1".to_string()));
        }
        overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_engine_parses_kebab_case() {
        use std::str::FromStr;
        assert_eq!(ProofEngine::from_str("fault").unwrap(), ProofEngine::Fault);
        assert_eq!(
            ProofEngine::from_str("validity").unwrap(),
            ProofEngine::Validity
        );
        assert!(ProofEngine::from_str("optimistic").is_err());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["stackup"]);
        assert_eq!(cli.workdir, PathBuf::from("./devnet"));
        assert_eq!(cli.poll_max_attempts, 30);
        assert!(!cli.dry_run);
        assert!(cli.store_overrides().is_empty());
    }

    #[test]
    fn test_flag_overrides_reach_the_store() {
        let cli = Cli::parse_from(["stackup", "--proof-engine", "fault", "--skip-launch"]);
        assert_eq!(
            cli.store_overrides(),
            vec![
                (keys::PROOF_ENGINE, "fault".to_string()),
                (keys::SKIP_LAUNCH, "1".to_string()),
            ]
        );
    }
}
