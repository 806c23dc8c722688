use crate::error::{LogicError, Result};
use crate::types::{Address, Amount};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CLAIM_API_URL: &str = "https://pumpportal.fun/api/trade-local";
pub const DEFAULT_SWAP_QUOTE_URL: &str = "https://api.jup.ag/swap/v1/quote";
pub const DEFAULT_SWAP_EXECUTE_URL: &str = "https://api.jup.ag/swap/v1/swap";
pub const DEFAULT_STATS_PATH: &str = "data/stats.json";
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";

pub struct Config {
    pub rpc_url: String,
    pub treasury: Address,
    pub gating_mint: Address,
    pub reward_mint: Address,
    pub holder_index_url: String,
    pub claim_api_url: String,
    pub swap_quote_url: String,
    pub swap_execute_url: String,
    pub swap_api_key: Option<String>,
    pub stats_path: PathBuf,
}

/// Tunables of the treasury cycle. Every field has a clamped env override.
#[derive(Debug, Clone)]
pub struct CycleParams {
    pub reserve_fraction: f64,
    pub min_trigger_amount: Amount,
    pub min_holding: Amount,
    /// Smallest leftover reward balance worth a distribution-only cycle.
    pub min_distribution_amount: Amount,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub slippage_bps: u16,
    pub snapshot_max_pages: usize,
    pub snapshot_page_limit: usize,
    pub activity_capacity: usize,
    pub claim_fee_ceiling_lamports: u64,
    pub claim_max_instructions: usize,
    pub claim_priority_fee: Amount,
    pub swap_priority_fee_lamports: u64,
    pub base_decimals: u8,
    pub gating_decimals: u8,
    pub reward_decimals: u8,
}

impl Default for CycleParams {
    fn default() -> Self {
        Self {
            reserve_fraction: 0.30,
            min_trigger_amount: 1.0,
            min_holding: 50_000.0,
            min_distribution_amount: 1.0,
            poll_interval: Duration::from_millis(15_000),
            batch_size: 7,
            batch_delay: Duration::from_millis(500),
            slippage_bps: 300,
            snapshot_max_pages: 20,
            snapshot_page_limit: 1_000,
            activity_capacity: 50,
            claim_fee_ceiling_lamports: 10_000_000,
            claim_max_instructions: 10,
            claim_priority_fee: 0.0001,
            swap_priority_fee_lamports: 100_000,
            base_decimals: 9,
            gating_decimals: 6,
            reward_decimals: 6,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse::<T>().ok())
}

fn env_f64(key: &str) -> Option<f64> {
    env_parse::<f64>(key).filter(|v| v.is_finite())
}

impl CycleParams {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reserve_fraction: env_f64("TREASURY_RESERVE")
                .map(|v| v.clamp(0.0, 1.0))
                .unwrap_or(defaults.reserve_fraction),
            min_trigger_amount: env_f64("MIN_TRIGGER_AMOUNT")
                .map(|v| v.max(0.0))
                .unwrap_or(defaults.min_trigger_amount),
            min_holding: env_f64("MIN_HOLDING")
                .map(|v| v.max(0.0))
                .unwrap_or(defaults.min_holding),
            min_distribution_amount: env_f64("MIN_DISTRIBUTION_AMOUNT")
                .map(|v| v.max(0.0))
                .unwrap_or(defaults.min_distribution_amount),
            poll_interval: env_parse::<u64>("POLL_INTERVAL_MS")
                .map(|v| Duration::from_millis(v.clamp(1_000, 600_000)))
                .unwrap_or(defaults.poll_interval),
            batch_size: env_parse::<usize>("AIRDROP_BATCH_SIZE")
                .map(|v| v.clamp(1, 20))
                .unwrap_or(defaults.batch_size),
            batch_delay: env_parse::<u64>("AIRDROP_BATCH_DELAY_MS")
                .map(|v| Duration::from_millis(v.min(10_000)))
                .unwrap_or(defaults.batch_delay),
            slippage_bps: env_parse::<u16>("SLIPPAGE_BPS")
                .map(|v| v.clamp(1, 5_000))
                .unwrap_or(defaults.slippage_bps),
            snapshot_max_pages: env_parse::<usize>("SNAPSHOT_MAX_PAGES")
                .map(|v| v.clamp(1, 500))
                .unwrap_or(defaults.snapshot_max_pages),
            snapshot_page_limit: env_parse::<usize>("SNAPSHOT_PAGE_LIMIT")
                .map(|v| v.clamp(1, 1_000))
                .unwrap_or(defaults.snapshot_page_limit),
            activity_capacity: env_parse::<usize>("ACTIVITY_CAPACITY")
                .map(|v| v.clamp(1, 1_000))
                .unwrap_or(defaults.activity_capacity),
            claim_fee_ceiling_lamports: env_parse::<u64>("CLAIM_FEE_CEILING_LAMPORTS")
                .unwrap_or(defaults.claim_fee_ceiling_lamports),
            claim_max_instructions: env_parse::<usize>("CLAIM_MAX_INSTRUCTIONS")
                .map(|v| v.clamp(1, 64))
                .unwrap_or(defaults.claim_max_instructions),
            claim_priority_fee: env_f64("CLAIM_PRIORITY_FEE")
                .map(|v| v.clamp(0.0, 0.01))
                .unwrap_or(defaults.claim_priority_fee),
            swap_priority_fee_lamports: env_parse::<u64>("SWAP_PRIORITY_FEE_LAMPORTS")
                .map(|v| v.min(10_000_000))
                .unwrap_or(defaults.swap_priority_fee_lamports),
            base_decimals: env_parse::<u8>("BASE_DECIMALS")
                .map(|v| v.min(18))
                .unwrap_or(defaults.base_decimals),
            gating_decimals: env_parse::<u8>("GATING_DECIMALS")
                .map(|v| v.min(18))
                .unwrap_or(defaults.gating_decimals),
            reward_decimals: env_parse::<u8>("REWARD_DECIMALS")
                .map(|v| v.min(18))
                .unwrap_or(defaults.reward_decimals),
        }
    }
}

fn validate_http_url(name: &str, raw: &str) -> Result<()> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        LogicError::InvalidConfig(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(LogicError::InvalidConfig(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))
        .into()),
    }
}

fn required_address(name: &str) -> Result<Address> {
    let raw = env::var(name)
        .map_err(|_| LogicError::MissingConfig(format!("{name} must be set")))?;
    Address::parse(&raw).ok_or_else(|| {
        LogicError::InvalidConfig(format!(
            "{name} must be a base58 account identifier, got `{}`",
            raw.trim()
        ))
        .into()
    })
}

fn optional_url(name: &str, default: &str) -> Result<String> {
    let url = env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string());
    validate_http_url(name, &url)?;
    Ok(url)
}

impl Config {
    pub fn load() -> Result<Self> {
        let submission_requested = env::var("TX_SUBMISSION_ENABLED")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if submission_requested {
            return Err(LogicError::InvalidConfig(
                "TX_SUBMISSION_ENABLED is not supported in this build. No signing gateway is linked; the treasury runs dry."
                    .to_string(),
            )
            .into());
        }

        let rpc_url = env::var("RPC_URL")
            .map_err(|_| LogicError::MissingConfig("RPC_URL must be set".to_string()))?;
        validate_http_url("RPC_URL", &rpc_url)?;

        let treasury = required_address("TREASURY_ADDRESS")?;
        let gating_mint = required_address("GATING_MINT")?;
        let reward_mint = required_address("REWARD_MINT")?;
        if gating_mint == reward_mint {
            return Err(LogicError::InvalidConfig(
                "GATING_MINT and REWARD_MINT must differ".to_string(),
            )
            .into());
        }

        // Holder snapshots are impossible without an index endpoint.
        let holder_index_url = match env::var("HOLDER_INDEX_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        {
            Some(url) => url,
            None => {
                let key = env::var("HELIUS_API_KEY")
                    .ok()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty() && v != "your_helius_api_key")
                    .ok_or_else(|| {
                        LogicError::MissingConfig(
                            "HOLDER_INDEX_URL or HELIUS_API_KEY must be set for holder snapshots"
                                .to_string(),
                        )
                    })?;
                format!("https://mainnet.helius-rpc.com/?api-key={key}")
            }
        };
        validate_http_url("HOLDER_INDEX_URL", &holder_index_url)?;

        Ok(Self {
            rpc_url,
            treasury,
            gating_mint,
            reward_mint,
            holder_index_url,
            claim_api_url: optional_url("CLAIM_API_URL", DEFAULT_CLAIM_API_URL)?,
            swap_quote_url: optional_url("SWAP_QUOTE_URL", DEFAULT_SWAP_QUOTE_URL)?,
            swap_execute_url: optional_url("SWAP_EXECUTE_URL", DEFAULT_SWAP_EXECUTE_URL)?,
            swap_api_key: env::var("SWAP_API_KEY")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            stats_path: env::var("STATS_PATH")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATS_PATH)),
        })
    }
}
