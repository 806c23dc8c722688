use crate::ledger::PersistedStats;
use crate::runtime::RuntimeArgs;
use crate::utils::config::{Config, CycleParams};

fn redact(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?<redacted>"),
        None => url.to_string(),
    }
}

/// Resolved configuration as `key=value` lines, secrets redacted.
pub fn explain_config_lines(config: &Config, params: &CycleParams) -> Vec<String> {
    vec![
        format!("rpc_url={}", redact(&config.rpc_url)),
        format!("treasury={}", config.treasury),
        format!("gating_mint={}", config.gating_mint),
        format!("reward_mint={}", config.reward_mint),
        format!("holder_index_url={}", redact(&config.holder_index_url)),
        format!("claim_api_url={}", config.claim_api_url),
        format!("swap_quote_url={}", config.swap_quote_url),
        format!("swap_execute_url={}", config.swap_execute_url),
        format!(
            "swap_api_key={}",
            if config.swap_api_key.is_some() { "<set>" } else { "<unset>" }
        ),
        format!("stats_path={}", config.stats_path.display()),
        format!("reserve_fraction={}", params.reserve_fraction),
        format!("min_trigger_amount={}", params.min_trigger_amount),
        format!("min_holding={}", params.min_holding),
        format!("min_distribution_amount={}", params.min_distribution_amount),
        format!("poll_interval_ms={}", params.poll_interval.as_millis()),
        format!("batch_size={}", params.batch_size),
        format!("batch_delay_ms={}", params.batch_delay.as_millis()),
        format!("slippage_bps={}", params.slippage_bps),
        format!(
            "snapshot=max_pages:{} page_limit:{}",
            params.snapshot_max_pages, params.snapshot_page_limit
        ),
        format!(
            "claim_filter=fee_ceiling_lamports:{} max_instructions:{}",
            params.claim_fee_ceiling_lamports, params.claim_max_instructions
        ),
        format!(
            "decimals=base:{} gating:{} reward:{}",
            params.base_decimals, params.gating_decimals, params.reward_decimals
        ),
        "submission=dry-run".to_string(),
    ]
}

pub fn emit_startup_status(
    runtime_args: &RuntimeArgs,
    config: &Config,
    params: &CycleParams,
    stats: &PersistedStats,
    reserve_amount: f64,
) {
    tracing::info!(
        "[OPS] Treasury {} gating={} reward={} mode={}",
        config.treasury.short(),
        config.gating_mint.short(),
        config.reward_mint.short(),
        if runtime_args.run_once { "run-once" } else { "loop" }
    );
    tracing::info!(
        "[OPS] Cycle: reserve={:.0}% trigger>={} min_holding={} batch={}x{}ms poll={}ms",
        params.reserve_fraction * 100.0,
        params.min_trigger_amount,
        params.min_holding,
        params.batch_size,
        params.batch_delay.as_millis(),
        params.poll_interval.as_millis()
    );
    tracing::info!(
        "[OPS] Ledger: claimed={:.4} swapped={:.4} airdrops={} distributed={:.2} reserve={:.4}",
        stats.total_claimed,
        stats.total_swapped,
        stats.total_airdrops,
        stats.total_distributed,
        reserve_amount
    );
    tracing::warn!(
        "[OPS] No signing gateway linked: claims, swaps and transfers run dry (read path only)."
    );
}
