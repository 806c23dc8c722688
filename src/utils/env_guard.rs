use std::fs;
use std::path::Path;

fn write_env_template(file: &mut fs::File) -> std::io::Result<()> {
    use std::io::Write;
    writeln!(file, "# Airdrop treasury configuration")?;
    writeln!(file)?;
    writeln!(file, "RPC_URL=\"https://api.mainnet-beta.solana.com\"")?;
    writeln!(file, "TREASURY_ADDRESS=\"CHANGE_ME\"")?;
    writeln!(file, "GATING_MINT=\"CHANGE_ME\"")?;
    writeln!(file, "REWARD_MINT=\"XsDoVfqeBukxuZHWhdvWHBhgEHjGNst4MLodqsJHzoB\"")?;
    writeln!(file, "HELIUS_API_KEY=\"CHANGE_ME\"")?;
    writeln!(file)?;
    writeln!(file, "TREASURY_RESERVE=\"0.30\"")?;
    writeln!(file, "MIN_TRIGGER_AMOUNT=\"1.0\"")?;
    writeln!(file, "MIN_HOLDING=\"50000\"")?;
    writeln!(file, "STATS_PATH=\"data/stats.json\"")?;
    writeln!(file)?;
    writeln!(file, "RUST_LOG=\"info,airdrop_treasury=info\"")?;
    Ok(())
}

fn strip_quotes(value: &str) -> &str {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Parses `KEY=value` lines; comments, blanks and malformed lines are skipped.
fn parse_env_lines(content: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value_no_comment = value.split(" #").next().unwrap_or("").trim();
        out.push((key.to_string(), strip_quotes(value_no_comment).to_string()));
    }
    out
}

fn load_dot_env() {
    let path = Path::new(".env");
    if !path.exists() {
        return;
    }

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[ENV] Failed to read .env: {}", e);
            return;
        }
    };

    for (key, value) in parse_env_lines(&content) {
        if std::env::var_os(&key).is_some() {
            continue;
        }
        std::env::set_var(key, value);
    }
}

fn ensure_env_example_exists() {
    let env_example = Path::new(".env.example");
    if env_example.exists() {
        return;
    }
    if let Ok(mut file) = fs::File::create(env_example) {
        let _ = write_env_template(&mut file);
    }
}

pub fn harden_env_setup() {
    ensure_env_example_exists();
    load_dot_env();
    for key in ["RPC_URL", "TREASURY_ADDRESS", "GATING_MINT", "REWARD_MINT"] {
        if std::env::var(key).is_err() {
            eprintln!("[ENV] WARN: {key} is not set");
        }
    }
}
