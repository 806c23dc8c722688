#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeArgs {
    /// Print the resolved configuration and exit.
    pub explain_config: bool,
    /// Run a single tick and exit.
    pub run_once: bool,
}

fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_flag(key: &str) -> anyhow::Result<bool> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_bool_flag(&raw).ok_or_else(|| {
            anyhow::anyhow!("invalid {key} '{}': expected true/false", raw.trim())
        }),
        _ => Ok(false),
    }
}

fn parse_runtime_args_from_iter<I, S>(args: I) -> anyhow::Result<RuntimeArgs>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let supplied_args = args
        .into_iter()
        .map(|arg| arg.as_ref().to_string())
        .collect::<Vec<_>>();
    if !supplied_args.is_empty() {
        let joined = supplied_args.join(" ");
        return Err(anyhow::anyhow!(
            "CLI arguments are disabled in this build. Configure .env keys instead (TREASURY_EXPLAIN_CONFIG, TREASURY_RUN_ONCE). Received args: {}",
            joined
        ));
    }

    Ok(RuntimeArgs {
        explain_config: env_flag("TREASURY_EXPLAIN_CONFIG")?,
        run_once: env_flag("TREASURY_RUN_ONCE")?,
    })
}

pub fn parse_runtime_args() -> anyhow::Result<RuntimeArgs> {
    parse_runtime_args_from_iter(std::env::args().skip(1))
}

#[cfg(test)]
mod tests {
    use super::{parse_runtime_args_from_iter, RuntimeArgs};
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_runtime_env() {
        for key in ["TREASURY_EXPLAIN_CONFIG", "TREASURY_RUN_ONCE"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn runtime_args_default_to_looping() {
        let _guard = env_lock().lock().expect("env lock");
        clear_runtime_env();
        let parsed =
            parse_runtime_args_from_iter(Vec::<&str>::new()).expect("parse should succeed");
        assert_eq!(parsed, RuntimeArgs::default());
    }

    #[test]
    fn runtime_args_parse_flags_from_env() {
        let _guard = env_lock().lock().expect("env lock");
        clear_runtime_env();
        std::env::set_var("TREASURY_EXPLAIN_CONFIG", "yes");
        std::env::set_var("TREASURY_RUN_ONCE", "1");
        let parsed =
            parse_runtime_args_from_iter(Vec::<&str>::new()).expect("parse should succeed");
        assert!(parsed.explain_config);
        assert!(parsed.run_once);
        clear_runtime_env();
    }

    #[test]
    fn runtime_args_reject_garbage_flag() {
        let _guard = env_lock().lock().expect("env lock");
        clear_runtime_env();
        std::env::set_var("TREASURY_RUN_ONCE", "sometimes");
        let err = parse_runtime_args_from_iter(Vec::<&str>::new()).expect_err("parse should fail");
        assert!(
            err.to_string().contains("invalid TREASURY_RUN_ONCE"),
            "unexpected error message: {err}"
        );
        clear_runtime_env();
    }

    #[test]
    fn runtime_args_reject_cli_flags() {
        let _guard = env_lock().lock().expect("env lock");
        clear_runtime_env();
        let err = parse_runtime_args_from_iter(vec!["--once"]).expect_err("parse should fail");
        assert!(
            err.to_string().contains("CLI arguments are disabled"),
            "unexpected error message: {}",
            err
        );
    }
}
