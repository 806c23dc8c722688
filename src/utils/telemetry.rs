//! Operator alerts (Discord / Telegram) delivered off the cycle's execution context.
//!
//! `emit*` never blocks: events go through a bounded queue to a worker thread and
//! are dropped when the queue is full or no webhook is configured. A critical
//! alert of the same kind is sent at most once per cooldown window, since a
//! failing swap repeats on every tick.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const DEFAULT_QUEUE_CAPACITY: usize = 256;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CRITICAL_COOLDOWN_MS: u64 = 300_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TelemetryLevel {
    Info,
    Success,
    Critical,
}

impl TelemetryLevel {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "success" => Some(Self::Success),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Success => "SUCCESS",
            Self::Critical => "CRITICAL",
        }
    }

    /// Discord embed colour.
    fn colour(self) -> u32 {
        match self {
            Self::Info => 0x5865F2,
            Self::Success => 0x57F287,
            Self::Critical => 0xED4245,
        }
    }
}

#[derive(Clone, Debug)]
struct Alert {
    ts_ms: u64,
    level: TelemetryLevel,
    kind: String,
    message: String,
    details: Option<Value>,
}

#[derive(Clone, Debug)]
struct Channels {
    discord_webhook_url: Option<String>,
    telegram_bot_token: Option<String>,
    telegram_chat_id: Option<String>,
    timeout_ms: u64,
}

impl Channels {
    fn from_env() -> Self {
        Self {
            discord_webhook_url: non_empty_env("DISCORD_WEBHOOK_URL"),
            telegram_bot_token: non_empty_env("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: non_empty_env("TELEGRAM_CHAT_ID"),
            timeout_ms: env_u64("TELEMETRY_HTTP_TIMEOUT_MS")
                .map(|v| v.clamp(250, 15_000))
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_MS),
        }
    }

    fn telegram(&self) -> Option<(&str, &str)> {
        match (self.telegram_bot_token.as_deref(), self.telegram_chat_id.as_deref()) {
            (Some(token), Some(chat)) => Some((token, chat)),
            _ => None,
        }
    }

    fn enabled(&self) -> bool {
        self.discord_webhook_url.is_some() || self.telegram().is_some()
    }
}

struct Telemetry {
    sender: SyncSender<Alert>,
    min_level: TelemetryLevel,
    cooldown_ms: u64,
    last_critical: Mutex<HashMap<String, u64>>,
}

static TELEMETRY: OnceLock<Telemetry> = OnceLock::new();
static INIT_GUARD: Mutex<()> = Mutex::new(());
static DROPPED: AtomicU64 = AtomicU64::new(0);
static SUPPRESSED: AtomicU64 = AtomicU64::new(0);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    non_empty_env(key).and_then(|raw| raw.parse::<u64>().ok())
}

fn plain_text(alert: &Alert) -> String {
    let mut text = format!("[{}] {}: {}", alert.level.label(), alert.kind, alert.message);
    if let Some(details) = &alert.details {
        text.push_str(" | ");
        text.push_str(&details.to_string());
    }
    text
}

fn discord_payload(alert: &Alert) -> Value {
    let fields: Vec<Value> = match &alert.details {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                serde_json::json!({ "name": name, "value": value, "inline": true })
            })
            .collect(),
        _ => Vec::new(),
    };
    serde_json::json!({
        "embeds": [{
            "title": format!("{} · {}", alert.level.label(), alert.kind),
            "description": alert.message,
            "color": alert.level.colour(),
            "fields": fields,
            "footer": { "text": format!("ts_ms={}", alert.ts_ms) },
        }]
    })
}

fn spawn_worker(channels: Channels, capacity: usize) -> SyncSender<Alert> {
    let (tx, rx) = sync_channel::<Alert>(capacity);
    std::thread::spawn(move || {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(channels.timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        while let Ok(alert) = rx.recv() {
            if let Some(url) = channels.discord_webhook_url.as_deref() {
                let _ = client.post(url).json(&discord_payload(&alert)).send();
            }
            if let Some((token, chat_id)) = channels.telegram() {
                let url = format!("https://api.telegram.org/bot{token}/sendMessage");
                let payload = serde_json::json!({
                    "chat_id": chat_id,
                    "text": plain_text(&alert),
                    "disable_web_page_preview": true,
                });
                let _ = client.post(url).json(&payload).send();
            }
        }
    });
    tx
}

/// Starts the delivery worker when at least one channel is configured. Idempotent.
pub fn init_telemetry() {
    if TELEMETRY.get().is_some() {
        return;
    }
    let _guard = match INIT_GUARD.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    };
    if TELEMETRY.get().is_some() {
        return;
    }
    let channels = Channels::from_env();
    if !channels.enabled() {
        tracing::debug!("[TELEMETRY] No alert channel configured; alerts disabled.");
        return;
    }
    let capacity = env_u64("TELEMETRY_QUEUE_CAPACITY")
        .map(|v| (v as usize).clamp(16, 4_096))
        .unwrap_or(DEFAULT_QUEUE_CAPACITY);
    let telemetry = Telemetry {
        sender: spawn_worker(channels, capacity),
        min_level: non_empty_env("TELEMETRY_MIN_LEVEL")
            .and_then(|raw| TelemetryLevel::parse(&raw))
            .unwrap_or(TelemetryLevel::Info),
        cooldown_ms: env_u64("TELEMETRY_CRITICAL_COOLDOWN_MS")
            .unwrap_or(DEFAULT_CRITICAL_COOLDOWN_MS),
        last_critical: Mutex::new(HashMap::new()),
    };
    let _ = TELEMETRY.set(telemetry);
}

/// `true` when `kind` last fired less than `cooldown_ms` before `now`.
fn in_cooldown(last: &mut HashMap<String, u64>, kind: &str, now: u64, cooldown_ms: u64) -> bool {
    if let Some(prev) = last.get(kind) {
        if now.saturating_sub(*prev) < cooldown_ms {
            return true;
        }
    }
    last.insert(kind.to_string(), now);
    false
}

pub fn emit(level: TelemetryLevel, kind: impl Into<String>, message: impl Into<String>) {
    emit_with_details(level, kind, message, None);
}

pub fn emit_with_details(
    level: TelemetryLevel,
    kind: impl Into<String>,
    message: impl Into<String>,
    details: Option<Value>,
) {
    // Library callers (tests included) never start the worker implicitly.
    let Some(telemetry) = TELEMETRY.get() else {
        return;
    };
    if level < telemetry.min_level {
        return;
    }
    let kind = kind.into();
    let now = now_ms();
    if level == TelemetryLevel::Critical {
        let mut last = match telemetry.last_critical.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if in_cooldown(&mut last, &kind, now, telemetry.cooldown_ms) {
            SUPPRESSED.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }

    let alert = Alert {
        ts_ms: now,
        level,
        kind,
        message: message.into(),
        details,
    };
    match telemetry.sender.try_send(alert) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
            DROPPED.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub fn emit_critical(kind: impl Into<String>, message: impl Into<String>) {
    emit(TelemetryLevel::Critical, kind, message);
}

/// Alerts lost to a full queue or a dead worker.
pub fn dropped_alerts() -> u64 {
    DROPPED.load(Ordering::Relaxed)
}

/// Critical alerts swallowed by the cooldown.
pub fn suppressed_alerts() -> u64 {
    SUPPRESSED.load(Ordering::Relaxed)
}
