//! Status publication: typed events, the broadcast sink, and the board that owns
//! the activity ring buffer and the latest treasury snapshot.
//!
//! Publishing is fire-and-forget. Observers attach by subscribing to a
//! [`BroadcastSink`]; a lagging subscriber loses the oldest events instead of
//! slowing the cycle down.

use crate::types::{Amount, TransferId};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

const DEFAULT_BROADCAST_CAPACITY: usize = 256;
static LAST_STATUS_NOW_MS: AtomicU64 = AtomicU64::new(1);

fn normalize_status_now_ms(sample_ms: Option<u64>) -> u64 {
    let mut prev = LAST_STATUS_NOW_MS.load(Ordering::Relaxed);
    loop {
        let normalized = sample_ms.unwrap_or(prev).max(prev).max(1);
        match LAST_STATUS_NOW_MS.compare_exchange_weak(
            prev,
            normalized,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return normalized,
            Err(actual) => prev = actual,
        }
    }
}

/// Wall-clock milliseconds, never moving backwards within the process.
pub fn now_ms() -> u64 {
    let sample = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64);
    normalize_status_now_ms(sample)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    #[default]
    Idle,
    Claiming,
    Swapping,
    Snapshotting,
    Verifying,
    Distributing,
    Celebrating,
    Error,
}

impl CycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Claiming => "claiming",
            Self::Swapping => "swapping",
            Self::Snapshotting => "snapshotting",
            Self::Verifying => "verifying",
            Self::Distributing => "distributing",
            Self::Celebrating => "celebrating",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Swap,
    Airdrop,
    Claim,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub timestamp: u64,
    pub kind: ActivityKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<TransferId>,
}

/// Bounded, newest-first log of activity events.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEvent>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: ActivityEvent) {
        self.entries.push_front(event);
        self.entries.truncate(self.capacity);
    }

    pub fn recent(&self) -> Vec<ActivityEvent> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Full status snapshot handed to observers.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreasuryStatus {
    pub state: CycleState,
    pub timestamp: u64,
    pub treasury_base: Amount,
    pub treasury_reward: Amount,
    pub last_airdrop_time: Option<u64>,
    pub last_airdrop_amount: Amount,
    pub last_airdrop_recipients: usize,
    pub total_claimed: Amount,
    pub total_swapped: Amount,
    pub total_airdrops: u64,
    pub total_distributed: Amount,
    pub reserve_amount: Amount,
    pub eligible_holders: usize,
    pub total_holders: usize,
    pub recent_activity: Vec<ActivityEvent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum StatusEvent {
    Status(Box<TreasuryStatus>),
    Treasury {
        sol: Amount,
        reward: Amount,
    },
    Holders {
        eligible: usize,
        total: usize,
    },
    Activity(ActivityEvent),
    #[serde(rename_all = "camelCase")]
    Airdrop {
        amount: Amount,
        recipients: usize,
        total_airdrops: u64,
        total_distributed: Amount,
    },
    #[serde(rename_all = "camelCase")]
    ClaimRecorded {
        amount: Amount,
        total_claimed: Amount,
        reserve_amount: Amount,
    },
    #[serde(rename_all = "camelCase")]
    SwapRecorded { amount: Amount, total_swapped: Amount },
}

impl StatusEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Treasury { .. } => "treasury",
            Self::Holders { .. } => "holders",
            Self::Activity(_) => "activity",
            Self::Airdrop { .. } => "airdrop",
            Self::ClaimRecorded { .. } => "claimRecorded",
            Self::SwapRecorded { .. } => "swapRecorded",
        }
    }
}

/// The only capability the cycle needs from observers.
pub trait StatusSink: Send + Sync {
    fn publish(&self, event: StatusEvent);
}

/// Fan-out to any number of subscribers over a bounded broadcast channel.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<StatusEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl StatusSink for BroadcastSink {
    fn publish(&self, event: StatusEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

/// Keeps every published event in memory. Used by tests and offline inspection.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn activities(&self) -> Vec<ActivityEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StatusEvent::Activity(activity) => Some(activity),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<CycleState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                StatusEvent::Status(status) => Some(status.state),
                _ => None,
            })
            .collect()
    }
}

impl StatusSink for RecordingSink {
    fn publish(&self, event: StatusEvent) {
        let mut guard = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(event);
    }
}

/// Owns the activity log and the status snapshot; every mutation publishes.
pub struct StatusBoard {
    sink: Arc<dyn StatusSink>,
    activity: ActivityLog,
    status: TreasuryStatus,
}

impl StatusBoard {
    pub fn new(sink: Arc<dyn StatusSink>, activity_capacity: usize) -> Self {
        Self {
            sink,
            activity: ActivityLog::new(activity_capacity),
            status: TreasuryStatus {
                timestamp: now_ms(),
                ..TreasuryStatus::default()
            },
        }
    }

    fn publish_status(&self) {
        let mut snapshot = self.status.clone();
        snapshot.recent_activity = self.activity.recent();
        self.sink.publish(StatusEvent::Status(Box::new(snapshot)));
    }

    pub fn set_state(&mut self, state: CycleState) {
        self.status.state = state;
        self.status.timestamp = now_ms();
        self.publish_status();
    }

    pub fn state(&self) -> CycleState {
        self.status.state
    }

    pub fn update_treasury(&mut self, base: Amount, reward: Amount) {
        self.status.treasury_base = base;
        self.status.treasury_reward = reward;
        self.sink.publish(StatusEvent::Treasury { sol: base, reward });
    }

    pub fn update_holders(&mut self, eligible: usize, total: usize) {
        self.status.eligible_holders = eligible;
        self.status.total_holders = total;
        self.sink.publish(StatusEvent::Holders { eligible, total });
    }

    /// Mirrors the ledger counters into the snapshot without publishing.
    pub fn sync_totals(
        &mut self,
        total_claimed: Amount,
        total_swapped: Amount,
        total_airdrops: u64,
        total_distributed: Amount,
        reserve_amount: Amount,
    ) {
        self.status.total_claimed = total_claimed;
        self.status.total_swapped = total_swapped;
        self.status.total_airdrops = total_airdrops;
        self.status.total_distributed = total_distributed;
        self.status.reserve_amount = reserve_amount;
    }

    pub fn record_claim(&mut self, amount: Amount, total_claimed: Amount, reserve_amount: Amount) {
        self.status.total_claimed = total_claimed;
        self.status.reserve_amount = reserve_amount;
        self.sink.publish(StatusEvent::ClaimRecorded {
            amount,
            total_claimed,
            reserve_amount,
        });
    }

    pub fn record_swap(&mut self, amount: Amount, total_swapped: Amount) {
        self.status.total_swapped = total_swapped;
        self.sink.publish(StatusEvent::SwapRecorded {
            amount,
            total_swapped,
        });
    }

    pub fn record_airdrop(
        &mut self,
        amount: Amount,
        recipients: usize,
        total_airdrops: u64,
        total_distributed: Amount,
    ) {
        self.status.last_airdrop_time = Some(now_ms());
        self.status.last_airdrop_amount = amount;
        self.status.last_airdrop_recipients = recipients;
        self.status.total_airdrops = total_airdrops;
        self.status.total_distributed = total_distributed;
        self.sink.publish(StatusEvent::Airdrop {
            amount,
            recipients,
            total_airdrops,
            total_distributed,
        });
    }

    pub fn activity(&mut self, kind: ActivityKind, message: impl Into<String>) {
        self.activity_with_transfer(kind, message, None);
    }

    pub fn activity_with_transfer(
        &mut self,
        kind: ActivityKind,
        message: impl Into<String>,
        transfer_id: Option<TransferId>,
    ) {
        let event = ActivityEvent {
            timestamp: now_ms(),
            kind,
            message: message.into(),
            transfer_id,
        };
        self.activity.push(event.clone());
        self.sink.publish(StatusEvent::Activity(event));
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.activity(ActivityKind::Info, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.activity(ActivityKind::Error, message);
    }

    pub fn snapshot(&self) -> TreasuryStatus {
        let mut snapshot = self.status.clone();
        snapshot.recent_activity = self.activity.recent();
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(message: &str) -> ActivityEvent {
        ActivityEvent {
            timestamp: 1,
            kind: ActivityKind::Info,
            message: message.to_string(),
            transfer_id: None,
        }
    }

    #[test]
    fn test_activity_log_keeps_most_recent_first() {
        let mut log = ActivityLog::new(3);
        for i in 0..5 {
            log.push(activity(&format!("event-{i}")));
        }
        let recent = log.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "event-4");
        assert_eq!(recent[2].message, "event-2");
    }

    #[test]
    fn test_status_event_wire_shape() {
        let event = StatusEvent::Airdrop {
            amount: 10.0,
            recipients: 2,
            total_airdrops: 3,
            total_distributed: 40.0,
        };
        let json = serde_json::to_value(&event).expect("serializes");
        assert_eq!(json["type"], "airdrop");
        assert_eq!(json["data"]["totalAirdrops"], 3);
        assert_eq!(json["data"]["totalDistributed"], 40.0);

        let activity = serde_json::to_value(StatusEvent::Activity(activity("hi"))).expect("ok");
        assert_eq!(activity["type"], "activity");
        assert_eq!(activity["data"]["kind"], "info");
        assert!(activity["data"].get("transferId").is_none());
    }

    #[test]
    fn test_broadcast_sink_never_blocks_without_subscribers() {
        let sink = BroadcastSink::new(2);
        for _ in 0..10 {
            sink.publish(StatusEvent::Holders {
                eligible: 1,
                total: 2,
            });
        }
        assert_eq!(sink.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_drops_oldest_events() {
        let sink = BroadcastSink::new(2);
        let mut rx = sink.subscribe();
        for total in 0..5 {
            sink.publish(StatusEvent::Holders { eligible: 0, total });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        match rx.recv().await {
            Ok(StatusEvent::Holders { total, .. }) => assert_eq!(total, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_board_publishes_state_changes_with_activity() {
        let sink = RecordingSink::new();
        let mut board = StatusBoard::new(Arc::new(sink.clone()), 10);
        board.info("starting");
        board.set_state(CycleState::Claiming);
        assert_eq!(sink.states(), vec![CycleState::Claiming]);
        let snapshot = board.snapshot();
        assert_eq!(snapshot.recent_activity.len(), 1);
        assert_eq!(board.state(), CycleState::Claiming);
    }

    #[test]
    fn test_default_status_is_idle() {
        let status = TreasuryStatus::default();
        assert_eq!(status.state, CycleState::Idle);
        let json = serde_json::to_value(&status).expect("serialize");
        assert_eq!(json["state"], "idle");
    }
}
