use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::engine::Engine;
use crate::model::*;
use crate::notify::Notifier;
use crate::observability;

const REMINDER_TITLE: &str = "Consultation Reminder";
const REMINDER_BODY: &str = "Your consultation starts in about an hour";

/// What one reconciliation pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub reminders: usize,
    pub expired: usize,
    pub purged: usize,
    pub failures: usize,
}

/// Background task: reconcile bookings against the clock until `shutdown` fires.
pub async fn run_reconciler(
    engine: Arc<Engine>,
    notifier: Arc<dyn Notifier>,
    config: WorkerConfig,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("reconciler stopping");
                return;
            }
            _ = interval.tick() => {
                let report = tick(&engine, notifier.as_ref(), &config).await;
                if report != TickReport::default() {
                    info!(
                        "reconcile: {} reminders, {} expired, {} purged, {} failures",
                        report.reminders, report.expired, report.purged, report.failures
                    );
                }
            }
        }
    }
}

/// Run reminders, expiry and retention once. A failure on one booking is
/// logged and counted, and the pass moves on.
pub async fn tick(engine: &Engine, notifier: &dyn Notifier, config: &WorkerConfig) -> TickReport {
    let mut report = TickReport::default();
    send_reminders(engine, notifier, config, &mut report).await;
    expire_overdue(engine, &mut report).await;
    purge_old_notifications(engine, config, &mut report).await;
    notifier.maintain().await;
    report
}

fn failed(pass: &'static str, report: &mut TickReport) {
    report.failures += 1;
    metrics::counter!(observability::WORKER_FAILURES_TOTAL, "pass" => pass).increment(1);
}

async fn send_reminders(
    engine: &Engine,
    notifier: &dyn Notifier,
    config: &WorkerConfig,
    report: &mut TickReport,
) {
    let from = engine.now() + config.reminder_lead_ms;
    let due = engine.bookings_due_for_reminder(from, from + config.reminder_window_ms);

    for booking in due {
        match engine.claim_reminder(booking.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("reminder for booking {} already claimed", booking.id);
                continue;
            }
            Err(e) => {
                warn!("could not claim reminder for booking {}: {e}", booking.id);
                failed("reminders", report);
                continue;
            }
        }
        report.reminders += 1;
        metrics::counter!(observability::REMINDERS_SENT_TOTAL).increment(1);

        let mut recipients = vec![booking.user_id];
        match engine.get_expert(booking.expert_id) {
            Ok(expert) => recipients.push(expert.user_id),
            Err(e) => {
                warn!("no expert user to remind for booking {}: {e}", booking.id);
                failed("reminders", report);
            }
        }

        let deliveries = futures::future::join_all(
            recipients
                .iter()
                .map(|user| notifier.send(*user, REMINDER_TITLE, REMINDER_BODY)),
        )
        .await;
        for (user, delivered) in recipients.iter().zip(deliveries) {
            if let Err(e) = delivered {
                warn!("reminder for booking {} to user {user}: {e}", booking.id);
                failed("reminders", report);
            }
            if let Err(e) = engine
                .append_notification(*user, REMINDER_TITLE, REMINDER_BODY, NotificationKind::Reminder)
                .await
            {
                warn!("could not record reminder for user {user}: {e}");
                failed("reminders", report);
            }
        }
    }
}

async fn expire_overdue(engine: &Engine, report: &mut TickReport) {
    for booking in engine.overdue_pending_bookings() {
        match engine.expire_booking(booking.id).await {
            Ok(true) => {
                report.expired += 1;
                metrics::counter!(observability::BOOKINGS_EXPIRED_TOTAL).increment(1);
            }
            Ok(false) => debug!("booking {} no longer overdue", booking.id),
            Err(e) => {
                warn!("could not expire booking {}: {e}", booking.id);
                failed("expiry", report);
            }
        }
    }
}

async fn purge_old_notifications(engine: &Engine, config: &WorkerConfig, report: &mut TickReport) {
    let cutoff = engine.now() - config.notification_retention_ms;
    match engine.purge_notifications(cutoff).await {
        Ok(0) => {}
        Ok(n) => {
            report.purged = n;
            metrics::counter!(observability::NOTIFICATIONS_PURGED_TOTAL).increment(n as u64);
            info!("purged {n} notifications older than {cutoff}");
        }
        Err(e) => {
            warn!("notification purge failed: {e}");
            failed("retention", report);
        }
    }
}

/// Background task: compact the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {
                let appended = engine.wal_appends_since_compact().await;
                if appended < threshold {
                    continue;
                }
                match engine.compact_wal().await {
                    Ok(()) => info!("compacted WAL after {appended} appends"),
                    Err(e) => warn!("WAL compaction failed: {e}"),
                }
            }
        }
    }
}
