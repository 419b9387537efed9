//! Notification collaborator.
//!
//! `Notifier` is the narrow interface the refresh pipeline schedules through.
//! `LocalNotifier` is an in-process implementation: it keeps pending requests
//! as tokio timers and hands each delivered notification to the receiver
//! returned from [`LocalNotifier::new`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, NaiveTime};
use nimbus_core::{Classify, FailureClass};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const WEATHER_ALERT_CATEGORY: &str = "WEATHER_ALERT";
pub const DAILY_FORECAST_CATEGORY: &str = "DAILY_FORECAST";
pub const DAILY_FORECAST_REQUEST_ID: &str = "DAILY_MORNING_FORECAST";

pub type UserInfo = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("Notification delivery closed")]
    Closed,
}

impl Classify for NotifyError {
    fn class(&self) -> FailureClass {
        FailureClass::Collaborator
    }
}

/// A notification handed to the host for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub body: String,
    pub category: String,
    pub user_info: UserInfo,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// One-shot, non-repeating notification after `delay`. Returns its id.
    async fn schedule(
        &self,
        title: &str,
        body: &str,
        delay: Duration,
        category: &str,
        user_info: UserInfo,
    ) -> Result<String, NotifyError>;

    /// Recurring notification every day at `hour:minute` local time.
    ///
    /// Replaces any pending request with the same `request_id`.
    async fn schedule_daily(
        &self,
        title: &str,
        body: &str,
        hour: u32,
        minute: u32,
        request_id: &str,
    ) -> Result<(), NotifyError>;
}

/// Time from `now` until the next `hour:minute`, today or tomorrow.
pub fn delay_until_daily(
    now: NaiveDateTime,
    hour: u32,
    minute: u32,
) -> Result<Duration, NotifyError> {
    let at = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| NotifyError::InvalidTrigger(format!("{:02}:{:02}", hour, minute)))?;

    let today = now.date().and_time(at);
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };

    (next - now)
        .to_std()
        .map_err(|e| NotifyError::InvalidTrigger(e.to_string()))
}

#[derive(Clone)]
pub struct LocalNotifier {
    pending: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    tx: mpsc::UnboundedSender<Notification>,
}

impl LocalNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            tx,
        };
        (notifier, rx)
    }

    /// Ids of requests that have not fired yet (daily requests stay pending).
    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cancel a pending request. Returns whether one was found.
    pub fn cancel(&self, id: &str) -> bool {
        match self.pending.lock().remove(id) {
            Some(handle) => {
                handle.abort();
                tracing::debug!("Cancelled notification {}", id);
                true
            }
            None => false,
        }
    }

    /// Abort every pending request.
    pub fn cancel_all(&self) {
        for (_, handle) in self.pending.lock().drain() {
            handle.abort();
        }
    }

    fn ensure_open(&self) -> Result<(), NotifyError> {
        if self.tx.is_closed() {
            return Err(NotifyError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for LocalNotifier {
    async fn schedule(
        &self,
        title: &str,
        body: &str,
        delay: Duration,
        category: &str,
        user_info: UserInfo,
    ) -> Result<String, NotifyError> {
        self.ensure_open()?;

        let id = uuid::Uuid::new_v4().to_string();
        let notification = Notification {
            id: id.clone(),
            title: title.to_string(),
            body: body.to_string(),
            category: category.to_string(),
            user_info,
        };

        let tx = self.tx.clone();
        let pending = Arc::clone(&self.pending);
        let task_id = id.clone();

        // Hold the lock across spawn + insert so the task's removal cannot run first
        let mut guard = self.pending.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.lock().remove(&task_id);
            tracing::info!("Delivering notification {}: {}", task_id, notification.title);
            if tx.send(notification).is_err() {
                tracing::debug!("Notification receiver gone, {} dropped", task_id);
            }
        });
        guard.insert(id.clone(), handle);
        drop(guard);

        tracing::info!(
            "Scheduled {} notification {} in {}s",
            category,
            id,
            delay.as_secs()
        );
        Ok(id)
    }

    async fn schedule_daily(
        &self,
        title: &str,
        body: &str,
        hour: u32,
        minute: u32,
        request_id: &str,
    ) -> Result<(), NotifyError> {
        self.ensure_open()?;
        // Validate before replacing anything
        delay_until_daily(Local::now().naive_local(), hour, minute)?;

        let notification = Notification {
            id: request_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            category: DAILY_FORECAST_CATEGORY.to_string(),
            user_info: UserInfo::new(),
        };
        let tx = self.tx.clone();

        let handle = tokio::spawn(async move {
            loop {
                let delay = match delay_until_daily(Local::now().naive_local(), hour, minute) {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::error!("Daily notification stopped: {}", e);
                        return;
                    }
                };
                tokio::time::sleep(delay).await;
                tracing::info!("Delivering daily notification {}", notification.id);
                if tx.send(notification.clone()).is_err() {
                    return;
                }
            }
        });

        if let Some(previous) = self.pending.lock().insert(request_id.to_string(), handle) {
            previous.abort();
            tracing::debug!("Replaced pending daily notification {}", request_id);
        }

        tracing::info!(
            "Daily notification {} scheduled for {:02}:{:02}",
            request_id,
            hour,
            minute
        );
        Ok(())
    }
}
