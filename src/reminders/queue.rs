use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::reminders::ReminderService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderJob {
    /// Remind every registration of events entering the window.
    ScanUpcoming,
    /// Check one freshly created registration.
    NewRegistration(Uuid),
}

#[derive(Debug)]
pub struct QueuedJob {
    pub task_id: Uuid,
    pub job: ReminderJob,
}

/// Sending half of the reminder task queue. Cheap to clone.
#[derive(Clone)]
pub struct ReminderQueue {
    sender: mpsc::Sender<QueuedJob>,
}

impl ReminderQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<QueuedJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queues a job without waiting and returns its task id.
    pub fn enqueue(&self, job: ReminderJob) -> Result<Uuid, AppError> {
        let task_id = Uuid::new_v4();
        match self.sender.try_send(QueuedJob { task_id, job }) {
            Ok(()) => {
                debug!("Queued reminder task {}", task_id);
                Ok(task_id)
            }
            Err(TrySendError::Full(queued)) => Err(AppError::InternalError(format!(
                "Reminder queue is full, dropped {:?}",
                queued.job
            ))),
            Err(TrySendError::Closed(_)) => Err(AppError::InternalError(
                "Reminder worker is not running".to_string(),
            )),
        }
    }
}

/// Drains the queue one job at a time.
pub struct ReminderWorker {
    service: ReminderService,
    receiver: mpsc::Receiver<QueuedJob>,
}

impl ReminderWorker {
    pub fn new(service: ReminderService, receiver: mpsc::Receiver<QueuedJob>) -> Self {
        Self { service, receiver }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("Reminder worker started");
        while let Some(queued) = self.receiver.recv().await {
            self.process(queued).await;
        }
        info!("Reminder worker stopped");
    }

    async fn process(&self, queued: QueuedJob) {
        let QueuedJob { task_id, job } = queued;
        let now = Utc::now();

        match job {
            ReminderJob::ScanUpcoming => match self.service.send_due_reminders(now).await {
                Ok(report) => info!(
                    "Task {}: scheduled {} reminder emails for {} events",
                    task_id, report.sent, report.events
                ),
                Err(e) => error!("Task {}: reminder scan failed: {}", task_id, e),
            },
            ReminderJob::NewRegistration(registration_id) => {
                match self.service.remind_registration(registration_id, now).await {
                    Ok(delivery) => info!(
                        "Task {}: registration {} reminder check: {:?}",
                        task_id, registration_id, delivery
                    ),
                    Err(e) => error!(
                        "Task {}: reminder check for registration {} failed: {}",
                        task_id, registration_id, e
                    ),
                }
            }
        }
    }
}

/// Enqueues a scan immediately and then every `interval`.
pub fn spawn_scheduler(queue: ReminderQueue, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Reminder scheduler running every {:?}", interval);

        loop {
            ticker.tick().await;
            if let Err(e) = queue.enqueue(ReminderJob::ScanUpcoming) {
                warn!("Could not queue reminder scan: {}", e);
            }
        }
    })
}
