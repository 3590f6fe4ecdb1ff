use std::{
    sync::{
        Arc,
        mpsc::{self, Sender},
    },
    thread::JoinHandle,
};

use thiserror::Error;
use tracing::{info, warn};

use crate::model::UserId;

#[derive(Debug, Error)]
#[error("Failed to notify user {user}: {reason}")]
pub struct NotifyError {
    pub user: UserId,
    pub reason: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, user: UserId, message: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, user: UserId, message: &str) -> Result<(), NotifyError> {
        info!(user, message, "Push notification");
        Ok(())
    }
}

struct Notification {
    user: UserId,
    message: String,
}

/// Hands notifications to a background worker so delivery never blocks or fails the caller.
///
/// Dropping the dispatcher delivers whatever is still queued and joins the worker.
pub struct Dispatcher {
    sender: Option<Sender<Notification>>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(notifier: Arc<dyn Notifier>) -> Self {
        let (sender, receiver) = mpsc::channel::<Notification>();
        let worker = std::thread::Builder::new()
            .name("notifier".to_string())
            .spawn(move || {
                for notification in receiver {
                    if let Err(err) = notifier.notify(notification.user, &notification.message) {
                        warn!(user = notification.user, error = %err, "Notification dropped");
                    }
                }
            });
        match worker {
            Ok(worker) => Self {
                sender: Some(sender),
                worker: Some(worker),
            },
            Err(err) => {
                warn!(error = %err, "Failed to start notifier thread, notifications disabled");
                Self {
                    sender: None,
                    worker: None,
                }
            }
        }
    }

    pub fn notify(&self, user: UserId, message: impl Into<String>) {
        let Some(sender) = &self.sender else {
            return;
        };
        let notification = Notification {
            user,
            message: message.into(),
        };
        if sender.send(notification).is_err() {
            warn!(user, "Notifier worker is gone, notification dropped");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Notifier worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(UserId, String)>>,
    }

    impl Notifier for Recording {
        fn notify(&self, user: UserId, message: &str) -> Result<(), NotifyError> {
            if user == 0 {
                return Err(NotifyError {
                    user,
                    reason: "no device".to_string(),
                });
            }
            self.seen.lock().push((user, message.to_string()));
            Ok(())
        }
    }

    #[test]
    fn delivers_in_order_and_skips_failures() {
        let notifier = Arc::new(Recording::default());
        let dispatcher = Dispatcher::spawn(notifier.clone());
        dispatcher.notify(1, "first");
        dispatcher.notify(0, "lost");
        dispatcher.notify(2, "second");
        drop(dispatcher);

        assert_eq!(
            *notifier.seen.lock(),
            vec![(1, "first".to_string()), (2, "second".to_string())]
        );
    }
}
