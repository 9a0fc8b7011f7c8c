//! Message loop: a bounded queue feeding the update function, a timer
//! thread producing ticks, and effect execution.

use std::collections::VecDeque;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::app::{AppCore, Effect};
use crate::messages::AppMsg;

const QUEUE_CAPACITY: usize = 64;

/// Producer half of the message queue, handed to the UI layer and the
/// timer thread.
#[derive(Clone)]
pub struct QueueSender {
    tx: SyncSender<AppMsg>,
}

impl QueueSender {
    /// Blocking send for user events — these are never dropped.
    pub fn send_event(&self, msg: AppMsg) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Non-blocking send for timer ticks. When the queue is full the tick
    /// is dropped; the next one carries the same information.
    pub fn send_tick(&self) -> bool {
        match self.tx.try_send(AppMsg::Tick) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("queue full, dropping tick");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Owns the app core and drains the queue. Effects run on this thread after
/// each update step; messages they produce are processed before the next
/// external message.
pub struct Runtime {
    app: AppCore,
    rx: Receiver<AppMsg>,
    tx: SyncSender<AppMsg>,
}

impl Runtime {
    pub fn new(app: AppCore) -> Self {
        let (tx, rx) = sync_channel(QUEUE_CAPACITY);
        Self { app, rx, tx }
    }

    pub fn sender(&self) -> QueueSender {
        QueueSender {
            tx: self.tx.clone(),
        }
    }

    pub fn app(&self) -> &AppCore {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut AppCore {
        &mut self.app
    }

    /// Starts the metadata-tick timer.
    pub fn spawn_ticker(&self, interval: Duration) -> thread::JoinHandle<()> {
        let sender = self.sender();
        thread::spawn(move || loop {
            thread::sleep(interval);
            if matches!(
                sender.tx.try_send(AppMsg::Tick),
                Err(TrySendError::Disconnected(_))
            ) {
                break;
            }
        })
    }

    /// Applies one message and everything it cascades into.
    pub fn step(&mut self, msg: AppMsg) {
        let mut pending = VecDeque::new();
        pending.push_back(msg);
        while let Some(msg) = pending.pop_front() {
            for effect in self.app.update(msg) {
                match effect {
                    Effect::Dispatch(next) => pending.push_back(next),
                    Effect::PollMetadata => {
                        let result = self.app.poll_metadata();
                        pending.push_back(result);
                    }
                }
            }
        }
    }

    /// Runs until a `Quit` message arrives or every sender is gone.
    pub fn run(mut self) {
        while let Ok(msg) = self.rx.recv() {
            if matches!(msg, AppMsg::Quit) {
                break;
            }
            self.step(msg);
        }
    }
}
