//! Patch runs on a worker thread, supervised by the host.
//!
//! The host polls [`PatchJob::poll`] for progress text and learns the end of
//! the run from the channel closing. At most one job runs at a time through
//! a [`JobController`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::dictionary::Dictionary;
use crate::engine::{self, RunOptions, RunReport};
use crate::error::{Error, Result};
use crate::progress::{ChannelPoll, ProgressReceiver, progress_channel};

/// Chunks buffered before the worker blocks on a slow host
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPoll {
    /// A chunk of progress text
    Message(String),
    /// Still running, nothing new yet
    Pending,
    /// Worker returned and every message has been read
    Finished,
    /// Channel went away without the worker returning normally
    Disconnected,
}

/// A patch run on its own thread
#[derive(Debug)]
pub struct PatchJob {
    receiver: ProgressReceiver,
    cancel: Arc<CancelToken>,
    handle: Option<JoinHandle<Result<RunReport>>>,
    result: Option<Result<RunReport>>,
}

impl PatchJob {
    /// Start a run. The worker owns the dictionary for the duration.
    pub fn spawn(options: RunOptions, dictionary: Dictionary) -> Result<Self> {
        let (mut writer, receiver) = progress_channel(CHANNEL_CAPACITY);
        let cancel = Arc::new(CancelToken::new());
        let token = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name("exepatch-job".to_string())
            .spawn(move || engine::run(&options, &dictionary, &mut writer, &token))?;

        debug!("Patch job started");
        Ok(Self {
            receiver,
            cancel,
            handle: Some(handle),
            result: None,
        })
    }

    /// Non-blocking check for progress or completion
    pub fn poll(&mut self) -> JobPoll {
        if self.result.is_some() {
            return JobPoll::Finished;
        }
        let polled = self.receiver.poll();
        self.on_poll(polled)
    }

    /// Wait up to `timeout` for progress or completion. Returns as soon as
    /// text arrives or the worker ends, so a cancelled run is noticed at once.
    pub fn poll_timeout(&mut self, timeout: Duration) -> JobPoll {
        if self.result.is_some() {
            return JobPoll::Finished;
        }
        let polled = self.receiver.poll_timeout(timeout);
        self.on_poll(polled)
    }

    fn on_poll(&mut self, polled: ChannelPoll) -> JobPoll {
        match polled {
            ChannelPoll::Message(text) => JobPoll::Message(text),
            ChannelPoll::Empty => JobPoll::Pending,
            ChannelPoll::Closed => self.join(),
        }
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> Arc<CancelToken> {
        Arc::clone(&self.cancel)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Block until the run ends, forwarding progress text to `on_message`
    pub fn wait_with<F: FnMut(&str)>(mut self, mut on_message: F) -> Result<RunReport> {
        if self.result.is_none() {
            while let Some(text) = self.receiver.recv() {
                on_message(&text);
            }
            self.join();
        }
        self.take_result()
    }

    /// Block until the run ends, discarding progress text
    pub fn wait(self) -> Result<RunReport> {
        self.wait_with(|_| {})
    }

    /// Result of a finished run, once. Errors with `JobPanicked` if the run
    /// has not been joined yet or the result was already taken.
    pub fn take_result(&mut self) -> Result<RunReport> {
        self.result.take().unwrap_or(Err(Error::JobPanicked))
    }

    fn join(&mut self) -> JobPoll {
        let Some(handle) = self.handle.take() else {
            return JobPoll::Finished;
        };
        match handle.join() {
            Ok(result) => {
                self.result = Some(result);
                JobPoll::Finished
            }
            Err(_) => {
                warn!("Patch job panicked");
                self.result = Some(Err(Error::JobPanicked));
                JobPoll::Disconnected
            }
        }
    }
}

impl Drop for PatchJob {
    fn drop(&mut self) {
        if self.is_running() {
            self.cancel();
        }
    }
}

/// Allows a single patch job at a time
#[derive(Debug, Default)]
pub struct JobController {
    current: Option<PatchJob>,
}

impl JobController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a job unless one is still running. A finished job left in the
    /// controller is discarded.
    pub fn start(&mut self, options: RunOptions, dictionary: Dictionary) -> Result<&mut PatchJob> {
        if self.current.as_ref().is_some_and(PatchJob::is_running) {
            return Err(Error::JobAlreadyRunning);
        }
        Ok(self.current.insert(PatchJob::spawn(options, dictionary)?))
    }

    pub fn current(&mut self) -> Option<&mut PatchJob> {
        self.current.as_mut()
    }

    pub fn is_busy(&self) -> bool {
        self.current.as_ref().is_some_and(PatchJob::is_running)
    }

    /// Remove the current job, finished or not
    pub fn take(&mut self) -> Option<PatchJob> {
        self.current.take()
    }

    pub fn cancel(&self) {
        if let Some(job) = &self.current {
            job.cancel();
        }
    }
}
