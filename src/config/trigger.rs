//! Recurring triggers.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use tracing::debug;

use super::{ConfigError, ConfigResult};

/// Work run on every tick.
pub type Job = Arc<dyn Fn() + Send + Sync>;

/// An armed recurring trigger.
pub trait Trigger: Send + fmt::Debug {
    fn period(&self) -> Duration;

    /// Stops future ticks and waits for an in-flight tick to finish.
    fn close(self: Box<Self>) -> ConfigResult<()>;
}

/// Arms triggers. The reload scheduler re-arms through this whenever its
/// period changes.
pub trait TriggerFactory: Send + Sync + fmt::Debug {
    fn arm(&self, period: Duration, job: Job) -> ConfigResult<Box<dyn Trigger>>;
}

/// Runs each trigger on a dedicated thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTriggerFactory;

impl TriggerFactory for ThreadTriggerFactory {
    fn arm(&self, period: Duration, job: Job) -> ConfigResult<Box<dyn Trigger>> {
        if period.is_zero() {
            return Err(ConfigError::Trigger("period must be positive".to_string()));
        }

        let (stop, stopped) = channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("dragon-config-reload".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => job(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| ConfigError::Trigger(format!("failed to spawn trigger thread: {e}")))?;

        debug!(?period, "trigger armed");
        Ok(Box::new(ThreadTrigger {
            period,
            stop: Some(stop),
            handle: Some(handle),
        }))
    }
}

pub struct ThreadTrigger {
    period: Duration,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for ThreadTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadTrigger")
            .field("period", &self.period)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl Trigger for ThreadTrigger {
    fn period(&self) -> Duration {
        self.period
    }

    fn close(mut self: Box<Self>) -> ConfigResult<()> {
        // Dropping the sender disconnects the channel and ends the loop.
        self.stop.take();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle
            .join()
            .map_err(|_| ConfigError::Trigger("trigger thread panicked".to_string()))?;
        debug!(period = ?self.period, "trigger closed");
        Ok(())
    }
}

impl Drop for ThreadTrigger {
    fn drop(&mut self) {
        self.stop.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_thread_trigger_ticks_until_closed() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let trigger = ThreadTriggerFactory
            .arm(
                Duration::from_millis(5),
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert_eq!(trigger.period(), Duration::from_millis(5));
        thread::sleep(Duration::from_millis(60));
        trigger.close().unwrap();

        let after_close = ticks.load(Ordering::SeqCst);
        assert!(after_close > 0);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_close);
    }

    #[test]
    fn test_zero_period_rejected() {
        let result = ThreadTriggerFactory.arm(Duration::ZERO, Arc::new(|| {}));

        assert!(matches!(result, Err(ConfigError::Trigger(_))));
    }
}
