//! Periodic source reload whose period is itself a configuration value.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{error, info, warn};

use super::aggregate::Config;
use super::trigger::{Job, Trigger, TriggerFactory};
use super::{ConfigError, ConfigResult};

/// Boot flag enabling the scheduler.
pub const RELOAD_ENABLED_PATH: &str = "dragon.config.reload.enabled";

/// Reload period, as a duration (`"30s"`) or integer milliseconds.
pub const RELOAD_PERIOD_PATH: &str = "dragon.config.reload.period";

/// Observer owner used by the scheduler for its period path.
pub const SCHEDULER_OWNER: &str = "dragon.config.scheduler";

enum Command {
    Rearm(Duration),
    Shutdown,
}

/// Reloads every source on a recurring trigger.
///
/// The scheduler observes [`RELOAD_PERIOD_PATH`]. A new valid period is
/// handed to a control thread, which closes the current trigger and then
/// arms one at the new period. Closing waits for an in-flight tick, so no
/// tick at the old period lands after the swap. The observer never touches
/// the trigger itself, so a period change raised from inside a reload tick
/// cannot deadlock on the trigger it is running in.
///
/// Values that don't parse as a positive duration are ignored and the
/// current trigger keeps running. If arming fails after boot, the failure
/// is logged and a trigger is re-armed at the previous period.
#[derive(Debug)]
pub struct ReloadScheduler {
    config: Config,
    commands: Sender<Command>,
    control: Option<JoinHandle<ConfigResult<()>>>,
}

impl ReloadScheduler {
    /// Starts observing the period and arms the initial trigger.
    ///
    /// With no period configured, nothing is armed until one is set.
    /// Errors registering the observer or arming the initial trigger are
    /// returned.
    pub fn start(config: &Config, factory: Arc<dyn TriggerFactory>) -> ConfigResult<Self> {
        let registry = config.sources();
        let job: Job = Arc::new(move || {
            if let Err(err) = registry.reload() {
                warn!(error = %err, "scheduled config reload failed");
            }
        });

        // Observe first so a change racing the start is queued.
        let (commands, inbox) = channel::unbounded();
        let notify = commands.clone();
        config.add_observer(SCHEDULER_OWNER, RELOAD_PERIOD_PATH, move |_, new| {
            match new.coerce_duration() {
                Some(period) if !period.is_zero() => {
                    // The control thread only goes away on shutdown.
                    let _ = notify.send(Command::Rearm(period));
                }
                _ => warn!(value = %new, "ignoring invalid config reload period"),
            }
        })?;

        let period = config
            .get(RELOAD_PERIOD_PATH)
            .and_then(|v| v.coerce_duration());
        let trigger = match period {
            Some(period) => match factory.arm(period, job.clone()) {
                Ok(trigger) => {
                    info!(?period, "config reload scheduled");
                    Some(trigger)
                }
                Err(err) => {
                    config.remove_observer(SCHEDULER_OWNER, RELOAD_PERIOD_PATH);
                    return Err(err);
                }
            },
            None => {
                info!("no config reload period set, waiting for one");
                None
            }
        };

        let control = thread::Builder::new()
            .name("dragon-config-scheduler".to_string())
            .spawn(move || control_loop(inbox, factory, job, trigger));
        let control = match control {
            Ok(handle) => handle,
            Err(err) => {
                config.remove_observer(SCHEDULER_OWNER, RELOAD_PERIOD_PATH);
                return Err(ConfigError::Trigger(format!(
                    "failed to spawn scheduler thread: {err}"
                )));
            }
        };

        Ok(Self {
            config: config.clone(),
            commands,
            control: Some(control),
        })
    }

    pub fn is_running(&self) -> bool {
        self.control.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops observing the period, closes the active trigger and waits for
    /// the control thread.
    pub fn close(mut self) -> ConfigResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> ConfigResult<()> {
        let Some(control) = self.control.take() else {
            return Ok(());
        };
        self.config.remove_observer(SCHEDULER_OWNER, RELOAD_PERIOD_PATH);
        let _ = self.commands.send(Command::Shutdown);
        control
            .join()
            .map_err(|_| ConfigError::Trigger("scheduler thread panicked".to_string()))?
    }
}

impl Drop for ReloadScheduler {
    fn drop(&mut self) {
        if self.control.is_some() {
            let _ = self.shutdown();
        }
    }
}

fn control_loop(
    inbox: Receiver<Command>,
    factory: Arc<dyn TriggerFactory>,
    job: Job,
    mut trigger: Option<Box<dyn Trigger>>,
) -> ConfigResult<()> {
    for command in inbox.iter() {
        let period = match command {
            Command::Rearm(period) => period,
            Command::Shutdown => break,
        };
        if trigger.as_ref().is_some_and(|t| t.period() == period) {
            continue;
        }

        let previous = trigger.take().map(|old| {
            let previous = old.period();
            if let Err(err) = old.close() {
                warn!(error = %err, "failed to close previous reload trigger");
            }
            previous
        });

        match factory.arm(period, job.clone()) {
            Ok(armed) => {
                trigger = Some(armed);
                info!(?period, "config reload rescheduled");
            }
            Err(err) => {
                error!(error = %err, ?period, "failed to re-arm config reload");
                if let Some(previous) = previous {
                    match factory.arm(previous, job.clone()) {
                        Ok(armed) => {
                            trigger = Some(armed);
                            info!(period = ?previous, "config reload restored");
                        }
                        Err(err) => error!(
                            error = %err,
                            period = ?previous,
                            "failed to restore config reload, reload stopped"
                        ),
                    }
                }
            }
        }
    }

    match trigger {
        Some(trigger) => trigger.close(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::bag::Bag;
    use crate::config::driver::Drivers;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct FakeTrigger {
        period: Duration,
        closed: Arc<AtomicBool>,
    }

    impl Trigger for FakeTrigger {
        fn period(&self) -> Duration {
            self.period
        }

        fn close(self: Box<Self>) -> ConfigResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Records every arm and lets tests fire ticks by hand.
    #[derive(Default)]
    struct FakeFactory {
        armed: Mutex<Vec<(Duration, Arc<AtomicBool>)>>,
        jobs: Mutex<Vec<Job>>,
        fail: AtomicBool,
        refuse: Mutex<Option<Duration>>,
        events: Mutex<Option<Sender<Duration>>>,
    }

    impl std::fmt::Debug for FakeFactory {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FakeFactory").finish_non_exhaustive()
        }
    }

    impl FakeFactory {
        fn periods(&self) -> Vec<(Duration, bool)> {
            self.armed
                .lock()
                .iter()
                .map(|(p, closed)| (*p, closed.load(Ordering::SeqCst)))
                .collect()
        }
    }

    impl TriggerFactory for FakeFactory {
        fn arm(&self, period: Duration, job: Job) -> ConfigResult<Box<dyn Trigger>> {
            if self.fail.load(Ordering::SeqCst) || *self.refuse.lock() == Some(period) {
                if let Some(events) = self.events.lock().as_ref() {
                    let _ = events.send(Duration::ZERO);
                }
                return Err(ConfigError::Trigger("refused".to_string()));
            }
            let closed = Arc::new(AtomicBool::new(false));
            self.armed.lock().push((period, closed.clone()));
            self.jobs.lock().push(job);
            if let Some(events) = self.events.lock().as_ref() {
                let _ = events.send(period);
            }
            Ok(Box::new(FakeTrigger { period, closed }))
        }
    }

    fn config(period: Option<&str>) -> Config {
        let mut seed = Bag::new();
        if let Some(period) = period {
            seed.set(RELOAD_PERIOD_PATH, period).unwrap();
        }
        Config::new(seed, Drivers::default())
    }

    fn factory_with_events() -> (Arc<FakeFactory>, Receiver<Duration>) {
        let (tx, rx) = channel::unbounded();
        let factory = Arc::new(FakeFactory::default());
        *factory.events.lock() = Some(tx);
        (factory, rx)
    }

    #[test]
    fn test_start_arms_initial_period() {
        let config = config(Some("10ms"));
        let factory = Arc::new(FakeFactory::default());

        let scheduler = ReloadScheduler::start(&config, factory.clone()).unwrap();

        assert!(config.has_observer(SCHEDULER_OWNER, RELOAD_PERIOD_PATH));
        assert_eq!(factory.periods(), vec![(Duration::from_millis(10), false)]);

        scheduler.close().unwrap();

        assert_eq!(factory.periods(), vec![(Duration::from_millis(10), true)]);
        assert!(!config.has_observer(SCHEDULER_OWNER, RELOAD_PERIOD_PATH));
    }

    #[test]
    fn test_initial_arm_failure_is_returned() {
        let config = config(Some("10ms"));
        let factory = Arc::new(FakeFactory::default());
        factory.fail.store(true, Ordering::SeqCst);

        let result = ReloadScheduler::start(&config, factory);

        assert!(matches!(result, Err(ConfigError::Trigger(_))));
        assert!(!config.has_observer(SCHEDULER_OWNER, RELOAD_PERIOD_PATH));
    }

    #[test]
    fn test_observer_collision_is_returned() {
        let config = config(Some("10ms"));
        config
            .add_observer(SCHEDULER_OWNER, RELOAD_PERIOD_PATH, |_, _| {})
            .unwrap();
        let factory = Arc::new(FakeFactory::default());

        let result = ReloadScheduler::start(&config, factory.clone());

        assert!(matches!(
            result,
            Err(ConfigError::DuplicateConfigObserver { .. })
        ));
        assert!(factory.periods().is_empty());
    }

    #[test]
    fn test_period_change_rearms() {
        let config = config(Some("10ms"));
        let (factory, events) = factory_with_events();
        let scheduler = ReloadScheduler::start(&config, factory.clone()).unwrap();
        assert_eq!(events.recv().unwrap(), Duration::from_millis(10));

        config.set(RELOAD_PERIOD_PATH, "20ms").unwrap();

        assert_eq!(
            events.recv_timeout(Duration::from_secs(2)).unwrap(),
            Duration::from_millis(20)
        );
        scheduler.close().unwrap();
        assert_eq!(
            factory.periods(),
            vec![
                (Duration::from_millis(10), true),
                (Duration::from_millis(20), true)
            ]
        );
    }

    #[test]
    fn test_invalid_period_ignored() {
        let config = config(Some("10ms"));
        let (factory, events) = factory_with_events();
        let scheduler = ReloadScheduler::start(&config, factory.clone()).unwrap();
        events.recv().unwrap();

        config.set(RELOAD_PERIOD_PATH, "whenever").unwrap();
        config.set(RELOAD_PERIOD_PATH, "0s").unwrap();
        config.set(RELOAD_PERIOD_PATH, "30ms").unwrap();

        // The first arm after the invalid values is the valid one.
        assert_eq!(
            events.recv_timeout(Duration::from_secs(2)).unwrap(),
            Duration::from_millis(30)
        );
        scheduler.close().unwrap();
        assert_eq!(factory.periods().len(), 2);
    }

    #[test]
    fn test_rearm_failure_restores_previous_period() {
        let config = config(Some("10ms"));
        let (factory, events) = factory_with_events();
        let scheduler = ReloadScheduler::start(&config, factory.clone()).unwrap();
        events.recv().unwrap();

        *factory.refuse.lock() = Some(Duration::from_millis(20));
        config.set(RELOAD_PERIOD_PATH, "20ms").unwrap();
        let timeout = Duration::from_secs(2);
        assert_eq!(events.recv_timeout(timeout).unwrap(), Duration::ZERO);
        assert_eq!(
            events.recv_timeout(timeout).unwrap(),
            Duration::from_millis(10)
        );

        assert_eq!(
            factory.periods(),
            vec![
                (Duration::from_millis(10), true),
                (Duration::from_millis(10), false)
            ]
        );
        assert!(scheduler.is_running());
        scheduler.close().unwrap();
    }

    #[test]
    fn test_old_trigger_closed_before_new_one_arms() {
        let config = config(Some("10ms"));
        let (factory, events) = factory_with_events();
        let scheduler = ReloadScheduler::start(&config, factory.clone()).unwrap();
        events.recv().unwrap();
        let first_closed = factory.armed.lock()[0].1.clone();

        config.set(RELOAD_PERIOD_PATH, "20ms").unwrap();
        events.recv_timeout(Duration::from_secs(2)).unwrap();

        // The arm event is sent from inside `arm`, after the old close.
        assert!(first_closed.load(Ordering::SeqCst));
        scheduler.close().unwrap();
    }

    #[test]
    fn test_no_period_waits_for_one() {
        let config = config(None);
        let (factory, events) = factory_with_events();
        let scheduler = ReloadScheduler::start(&config, factory.clone()).unwrap();
        assert!(factory.periods().is_empty());

        config.set(RELOAD_PERIOD_PATH, 15).unwrap();

        assert_eq!(
            events.recv_timeout(Duration::from_secs(2)).unwrap(),
            Duration::from_millis(15)
        );
        scheduler.close().unwrap();
    }

    #[test]
    fn test_tick_reloads_sources() {
        use crate::config::memory::MemorySource;

        let config = config(Some("10ms"));
        let factory = Arc::new(FakeFactory::default());
        let scheduler = ReloadScheduler::start(&config, factory.clone()).unwrap();
        let source = Arc::new(MemorySource::new(Bag::new()));
        config.sources().store("mem", source.clone()).unwrap();

        let mut staged = Bag::new();
        staged.set("level", 4).unwrap();
        source.stage(staged);
        let job = factory.jobs.lock()[0].clone();
        job();

        assert_eq!(config.get_int("level", 0), 4);
        scheduler.close().unwrap();
    }

    #[test]
    fn test_period_change_from_tick_does_not_deadlock() {
        use crate::config::memory::MemorySource;

        let config = config(Some("10ms"));
        let (factory, events) = factory_with_events();
        let scheduler = ReloadScheduler::start(&config, factory.clone()).unwrap();
        events.recv().unwrap();
        let source = Arc::new(MemorySource::new(Bag::new()));
        config
            .sources()
            .store_with_priority("mem", source.clone(), 10)
            .unwrap();

        let mut staged = Bag::new();
        staged.set(RELOAD_PERIOD_PATH, "25ms").unwrap();
        source.stage(staged);
        let job = factory.jobs.lock()[0].clone();
        job();

        assert_eq!(
            events.recv_timeout(Duration::from_secs(2)).unwrap(),
            Duration::from_millis(25)
        );
        scheduler.close().unwrap();
    }
}
