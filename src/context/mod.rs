//! Application context owning the configuration and its reload scheduler.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{
    Config, ConfigBuilder, ConfigError, ReloadScheduler, SourceRegistry, ThreadTriggerFactory,
    TriggerFactory, RELOAD_ENABLED_PATH,
};
use crate::Error;

/// Central application context holding the live configuration.
///
/// Building the context materializes every declared source, so a broken
/// declaration fails at boot instead of on first use. When
/// `dragon.config.reload.enabled` is set, a [`ReloadScheduler`] runs until
/// [`close`](Self::close).
///
/// ## Example
///
/// ```no_run
/// use dragon_config::{AppContext, Config};
///
/// let ctx = AppContext::builder()
///     .with_config(
///         Config::builder()
///             .with_file("main", "config.toml", true)
///             .with_env("env", "MYAPP", "__")
///     )
///     .build()?;
///
/// let port = ctx.config().get_int("server.port", 8080);
/// ctx.close()?;
/// # Ok::<(), dragon_config::Error>(())
/// ```
#[derive(Debug)]
pub struct AppContext {
    config: Config,
    scheduler: Mutex<Option<ReloadScheduler>>,
}

impl AppContext {
    /// Creates a new builder for constructing an `AppContext`.
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::default()
    }

    /// Returns the configuration aggregate.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sources(&self) -> SourceRegistry {
        self.config.sources()
    }

    /// Whether periodic reload is active.
    pub fn is_reloading(&self) -> bool {
        self.scheduler
            .lock()
            .as_ref()
            .is_some_and(ReloadScheduler::is_running)
    }

    /// Stops the scheduler, then closes every stored source.
    ///
    /// Every step runs even if an earlier one fails; the first failure is
    /// returned.
    pub fn close(&self) -> Result<(), Error> {
        let mut first: Option<Error> = None;

        if let Some(scheduler) = self.scheduler.lock().take() {
            if let Err(err) = scheduler.close() {
                warn!(error = %err, "failed to stop reload scheduler");
                first.get_or_insert(err.into());
            }
        }
        if let Err(err) = self.config.close() {
            first.get_or_insert(err.into());
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Builder for constructing an [`AppContext`].
#[derive(Debug)]
#[must_use = "builders do nothing until .build() is called"]
pub struct AppContextBuilder {
    config: Option<Result<Config, ConfigError>>,
    triggers: Arc<dyn TriggerFactory>,
}

impl Default for AppContextBuilder {
    fn default() -> Self {
        Self {
            config: None,
            triggers: Arc::new(ThreadTriggerFactory),
        }
    }
}

/// Anything that yields a configuration aggregate.
pub trait IntoConfig {
    fn into_config(self) -> Result<Config, ConfigError>;
}

impl IntoConfig for Config {
    fn into_config(self) -> Result<Config, ConfigError> {
        Ok(self)
    }
}

impl IntoConfig for ConfigBuilder {
    fn into_config(self) -> Result<Config, ConfigError> {
        self.build()
    }
}

impl AppContextBuilder {
    /// Attaches a configuration, either built or still a builder.
    pub fn with_config(mut self, config: impl IntoConfig) -> Self {
        self.config = Some(config.into_config());
        self
    }

    /// Replaces the trigger factory used by the reload scheduler.
    pub fn with_trigger_factory(mut self, triggers: impl TriggerFactory + 'static) -> Self {
        self.triggers = Arc::new(triggers);
        self
    }

    /// Builds the `AppContext`.
    ///
    /// Fails if no configuration was provided, if any declared source can't
    /// be created, or if the reload scheduler can't start.
    pub fn build(self) -> Result<AppContext, Error> {
        let config = self
            .config
            .ok_or(ConfigError::NilReference("configuration"))??;

        let sources = config.sources();
        for id in sources.available() {
            if let Err(source) = sources.get(&id) {
                abandon(&config);
                return Err(Error::Source { id, source });
            }
        }

        let scheduler = if config.get_bool(RELOAD_ENABLED_PATH, false) {
            match ReloadScheduler::start(&config, self.triggers) {
                Ok(scheduler) => Some(scheduler),
                Err(err) => {
                    abandon(&config);
                    return Err(err.into());
                }
            }
        } else {
            None
        };

        info!(
            sources = sources.stored().len(),
            reloading = scheduler.is_some(),
            "application context ready"
        );
        Ok(AppContext {
            config,
            scheduler: Mutex::new(scheduler),
        })
    }
}

/// Closes whatever a failed boot already opened.
fn abandon(config: &Config) {
    if let Err(err) = config.close() {
        warn!(error = %err, "failed to close config sources after failed boot");
    }
}
