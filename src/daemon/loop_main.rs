//! Service loop: delayed start, fixed scan interval, per-pass config reload.
//!
//! One thread drives everything. Each tick checks the shutdown flag, then asks
//! the [`PassSchedule`] whether a pass is due. A pass always runs to
//! completion; shutdown is honoured at the next tick boundary. The logger
//! thread is the only other thread.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::{Config, ServiceConfig};
use crate::core::errors::Result;
use crate::daemon::notifications::{NotificationEvent, NotificationManager};
use crate::daemon::orchestrator::{
    PassOptions, PassReport, PassTrigger, ThreadWaiter, Waiter, run_configured_pass,
};
use crate::daemon::signals::{SignalHandler, WatchdogHeartbeat, notify_ready};
use crate::library::build_host;
use crate::library::host::OfflineHost;
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle, DualLoggerConfig, spawn_logger};

// ──────────────────── schedule ────────────────────

/// Tick counter deciding when passes are due: once after the delayed start,
/// then every scan interval.
#[derive(Debug, Default, Clone)]
pub struct PassSchedule {
    ticks: u64,
    delayed_completed: bool,
}

impl PassSchedule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one tick. Thresholds are recomputed from `service` every time
    /// so interval changes apply without a restart.
    pub fn tick(&mut self, service: &ServiceConfig) -> Option<PassTrigger> {
        let due = if self.delayed_completed {
            (self.ticks >= ticks_for(service.scan_interval_minutes, service.tick_seconds))
                .then_some(PassTrigger::Interval)
        } else {
            (self.ticks >= ticks_for(service.delayed_start_minutes, service.tick_seconds))
                .then_some(PassTrigger::DelayedStart)
        };
        if due.is_some() {
            self.delayed_completed = true;
            self.ticks = 0;
        }
        self.ticks += 1;
        due
    }

    /// Restart the interval count, e.g. after a pass triggered by signal.
    pub fn reset_interval(&mut self) {
        self.delayed_completed = true;
        self.ticks = 1;
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn ticks_for(minutes: f64, tick_seconds: u64) -> u64 {
    let tick = tick_seconds.max(1) as f64;
    (minutes.max(0.0) * 60.0 / tick).ceil() as u64
}

// ──────────────────── daemon ────────────────────

/// Arguments for `mfc daemon`.
#[derive(Debug, Clone, Default)]
pub struct DaemonArgs {
    /// Explicit config file; `None` uses the default location.
    pub config_path: Option<PathBuf>,
    /// Run the first pass immediately instead of waiting for the delayed start.
    pub skip_delayed_start: bool,
}

pub struct CleanerDaemon {
    config: Config,
    config_path: Option<PathBuf>,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    signal_handler: SignalHandler,
    watchdog: WatchdogHeartbeat,
    schedule: PassSchedule,
    start_time: Instant,
    passes_run: u64,
}

impl CleanerDaemon {
    pub fn init(config: Config, args: &DaemonArgs) -> Result<Self> {
        let (logger_handle, logger_join) =
            spawn_logger(DualLoggerConfig::from_paths(&config.paths))?;
        Ok(Self::with_parts(
            config,
            args,
            logger_handle,
            Some(logger_join),
            SignalHandler::new(),
        ))
    }

    fn with_parts(
        config: Config,
        args: &DaemonArgs,
        logger_handle: ActivityLoggerHandle,
        logger_join: Option<thread::JoinHandle<()>>,
        signal_handler: SignalHandler,
    ) -> Self {
        let mut schedule = PassSchedule::new();
        if args.skip_delayed_start {
            schedule.delayed_completed = true;
            schedule.ticks = u64::MAX / 2;
        }
        Self {
            config,
            config_path: args.config_path.clone(),
            logger_handle,
            logger_join,
            signal_handler,
            watchdog: WatchdogHeartbeat::from_env(),
            schedule,
            start_time: Instant::now(),
            passes_run: 0,
        }
    }

    /// Shared signal state, e.g. for requesting shutdown from another thread.
    #[must_use]
    pub fn signals(&self) -> SignalHandler {
        self.signal_handler.clone()
    }

    /// Run until a shutdown is requested.
    pub fn run(&mut self) -> Result<()> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.logger_handle.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: config_hash.clone(),
        });
        eprintln!(
            "[MFC-DAEMON] started v{} (config {config_hash})",
            env!("CARGO_PKG_VERSION")
        );
        self.notifier().notify(&NotificationEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
        });
        notify_ready();

        let tick_waiter = ThreadWaiter::with_shutdown(self.signal_handler.shutdown_flag());
        loop {
            if self.signal_handler.should_shutdown() {
                eprintln!("[MFC-DAEMON] shutdown requested");
                break;
            }

            if self.signal_handler.should_reload() {
                eprintln!("[MFC-DAEMON] config reload requested (SIGHUP)");
                self.reload_config();
            }

            let trigger = if self.signal_handler.should_run_pass() {
                self.schedule.reset_interval();
                Some(PassTrigger::Signal)
            } else {
                self.schedule.tick(&self.config.service)
            };
            if let Some(trigger) = trigger {
                self.run_pass(trigger);
            }

            self.watchdog
                .maybe_notify(&format!("idle, {} passes run", self.passes_run));
            tick_waiter.wait(Duration::from_secs(self.config.service.tick_seconds.max(1)));
        }

        self.shutdown("clean shutdown");
        Ok(())
    }

    /// Reload, then run one pass if the service is enabled.
    fn run_pass(&mut self, trigger: PassTrigger) -> Option<PassReport> {
        self.reload_config();
        if !self.config.service.enabled {
            self.logger_handle.send(ActivityEvent::PassSkipped {
                reason: "service disabled".to_string(),
            });
            return None;
        }

        self.passes_run += 1;
        let options = PassOptions {
            trigger,
            dry_run: false,
            force: false,
        };
        let waiter = ThreadWaiter::with_shutdown(self.signal_handler.shutdown_flag());
        match run_configured_pass(
            &self.config,
            &options,
            Some(self.logger_handle.clone()),
            waiter,
        ) {
            Ok(report) => {
                if report.skipped.is_none() {
                    eprintln!(
                        "[MFC-DAEMON] pass complete: {} cleaned, {} failed in {}ms",
                        report.cleaned.len(),
                        report.failures(),
                        report.duration_ms
                    );
                }
                Some(report)
            }
            Err(err) => {
                eprintln!("[{}] pass could not start: {err}", err.code());
                self.logger_handle.send(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: format!("pass could not start: {err}"),
                });
                None
            }
        }
    }

    // ──────────────────── config reload ────────────────────

    /// Re-read the config file. A failed reload keeps the previous snapshot.
    fn reload_config(&mut self) {
        match Config::load(self.config_path.as_deref()) {
            Ok(new_config) => {
                let old_hash = self.config.stable_hash().unwrap_or_default();
                let new_hash = new_config.stable_hash().unwrap_or_default();
                if old_hash != new_hash {
                    self.logger_handle.send(ActivityEvent::ConfigReloaded {
                        details: format!("config hash: {old_hash} -> {new_hash}"),
                    });
                    eprintln!("[MFC-DAEMON] config reloaded ({old_hash} -> {new_hash})");
                    self.config = new_config;
                }
            }
            Err(e) => {
                eprintln!("[MFC-1003] config reload failed, keeping previous settings: {e}");
                self.logger_handle.send(ActivityEvent::Error {
                    code: "MFC-1003".to_string(),
                    message: format!("config reload failed: {e}"),
                });
            }
        }
    }

    fn notifier(&self) -> NotificationManager {
        let host = build_host(&self.config).unwrap_or_else(|err| {
            eprintln!("[{}] media host unavailable: {err}", err.code());
            Arc::new(OfflineHost)
        });
        NotificationManager::from_config(&self.config.notifications, host)
    }

    // ──────────────────── shutdown ────────────────────

    fn shutdown(&mut self, reason: &str) {
        let uptime_secs = self.start_time.elapsed().as_secs();
        self.logger_handle.send(ActivityEvent::DaemonStopped {
            reason: reason.to_string(),
            uptime_secs,
        });
        self.notifier().notify(&NotificationEvent::DaemonStopped {
            reason: reason.to_string(),
        });

        self.logger_handle.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
        let dropped = self.logger_handle.dropped_events();
        if dropped > 0 {
            eprintln!("[MFC-DAEMON] {dropped} activity events dropped (logger backlog)");
        }
        eprintln!("[MFC-DAEMON] shutdown complete (uptime={uptime_secs}s)");
    }
}
