//! Signal handling for the service loop.
//!
//! SIGTERM/SIGINT stop the loop, SIGHUP forces a config reload before the next
//! pass, SIGUSR1 runs a pass on the next tick. The loop polls the flags at
//! every tick boundary; nothing blocks on a signal.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

// ──────────────────── signal handler ────────────────────

/// Flags shared between the OS signal hooks and the service loop.
#[derive(Clone, Default)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    reload_flag: Arc<AtomicBool>,
    pass_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Handler with OS hooks registered. Registration failures are reported
    /// on stderr and otherwise ignored.
    #[must_use]
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// Handler driven only by the `request_*` methods.
    #[must_use]
    pub fn unregistered() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Read and clear the reload flag.
    #[must_use]
    pub fn should_reload(&self) -> bool {
        self.reload_flag.swap(false, Ordering::Relaxed)
    }

    /// Read and clear the immediate-pass flag.
    #[must_use]
    pub fn should_run_pass(&self) -> bool {
        self.pass_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_reload(&self) {
        self.reload_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_pass(&self) {
        self.pass_flag.store(true, Ordering::Relaxed);
    }

    /// Shared shutdown flag, for components that poll it directly.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    fn register_signals(&self) {
        for (signal, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&self.shutdown_flag)) {
                eprintln!("[MFC-SIGNAL] failed to register {name}: {e}");
            }
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload_flag)) {
                eprintln!("[MFC-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.pass_flag)) {
                eprintln!("[MFC-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

// ──────────────────── watchdog heartbeat ────────────────────

/// systemd watchdog pings, sent at half of `WatchdogSec`.
pub struct WatchdogHeartbeat {
    interval: Duration,
    last_beat: Instant,
    enabled: bool,
}

impl WatchdogHeartbeat {
    /// Heartbeat from `WATCHDOG_USEC` when systemd set one, disabled otherwise.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var("WATCHDOG_USEC")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|usec| *usec > 0)
            .map_or_else(Self::disabled, |usec| {
                Self::new(Duration::from_micros(usec))
            })
    }

    #[must_use]
    pub fn new(watchdog: Duration) -> Self {
        Self {
            interval: watchdog / 2,
            last_beat: Instant::now(),
            enabled: !watchdog.is_zero(),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            interval: Duration::from_secs(30),
            last_beat: Instant::now(),
            enabled: false,
        }
    }

    /// Ping systemd if the interval elapsed. Returns whether a ping went out.
    pub fn maybe_notify(&mut self, status: &str) -> bool {
        if !self.enabled || self.last_beat.elapsed() < self.interval {
            return false;
        }
        self.last_beat = Instant::now();
        sd_notify(&format!("WATCHDOG=1\nSTATUS={status}\n"));
        true
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Tell systemd the service finished starting.
pub fn notify_ready() {
    sd_notify("READY=1\n");
}

/// No-op unless `NOTIFY_SOCKET` is set.
fn sd_notify(message: &str) {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::net::UnixDatagram;

        let Ok(socket_path) = std::env::var("NOTIFY_SOCKET") else {
            return;
        };
        if socket_path.is_empty() {
            return;
        }
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(message.as_bytes(), &socket_path);
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = message;
    }
}
