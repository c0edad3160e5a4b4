//! Device-ready polling
//!
//! After an attach whose device materialization happens out of band, the
//! waiter polls local device enumeration until the attach token shows up
//! or the deadline passes. Two timers race: the periodic tick and the
//! overall deadline. There is no external cancellation path mid-poll.

use crate::context::Context;
use crate::driver::StorageExecutor;
use crate::error::{Error, Result};
use crate::types::{LocalDevices, LocalDevicesOpts};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::trace;

/// Default polling interval between device enumerations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Bounded polling loop for post-attach device materialization.
#[derive(Debug, Clone, Copy)]
pub struct DeviceReadyWaiter {
    poll_interval: Duration,
}

impl Default for DeviceReadyWaiter {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl DeviceReadyWaiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Poll `executor`'s device enumeration until a device key matches
    /// `token` (case-insensitively) or `timeout` elapses.
    ///
    /// Returns the matching enumeration snapshot, or
    /// [`Error::DeviceWaitTimeout`] on deadline expiry so callers can map
    /// a timeout to a response distinct from generic failure. Enumeration
    /// errors propagate immediately.
    pub async fn wait(
        &self,
        ctx: &Context,
        executor: &dyn StorageExecutor,
        opts: &LocalDevicesOpts,
        token: &str,
        timeout: Duration,
    ) -> Result<LocalDevices> {
        let token_lower = token.to_lowercase();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Deadline checked first so a simultaneous fire times out.
                biased;
                _ = &mut deadline => {
                    return Err(Error::DeviceWaitTimeout {
                        token: token_lower,
                        timeout,
                    });
                }
                _ = tick.tick() => {
                    let devices = executor.local_devices(ctx, opts).await?;
                    let found = devices
                        .device_map
                        .keys()
                        .any(|k| k.to_lowercase() == token_lower);
                    if found {
                        return Ok(devices);
                    }
                    trace!(token = %token_lower, "attach token not yet visible");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::driver::Driver;
    use crate::types::InstanceId;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::time::Instant;

    // Scan source whose device map becomes visible only after a delay.
    struct DelayedScan {
        start: Instant,
        appear_after: Duration,
        devices: Mutex<LocalDevices>,
    }

    impl DelayedScan {
        fn new(appear_after: Duration, device: (&str, &str)) -> Arc<Self> {
            let mut devices = LocalDevices {
                driver: "delayed".into(),
                ..Default::default()
            };
            devices
                .device_map
                .insert(device.0.to_string(), device.1.to_string());
            Arc::new(Self {
                start: Instant::now(),
                appear_after,
                devices: Mutex::new(devices),
            })
        }
    }

    #[async_trait]
    impl Driver for DelayedScan {
        fn name(&self) -> &str {
            "delayed"
        }
        async fn init(&self, _ctx: &Context, _config: &ConfigStore) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl StorageExecutor for DelayedScan {
        async fn instance_id(&self, _ctx: &Context) -> Result<InstanceId> {
            Ok(InstanceId::new("delayed"))
        }
        async fn next_device(&self, _ctx: &Context) -> Result<String> {
            Err(Error::NotImplemented { op: "nextDevice" })
        }
        async fn local_devices(
            &self,
            _ctx: &Context,
            _opts: &LocalDevicesOpts,
        ) -> Result<LocalDevices> {
            if self.start.elapsed() >= self.appear_after {
                Ok(self.devices.lock().clone())
            } else {
                Ok(LocalDevices {
                    driver: "delayed".into(),
                    ..Default::default()
                })
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_appearing_before_deadline_succeeds() {
        let executor =
            DelayedScan::new(Duration::from_millis(600), ("xvdf", "/dev/xvdf"));
        let waiter = DeviceReadyWaiter::new(Duration::from_millis(100));
        let ctx = Context::background();

        let devices = waiter
            .wait(
                &ctx,
                executor.as_ref(),
                &LocalDevicesOpts::default(),
                "xvdf",
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(
            devices.device_map.get("xvdf").map(String::as_str),
            Some("/dev/xvdf")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_match_is_case_insensitive() {
        let executor =
            DelayedScan::new(Duration::from_millis(0), ("XVDF", "/dev/xvdf"));
        let waiter = DeviceReadyWaiter::new(Duration::from_millis(100));
        let ctx = Context::background();

        let devices = waiter
            .wait(
                &ctx,
                executor.as_ref(),
                &LocalDevicesOpts::default(),
                "xvdf",
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(devices.device_map.contains_key("XVDF"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_token_times_out() {
        let executor =
            DelayedScan::new(Duration::from_secs(3600), ("xvdf", "/dev/xvdf"));
        let waiter = DeviceReadyWaiter::new(Duration::from_millis(100));
        let ctx = Context::background();

        let start = Instant::now();
        let err = waiter
            .wait(
                &ctx,
                executor.as_ref(),
                &LocalDevicesOpts::default(),
                "xvdq",
                Duration::from_millis(200),
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        // Deadline honored within one tick of granularity.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumeration_error_propagates() {
        struct Broken;

        #[async_trait]
        impl Driver for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            async fn init(&self, _ctx: &Context, _config: &ConfigStore) -> Result<()> {
                Ok(())
            }
        }

        #[async_trait]
        impl StorageExecutor for Broken {
            async fn instance_id(&self, _ctx: &Context) -> Result<InstanceId> {
                Ok(InstanceId::new("broken"))
            }
            async fn next_device(&self, _ctx: &Context) -> Result<String> {
                Err(Error::NotImplemented { op: "nextDevice" })
            }
            async fn local_devices(
                &self,
                _ctx: &Context,
                _opts: &LocalDevicesOpts,
            ) -> Result<LocalDevices> {
                Err(Error::Internal("scan failed".into()))
            }
        }

        let waiter = DeviceReadyWaiter::default();
        let ctx = Context::background();
        let err = waiter
            .wait(
                &ctx,
                &Broken,
                &LocalDevicesOpts::default(),
                "xvdf",
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert_matches::assert_matches!(err, Error::Internal(_));
        assert!(!err.is_timeout());
    }
}
