//! Connection lifecycle of a single device
//!
//! `Unconnected → Searching → Connecting → Connected`, and back through
//! `Disconnected` on link loss. Retries run in a reconnect loop of which at
//! most one exists per session.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;

use super::transport::DeviceTransport;
use super::types::DeviceSession;
use crate::{Error, Result};

/// Connection state as reported by `list`
///
/// The searching and connecting phases of an attempt are not tracked
/// separately: from the first attempt until the link is up, a device is
/// `Reconnecting`. A failed attempt stays `Reconnecting` through the wait
/// before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Defined but without a handle
    Unconnected,
    /// Handle present, link down, no retry running
    Disconnected,
    /// Handle present and a connect loop is searching, connecting or
    /// waiting to retry
    Reconnecting,
    Connected,
}

impl ConnectionState {
    /// State of a device given its session, if it has one
    #[must_use]
    pub fn of(session: Option<&DeviceSession>) -> Self {
        match session {
            None => Self::Unconnected,
            Some(s) if s.handle.is_connected() => Self::Connected,
            Some(s) if s.reconnecting.load(Ordering::SeqCst) => Self::Reconnecting,
            Some(_) => Self::Disconnected,
        }
    }
}

/// Discover and connect a device
///
/// Leaves the handle usable for a later retry on failure.
///
/// # Errors
///
/// Returns `DeviceNotFound` if discovery fails and `ConnectFailed` if the
/// transport refuses the connection
pub async fn connect(name: &str, handle: &dyn DeviceTransport) -> Result<()> {
    tracing::debug!(device = %name, "searching");
    let found = handle
        .find()
        .await
        .map_err(|e| Error::DeviceNotFound(format!("'{name}': discovery failed: {e}")))?;
    if !found {
        return Err(Error::DeviceNotFound(format!(
            "'{name}' was not found on the network; make sure no other app \
             (such as the vendor's mobile app) is connected to it"
        )));
    }

    tracing::debug!(device = %name, "connecting");
    handle
        .connect()
        .await
        .map_err(|e| Error::ConnectFailed(format!("'{name}': {e}")))?;
    tracing::info!(device = %name, "connected");
    Ok(())
}

/// Disconnect a device; a no-op when already disconnected
///
/// # Errors
///
/// Returns `Transport` if the handle fails to close the link
pub async fn disconnect(name: &str, handle: &dyn DeviceTransport) -> Result<()> {
    if !handle.is_connected() {
        tracing::info!(device = %name, "already disconnected");
        return Ok(());
    }
    handle
        .disconnect()
        .await
        .map_err(|e| Error::Transport(format!("disconnecting '{name}' failed: {e}")))?;
    tracing::info!(device = %name, "disconnected");
    Ok(())
}

/// Exclusive right to run the reconnect loop of one session
///
/// Releases the session's guard flag when dropped.
#[derive(Debug)]
pub struct ReconnectPermit(Arc<AtomicBool>);

impl ReconnectPermit {
    /// Claim the guard; `None` while another loop holds it
    #[must_use]
    pub fn acquire(guard: &Arc<AtomicBool>) -> Option<Self> {
        if guard.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self(Arc::clone(guard)))
        }
    }
}

impl Drop for ReconnectPermit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Connect until it succeeds, waiting `retry` between attempts
///
/// `current_name` is polled before every attempt and yields the device's
/// name while its session is still attached. The loop ends once it returns
/// `None`.
pub async fn reconnect_loop<F, Fut>(
    handle: Arc<dyn DeviceTransport>,
    retry: Duration,
    permit: ReconnectPermit,
    current_name: F,
) where
    F: Fn() -> Fut + Send,
    Fut: Future<Output = Option<String>> + Send,
{
    let _permit = permit;
    let mut attempt: u32 = 0;
    loop {
        let Some(name) = current_name().await else {
            tracing::debug!("session gone, reconnect loop stopped");
            return;
        };
        if handle.is_connected() {
            tracing::debug!(device = %name, "already connected, reconnect loop stopped");
            return;
        }

        attempt += 1;
        match connect(&name, &*handle).await {
            Ok(()) => return,
            Err(e) => tracing::warn!(
                device = %name,
                attempt,
                retry_secs = retry.as_secs(),
                error = %e,
                "connect failed, retrying"
            ),
        }
        tokio::time::sleep(retry).await;
    }
}
