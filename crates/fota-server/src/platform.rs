//! Platform collaborators the server drives but does not implement.
//!
//! On a microcontroller these are the Wi-Fi link and the onboard LED. Host
//! builds use the implementations here.

use std::fmt;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};

/// An on/off status light.
pub trait StatusIndicator: fmt::Debug + Send + Sync {
    /// Turn the indicator on.
    fn on(&self);
    /// Turn the indicator off.
    fn off(&self);
    /// Invert the indicator.
    fn toggle(&self);
}

/// Indicator that records its state and reports changes at trace level.
#[derive(Debug, Default)]
pub struct LogIndicator {
    lit: AtomicBool,
}

impl LogIndicator {
    /// Current state.
    pub fn is_on(&self) -> bool {
        self.lit.load(Ordering::Relaxed)
    }
}

impl StatusIndicator for LogIndicator {
    fn on(&self) {
        self.lit.store(true, Ordering::Relaxed);
        tracing::trace!("status indicator on");
    }

    fn off(&self) {
        self.lit.store(false, Ordering::Relaxed);
        tracing::trace!("status indicator off");
    }

    fn toggle(&self) {
        let was = self.lit.fetch_xor(true, Ordering::Relaxed);
        tracing::trace!("status indicator {}", if was { "off" } else { "on" });
    }
}

/// A network interface that yields an address once it is up.
pub trait NetworkLink {
    /// Address clients can reach us on, or `None` if the link is down.
    fn address(&self) -> Option<IpAddr>;
}

/// Host network: the bind address, or the default-route address when bound to
/// the unspecified address.
#[derive(Debug, Clone, Copy)]
pub struct HostLink {
    bind: SocketAddr,
}

impl HostLink {
    /// Link for a listener bound to `bind`.
    #[must_use]
    pub const fn new(bind: SocketAddr) -> Self {
        Self { bind }
    }
}

impl NetworkLink for HostLink {
    fn address(&self) -> Option<IpAddr> {
        if !self.bind.ip().is_unspecified() {
            return Some(self.bind.ip());
        }
        // Connecting a UDP socket sends nothing but selects the outbound interface
        let probe = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
        probe.connect(("192.0.2.1", 9)).ok()?;
        probe.local_addr().ok().map(|addr| addr.ip())
    }
}
