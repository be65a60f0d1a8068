//! Port allocator.
//!
//! A port is available when no record claims it, no container publishes
//! it, and nothing on the host is bound to it. The allocator is built
//! fresh for each operation and every port it hands out is reserved in
//! its own set, so one bulk pass never assigns a port twice.
//!
//! Searches probe upward one port at a time and give up after
//! `probe_window` candidates (or at 65535) with `PortsExhausted`.

use std::collections::BTreeSet;
use std::net::TcpListener;
use std::sync::Arc;

use clawfleet_core::PortRequest;
use clawfleet_runtime::RuntimeAdapter;
use clawfleet_state::RecordStore;
use tracing::{debug, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Default number of candidate ports examined per search.
pub const DEFAULT_PROBE_WINDOW: u32 = 10_000;

/// Checks whether the host has a port free right now.
pub trait PortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Probes by binding a TCP listener on the wildcard and loopback
/// addresses and dropping it immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPortProbe;

impl PortProbe for HostPortProbe {
    fn is_free(&self, port: u16) -> bool {
        // One listener at a time: the wildcard bind would block the loopback one.
        let wildcard = TcpListener::bind(("0.0.0.0", port)).is_ok();
        wildcard && TcpListener::bind(("127.0.0.1", port)).is_ok()
    }
}

/// Owns the used-port set for one allocation pass.
pub struct PortAllocator {
    used: BTreeSet<u16>,
    probe: Arc<dyn PortProbe>,
    window: u32,
}

impl PortAllocator {
    pub fn new(used: BTreeSet<u16>, probe: Arc<dyn PortProbe>) -> Self {
        Self {
            used,
            probe,
            window: DEFAULT_PROBE_WINDOW,
        }
    }

    pub fn with_window(mut self, window: u32) -> Self {
        self.window = window.max(1);
        self
    }

    /// Build from the store's records plus the runtime's published ports.
    pub fn scan(
        store: &RecordStore,
        runtime: &dyn RuntimeAdapter,
        probe: Arc<dyn PortProbe>,
    ) -> SchedulerResult<Self> {
        let mut used = store.used_ports()?;
        let published = runtime.published_ports()?;
        debug!(
            record_ports = used.len(),
            runtime_ports = published.len(),
            "port occupancy scanned"
        );
        used.extend(published);
        Ok(Self::new(used, probe))
    }

    pub fn used(&self) -> &BTreeSet<u16> {
        &self.used
    }

    pub fn is_available(&self, port: u16) -> bool {
        port != 0 && !self.used.contains(&port) && self.probe.is_free(port)
    }

    /// Lowest available port at or above `base`. Does not reserve it.
    pub fn find_available_port(&self, base: u16) -> SchedulerResult<u16> {
        let (first, last) = self.search_bounds(base, 0);
        (first..=last)
            .find(|p| self.is_available(*p))
            .ok_or(SchedulerError::PortsExhausted { first, last })
    }

    /// Lowest `p >= base` where both `p` and `p + 1` are available.
    /// Does not reserve them.
    pub fn find_available_pair(&self, base: u16) -> SchedulerResult<(u16, u16)> {
        let (first, last) = self.search_bounds(base, 1);
        (first..=last)
            .find(|p| self.is_available(*p) && self.is_available(*p + 1))
            .map(|p| (p, p + 1))
            .ok_or(SchedulerError::PortsExhausted {
                first,
                last: last.saturating_add(1),
            })
    }

    pub fn reserve(&mut self, port: u16) {
        self.used.insert(port);
    }

    /// Find and reserve an adjacent pair.
    pub fn claim_pair(&mut self, base: u16) -> SchedulerResult<(u16, u16)> {
        let (gateway, bridge) = self.find_available_pair(base)?;
        self.reserve(gateway);
        self.reserve(bridge);
        Ok((gateway, bridge))
    }

    /// Resolve and reserve one port request for `instance`.
    pub fn claim(&mut self, request: PortRequest, instance: &str) -> SchedulerResult<u16> {
        let port = match request {
            PortRequest::Fixed(port) => {
                if !self.is_available(port) {
                    return Err(SchedulerError::PortConflict {
                        port,
                        instance: instance.to_string(),
                    });
                }
                port
            }
            PortRequest::Preferred(preferred) => {
                let port = self.find_available_port(preferred)?;
                if port != preferred {
                    warn!(%instance, preferred, assigned = port, "preferred port taken, using next free port");
                }
                port
            }
        };
        self.reserve(port);
        Ok(port)
    }

    /// Inclusive candidate range for a search needing `span` extra ports
    /// above each candidate.
    fn search_bounds(&self, base: u16, span: u16) -> (u16, u16) {
        let first = base.max(1);
        let last = u32::from(first)
            .saturating_add(self.window - 1)
            .min(u32::from(u16::MAX - span));
        // An empty range (last < first) simply finds nothing.
        (first, u16::try_from(last).unwrap_or(u16::MAX))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Host probe backed by a fixed set of externally occupied ports.
    pub(crate) struct FakeProbe(pub BTreeSet<u16>);

    impl PortProbe for FakeProbe {
        fn is_free(&self, port: u16) -> bool {
            !self.0.contains(&port)
        }
    }

    fn allocator(used: &[u16], occupied: &[u16]) -> PortAllocator {
        PortAllocator::new(
            used.iter().copied().collect(),
            Arc::new(FakeProbe(occupied.iter().copied().collect())),
        )
    }

    #[test]
    fn single_port_skips_used_and_occupied() {
        let alloc = allocator(&[18789], &[18790]);
        assert_eq!(alloc.find_available_port(18789).unwrap(), 18791);
        assert_eq!(alloc.find_available_port(18000).unwrap(), 18000);
    }

    #[test]
    fn pair_requires_both_ports_free() {
        // 18790 used, so 18789 cannot pair; 18791 occupied, so 18790 can't
        // either; 18792/18793 is the first clean pair.
        let alloc = allocator(&[18790], &[18791]);
        assert_eq!(alloc.find_available_pair(18789).unwrap(), (18792, 18793));
    }

    #[test]
    fn claim_pair_reserves_both() {
        let mut alloc = allocator(&[], &[]);
        assert_eq!(alloc.claim_pair(18789).unwrap(), (18789, 18790));
        assert_eq!(alloc.claim_pair(18789).unwrap(), (18791, 18792));
        assert!(alloc.used().contains(&18790));
    }

    #[test]
    fn fixed_request_conflicts_instead_of_moving() {
        let mut alloc = allocator(&[18789], &[]);
        let err = alloc.claim(PortRequest::Fixed(18789), "admin").unwrap_err();
        assert!(matches!(err, SchedulerError::PortConflict { port: 18789, .. }));
        assert_eq!(alloc.claim(PortRequest::Fixed(18800), "admin").unwrap(), 18800);
        assert!(alloc.claim(PortRequest::Fixed(18800), "other").is_err());
    }

    #[test]
    fn preferred_request_moves_up() {
        let mut alloc = allocator(&[19000], &[19001]);
        assert_eq!(alloc.claim(PortRequest::Preferred(19000), "u1").unwrap(), 19002);
        assert_eq!(alloc.claim(PortRequest::Preferred(19000), "u2").unwrap(), 19003);
    }

    #[test]
    fn bounded_search_reports_exhaustion() {
        let occupied: Vec<u16> = (20000..20010).collect();
        let alloc = allocator(&[], &occupied).with_window(10);
        assert!(matches!(
            alloc.find_available_port(20000),
            Err(SchedulerError::PortsExhausted { first: 20000, last: 20009 })
        ));
        assert!(alloc.find_available_pair(20000).is_err());
    }

    #[test]
    fn search_stops_at_top_of_port_space() {
        let alloc = allocator(&[65535], &[]);
        assert!(alloc.find_available_port(65535).is_err());
        assert_eq!(alloc.find_available_port(65534).unwrap(), 65534);
        assert!(alloc.find_available_pair(65535).is_err());
        assert!(alloc.find_available_pair(65534).is_err());
    }

    #[test]
    fn port_zero_is_never_assigned() {
        let alloc = allocator(&[], &[]);
        assert_eq!(alloc.find_available_port(0).unwrap(), 1);
    }
}
