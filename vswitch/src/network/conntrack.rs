// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Connection tracking for flows terminated by the switch.
//!
//! Entries are shared through [`Arc`]/[`Mutex`] handles: a packet buffer holds the handle of
//! its flow while it walks the graph, and the application holds the listener handles.

use crate::iface::IfaceIndex;
use net::{Mac, Vni};
use ordermap::OrderMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Default capacity of a listener's syn backlog.
pub const MAX_SYN_BACKLOG_SIZE: usize = 128;

/// Default idle time after which half-open tcp connections and udp flows are forgotten.
pub const CONNTRACK_TIMEOUT: Duration = Duration::from_secs(60);

/// MSS announced in our SYN-ACKs.
pub const RCV_MSS: u16 = 1360;

/// A pre-resolved output for a flow, bypassing routing and neighbor resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fastpath {
    pub iface: IfaceIndex,
    pub vni: Vni,
    pub src: Mac,
    pub dst: Mac,
}

impl std::fmt::Display for Fastpath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} vni {} {} -> {}", self.iface, self.vni, self.src, self.dst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    SynReceived,
    Established,
}

#[derive(Debug)]
pub struct TcpEntry {
    pub remote: SocketAddr,
    pub local: SocketAddr,
    pub state: TcpState,
    /// Initial sequence number of the remote side.
    pub remote_isn: u32,
    /// Our initial sequence number, chosen when answering the SYN.
    pub local_isn: u32,
    pub fastpath: Option<Fastpath>,
    /// Last time a segment of the connection was seen.
    pub last_used: Instant,
    listener: Option<TcpListenHandle>,
}

impl TcpEntry {
    #[must_use]
    pub fn listener(&self) -> Option<&TcpListenHandle> {
        self.listener.as_ref()
    }
}

pub type TcpHandle = Arc<Mutex<TcpEntry>>;

#[derive(Debug)]
pub struct TcpListenEntry {
    pub local: SocketAddr,
    max_syn_backlog: usize,
    syn_backlog: VecDeque<TcpHandle>,
    backlog: VecDeque<TcpHandle>,
}

impl TcpListenEntry {
    #[must_use]
    pub fn syn_backlog_len(&self) -> usize {
        self.syn_backlog.len()
    }

    #[must_use]
    pub fn is_syn_backlog_full(&self) -> bool {
        self.syn_backlog.len() >= self.max_syn_backlog
    }

    /// Move a connection from the syn backlog to the accept backlog.
    pub fn establish(&mut self, entry: &TcpHandle) {
        self.syn_backlog.retain(|e| !Arc::ptr_eq(e, entry));
        self.backlog.push_back(entry.clone());
    }

    pub fn forget(&mut self, entry: &TcpHandle) {
        self.syn_backlog.retain(|e| !Arc::ptr_eq(e, entry));
        self.backlog.retain(|e| !Arc::ptr_eq(e, entry));
    }

    /// Take the oldest established connection.
    pub fn accept(&mut self) -> Option<TcpHandle> {
        self.backlog.pop_front()
    }
}

pub type TcpListenHandle = Arc<Mutex<TcpListenEntry>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub remote: SocketAddr,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub struct UdpListenEntry {
    pub local: SocketAddr,
    capacity: usize,
    queue: VecDeque<Datagram>,
}

impl UdpListenEntry {
    /// Queue a datagram, refusing it when the queue is full.
    pub fn store(&mut self, remote: SocketAddr, payload: Vec<u8>) -> bool {
        if self.queue.len() >= self.capacity {
            return false;
        }
        self.queue.push_back(Datagram { remote, payload });
        true
    }

    pub fn recv(&mut self) -> Option<Datagram> {
        self.queue.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

pub type UdpListenHandle = Arc<Mutex<UdpListenEntry>>;

#[derive(Debug)]
pub struct UdpEntry {
    pub remote: SocketAddr,
    pub local: SocketAddr,
    pub listener: UdpListenHandle,
    pub fastpath: Option<Fastpath>,
    pub last_used: Instant,
}

pub type UdpHandle = Arc<Mutex<UdpEntry>>;

#[derive(Debug)]
pub struct Conntrack {
    timeout: Duration,
    max_syn_backlog: usize,
    udp_queue_capacity: usize,
    tcp_listen: OrderMap<SocketAddr, TcpListenHandle>,
    udp_listen: OrderMap<SocketAddr, UdpListenHandle>,
    /* local => remote => entry */
    tcp: OrderMap<SocketAddr, OrderMap<SocketAddr, TcpHandle>>,
    udp: OrderMap<SocketAddr, OrderMap<SocketAddr, UdpHandle>>,
}

impl Default for Conntrack {
    fn default() -> Self {
        Self::new(MAX_SYN_BACKLOG_SIZE, 128, CONNTRACK_TIMEOUT)
    }
}

impl Conntrack {
    #[must_use]
    pub fn new(max_syn_backlog: usize, udp_queue_capacity: usize, timeout: Duration) -> Self {
        Self {
            timeout,
            max_syn_backlog,
            udp_queue_capacity,
            tcp_listen: OrderMap::new(),
            udp_listen: OrderMap::new(),
            tcp: OrderMap::new(),
            udp: OrderMap::new(),
        }
    }

    /// Listen on `local`. An unspecified address listens on every address of its family.
    pub fn listen_tcp(&mut self, local: SocketAddr) -> TcpListenHandle {
        let entry = Arc::new(Mutex::new(TcpListenEntry {
            local,
            max_syn_backlog: self.max_syn_backlog,
            syn_backlog: VecDeque::new(),
            backlog: VecDeque::new(),
        }));
        if self.tcp_listen.insert(local, entry.clone()).is_some() {
            error!("replaced the tcp listener on {local}");
        }
        entry
    }

    pub fn unlisten_tcp(&mut self, local: SocketAddr) -> Option<TcpListenHandle> {
        self.tcp_listen.remove(&local)
    }

    #[must_use]
    pub fn lookup_tcp_listen(&self, local: SocketAddr) -> Option<TcpListenHandle> {
        if let Some(entry) = self.tcp_listen.get(&local) {
            return Some(entry.clone());
        }
        let any: IpAddr = match local.ip() {
            IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            IpAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };
        self.tcp_listen
            .get(&SocketAddr::new(any, local.port()))
            .cloned()
    }

    #[must_use]
    pub fn lookup_tcp(&self, remote: SocketAddr, local: SocketAddr) -> Option<TcpHandle> {
        self.tcp.get(&local)?.get(&remote).cloned()
    }

    /// Track a connection initiated by `remote`, parked in the listener's syn backlog.
    pub fn create_tcp(
        &mut self,
        listener: &TcpListenHandle,
        remote: SocketAddr,
        local: SocketAddr,
        remote_isn: u32,
        now: Instant,
    ) -> TcpHandle {
        let entry = Arc::new(Mutex::new(TcpEntry {
            remote,
            local,
            state: TcpState::Closed,
            remote_isn,
            local_isn: 0,
            fastpath: None,
            last_used: now,
            listener: Some(listener.clone()),
        }));
        let old = self
            .tcp
            .entry(local)
            .or_default()
            .insert(remote, entry.clone());
        if old.is_some() {
            error!("tcp entry {remote} -> {local} replaced by a new connection");
        }
        listener.lock().syn_backlog.push_back(entry.clone());
        entry
    }

    pub fn remove_tcp(&mut self, remote: SocketAddr, local: SocketAddr) -> Option<TcpHandle> {
        let by_remote = self.tcp.get_mut(&local)?;
        let entry = by_remote.remove(&remote)?;
        if by_remote.is_empty() {
            self.tcp.remove(&local);
        }
        let listener = entry.lock().listener.take();
        if let Some(listener) = listener {
            listener.lock().forget(&entry);
        }
        entry.lock().state = TcpState::Closed;
        debug!("removed tcp entry {remote} -> {local}");
        Some(entry)
    }

    pub fn listen_udp(&mut self, local: SocketAddr) -> UdpListenHandle {
        let entry = Arc::new(Mutex::new(UdpListenEntry {
            local,
            capacity: self.udp_queue_capacity,
            queue: VecDeque::new(),
        }));
        if self.udp_listen.insert(local, entry.clone()).is_some() {
            error!("replaced the udp listener on {local}");
        }
        entry
    }

    pub fn unlisten_udp(&mut self, local: SocketAddr) -> Option<UdpListenHandle> {
        self.udp_listen.remove(&local)
    }

    /// Exact match only, no wildcard for udp.
    #[must_use]
    pub fn lookup_udp_listen(&self, local: SocketAddr) -> Option<UdpListenHandle> {
        self.udp_listen.get(&local).cloned()
    }

    #[must_use]
    pub fn lookup_udp(&self, remote: SocketAddr, local: SocketAddr) -> Option<UdpHandle> {
        self.udp.get(&local)?.get(&remote).cloned()
    }

    /// The entry of a flow, created on first use and refreshed on every later one.
    pub fn record_udp(
        &mut self,
        remote: SocketAddr,
        local: SocketAddr,
        listener: &UdpListenHandle,
        now: Instant,
    ) -> UdpHandle {
        let entry = self
            .udp
            .entry(local)
            .or_default()
            .entry(remote)
            .or_insert_with(|| {
                Arc::new(Mutex::new(UdpEntry {
                    remote,
                    local,
                    listener: listener.clone(),
                    fastpath: None,
                    last_used: now,
                }))
            })
            .clone();
        entry.lock().last_used = now;
        entry
    }

    pub fn remove_udp(&mut self, remote: SocketAddr, local: SocketAddr) -> Option<UdpHandle> {
        let by_remote = self.udp.get_mut(&local)?;
        let entry = by_remote.remove(&remote);
        if by_remote.is_empty() {
            self.udp.remove(&local);
        }
        entry
    }

    /// Forget half-open tcp connections and udp flows idle for longer than the timeout.
    ///
    /// Established connections belong to the application and are left alone.
    pub fn expire(&mut self, now: Instant) {
        let timeout = self.timeout;
        let is_idle = |last_used: Instant| now.saturating_duration_since(last_used) >= timeout;
        let stale: Vec<(SocketAddr, SocketAddr)> = self
            .tcp
            .values()
            .flat_map(OrderMap::values)
            .filter_map(|entry| {
                let e = entry.lock();
                (e.state != TcpState::Established && is_idle(e.last_used))
                    .then_some((e.remote, e.local))
            })
            .collect();
        for (remote, local) in stale {
            self.remove_tcp(remote, local);
        }
        for by_remote in self.udp.values_mut() {
            by_remote.retain(|_, entry| !is_idle(entry.lock().last_used));
        }
        self.udp.retain(|_, by_remote| !by_remote.is_empty());
    }

    #[must_use]
    pub fn count_tcp(&self) -> usize {
        self.tcp.values().map(OrderMap::len).sum()
    }

    #[must_use]
    pub fn count_udp(&self) -> usize {
        self.udp.values().map(OrderMap::len).sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn tcp_listen_falls_back_to_wildcard() {
        let mut ct = Conntrack::default();
        let any = ct.listen_tcp(addr("0.0.0.0:80"));
        let exact = ct.listen_tcp(addr("10.0.0.1:443"));
        assert!(Arc::ptr_eq(&ct.lookup_tcp_listen(addr("10.0.0.9:80")).unwrap(), &any));
        assert!(Arc::ptr_eq(&ct.lookup_tcp_listen(addr("10.0.0.1:443")).unwrap(), &exact));
        assert!(ct.lookup_tcp_listen(addr("10.0.0.2:443")).is_none());
        assert!(ct.lookup_tcp_listen(addr("[fd00::1]:80")).is_none());
    }

    #[test]
    fn tcp_entry_lifecycle() {
        let mut ct = Conntrack::new(2, 1, CONNTRACK_TIMEOUT);
        let listener = ct.listen_tcp(addr("10.0.0.1:80"));
        let remote = addr("10.0.0.2:40000");
        let local = addr("10.0.0.1:80");
        let entry = ct.create_tcp(&listener, remote, local, 7, Instant::now());
        assert!(ct.lookup_tcp(remote, local).is_some());
        assert_eq!(listener.lock().syn_backlog_len(), 1);

        listener.lock().establish(&entry);
        assert_eq!(listener.lock().syn_backlog_len(), 0);

        ct.remove_tcp(remote, local).unwrap();
        assert!(ct.lookup_tcp(remote, local).is_none());
        assert!(listener.lock().accept().is_none());
        assert_eq!(entry.lock().state, TcpState::Closed);
        assert_eq!(ct.count_tcp(), 0);
    }

    #[test]
    fn udp_queue_is_bounded_and_entries_reused() {
        let mut ct = Conntrack::new(2, 1, CONNTRACK_TIMEOUT);
        let listener = ct.listen_udp(addr("10.0.0.1:53"));
        assert!(ct.lookup_udp_listen(addr("0.0.0.0:53")).is_none());
        assert!(listener.lock().store(addr("10.0.0.2:5000"), vec![1]));
        assert!(!listener.lock().store(addr("10.0.0.2:5000"), vec![2]));

        let now = Instant::now();
        let a = ct.record_udp(addr("10.0.0.2:5000"), addr("10.0.0.1:53"), &listener, now);
        let b = ct.record_udp(addr("10.0.0.2:5000"), addr("10.0.0.1:53"), &listener, now);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(ct.count_udp(), 1);
        assert_eq!(listener.lock().recv().unwrap().payload, vec![1]);
    }

    #[test]
    fn idle_half_open_connections_and_flows_expire() {
        let mut ct = Conntrack::new(1, 1, Duration::from_secs(10));
        let local = addr("10.0.0.1:80");
        let listener = ct.listen_tcp(local);
        let t0 = Instant::now();

        let half_open = ct.create_tcp(&listener, addr("10.0.0.2:40000"), local, 1, t0);
        half_open.lock().state = TcpState::SynReceived;
        assert!(listener.lock().is_syn_backlog_full());
        let established = ct.create_tcp(&listener, addr("10.0.0.3:40000"), local, 1, t0);
        established.lock().state = TcpState::Established;
        listener.lock().establish(&established);

        let udp_listener = ct.listen_udp(addr("10.0.0.1:53"));
        ct.record_udp(addr("10.0.0.2:5000"), addr("10.0.0.1:53"), &udp_listener, t0);
        let later = t0 + Duration::from_secs(5);
        ct.record_udp(addr("10.0.0.3:5000"), addr("10.0.0.1:53"), &udp_listener, later);

        ct.expire(t0 + Duration::from_secs(9));
        assert_eq!((ct.count_tcp(), ct.count_udp()), (2, 2));

        ct.expire(t0 + Duration::from_secs(12));
        assert!(ct.lookup_tcp(addr("10.0.0.2:40000"), local).is_none());
        assert!(ct.lookup_tcp(addr("10.0.0.3:40000"), local).is_some());
        assert_eq!(listener.lock().syn_backlog_len(), 0);
        assert!(!listener.lock().is_syn_backlog_full());
        assert_eq!(half_open.lock().state, TcpState::Closed);
        assert!(ct.lookup_udp(addr("10.0.0.2:5000"), addr("10.0.0.1:53")).is_none());
        assert!(ct.lookup_udp(addr("10.0.0.3:5000"), addr("10.0.0.1:53")).is_some());
    }
}
