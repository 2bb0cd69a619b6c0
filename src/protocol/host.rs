use crate::transport::PeerId;

/// Set-once record of which peer is the host, cleared only when it leaves.
#[derive(Debug, Clone, Default)]
pub struct HostLatch {
    host: Option<PeerId>,
}

impl HostLatch {
    pub fn current(&self) -> Option<&PeerId> {
        self.host.as_ref()
    }

    pub fn is_latched(&self) -> bool {
        self.host.is_some()
    }

    /// Whether `peer` may act as host: nobody latched yet, or it is the latched one.
    pub fn admits(&self, peer: &PeerId) -> bool {
        self.host.as_ref().map_or(true, |host| host == peer)
    }

    pub fn is(&self, peer: &PeerId) -> bool {
        self.host.as_ref() == Some(peer)
    }

    /// Latch `peer` if nothing is latched. Returns true when newly latched.
    pub fn latch(&mut self, peer: &PeerId) -> bool {
        if self.host.is_some() {
            return false;
        }
        self.host = Some(peer.clone());
        true
    }

    pub fn clear(&mut self) -> Option<PeerId> {
        self.host.take()
    }
}
