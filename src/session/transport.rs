use std::io;

/// Datagram path to the peer.
///
/// Inbound datagrams are pushed into the session with
/// [`Session::push_datagram`][super::Session::push_datagram]; the transport
/// only carries the outbound direction.
pub trait Transport: Send + Sync {
    /// Send one datagram.
    fn send(&self, datagram: &[u8]) -> io::Result<()>;

    /// Largest datagram the path carries. The session never produces larger
    /// datagrams than this or the configured mtu.
    fn max_payload(&self) -> usize;

    /// No more datagrams will be sent.
    fn shutdown(&self) {}
}
