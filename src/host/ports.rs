use std::net::TcpListener;

/// Reports whether a TCP port is already bound on the host.
pub trait PortScanner: Send + Sync {
    fn is_port_bound(&self, port: u16) -> bool;
}

/// Probes by trying to bind the port on all interfaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPortScanner;

impl PortScanner for HostPortScanner {
    fn is_port_bound(&self, port: u16) -> bool {
        TcpListener::bind(("0.0.0.0", port)).is_err()
    }
}
