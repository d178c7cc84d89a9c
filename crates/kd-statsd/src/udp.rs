//! UDP sink for remote StatsD collectors

use crate::config::Dialect;
use crate::error::{StatsdError, StatsdResult};
use crate::sink::{DurationSample, MeasurementSink, SinkKind};
use parking_lot::Mutex;
use std::any::Any;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use tracing::{debug, error, warn};

/// Sink that sends one datagram per sample
#[derive(Debug)]
pub struct RemoteSink {
    /// `host:port` as configured
    addr: String,
    /// Wire dialect
    dialect: Dialect,
    /// Connected socket, created on first send
    socket: Mutex<Option<UdpSocket>>,
}

impl RemoteSink {
    /// Create a sink for `addr`. Nothing is resolved until the first sample.
    pub fn new(addr: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            addr: addr.into(),
            dialect,
            socket: Mutex::new(None),
        }
    }

    /// Configured target address
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Configured wire dialect
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Render a sample in this sink's dialect
    pub fn packet(&self, sample: &DurationSample) -> String {
        let mut packet = format!("{}:{}|d", sample.normalized_name(), sample.formatted_value());

        let rate = sample.sample_rate;
        if rate < 1.0 || (self.dialect == Dialect::Statsite && rate > 1.0) {
            packet.push_str(&format!("|@{:?}", rate));
        }

        let tags = sample.normalized_tags();
        if !tags.is_empty() {
            if self.dialect.supports_tags() {
                packet.push_str("|#");
                packet.push_str(&tags.join(","));
            } else {
                warn!(dialect = %self.dialect, "tags are only supported by the datadog dialect");
            }
        }

        if self.dialect == Dialect::Statsite {
            packet.push('\n');
        }
        packet
    }

    fn connect(&self) -> StatsdResult<UdpSocket> {
        let target = self
            .addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| StatsdError::UnresolvedAddress(self.addr.clone()))?;
        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(target)?;
        debug!(addr = %self.addr, %target, "connected statsd socket");
        Ok(socket)
    }

    fn send(&self, packet: &str) -> StatsdResult<()> {
        let mut cached = self.socket.lock();
        let socket = match cached.take() {
            Some(socket) => socket,
            None => self.connect()?,
        };
        // A failed socket is dropped here; the next sample reconnects.
        socket.send(packet.as_bytes())?;
        *cached = Some(socket);
        Ok(())
    }
}

impl MeasurementSink for RemoteSink {
    fn collect_metric(&self, sample: &DurationSample) {
        if !self.dialect.supports_distribution() {
            warn!(
                dialect = %self.dialect,
                metric = %sample.name,
                "distribution metrics are not supported by this dialect, dropping sample"
            );
            return;
        }
        let packet = self.packet(sample);
        if let Err(e) = self.send(&packet) {
            error!(addr = %self.addr, "failed to send statsd packet: {}", e);
        }
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Remote
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
