use std::{
    net::UdpSocket,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use cauldron_core::{CauldronError, FrameSink, Result, Rgb};

pub const DEFAULT_UDP_PORT: u16 = 5456;

/// Streams frames to a network LED controller, one datagram per frame.
///
/// Each datagram carries `r g b` bytes per pixel with brightness already
/// applied.
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
}

impl UdpSink {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect((host, port))?;
        socket.set_nonblocking(true)?;
        tracing::info!(host, port, "streaming frames over UDP");
        Ok(Self { socket })
    }
}

impl FrameSink for UdpSink {
    fn transmit(&self, pixels: &[Rgb], brightness: f32) -> Result<()> {
        let payload: Vec<u8> = pixels
            .iter()
            .flat_map(|pixel| {
                let pixel = pixel.scaled(brightness);
                [pixel.r, pixel.g, pixel.b]
            })
            .collect();
        self.socket
            .send(&payload)
            .map(|_| ())
            .map_err(|err| CauldronError::transmit(err.to_string()))
    }
}

/// Logs a summary of every `every`-th frame. Useful without hardware.
#[derive(Debug)]
pub struct LogSink {
    every: u64,
    count: AtomicU64,
}

impl LogSink {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            count: AtomicU64::new(0),
        }
    }
}

impl FrameSink for LogSink {
    fn transmit(&self, pixels: &[Rgb], brightness: f32) -> Result<()> {
        let frame = self.count.fetch_add(1, Ordering::Relaxed);
        if frame % self.every == 0 {
            let lit = pixels.iter().filter(|pixel| **pixel != Rgb::BLACK).count();
            tracing::info!(
                frame,
                brightness,
                lit,
                first = ?pixels.first(),
                "frame"
            );
        }
        Ok(())
    }
}

/// Parses `log` or `udp://host[:port]`.
pub fn parse_target(target: &str) -> Result<Arc<dyn FrameSink>> {
    if target == "log" {
        return Ok(Arc::new(LogSink::new(30)));
    }
    let Some(address) = target.strip_prefix("udp://") else {
        return Err(CauldronError::construction(format!(
            "unknown frame target `{target}`, expected `log` or `udp://host[:port]`"
        )));
    };
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| CauldronError::construction(format!("invalid port in `{target}`")))?;
            (host, port)
        }
        None => (address, DEFAULT_UDP_PORT),
    };
    Ok(Arc::new(UdpSink::connect(host, port)?))
}
