//! Opening the byte stream a link runs over.
//!
//! The display is a USB-serial device.  TCP is accepted too so the host can
//! talk to the `catlink-device` simulator.

use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::info;

use super::LinkError;

/// Opens `port` (e.g. `/dev/ttyUSB0`, `COM3`) at `baud_rate`, 8N1.
///
/// # Errors
///
/// [`LinkError::Serial`] if the port does not exist or is busy.
pub fn open_serial(port: &str, baud_rate: u32) -> Result<SerialStream, LinkError> {
    let stream = tokio_serial::new(port, baud_rate)
        .open_native_async()
        .map_err(|source| LinkError::Serial {
            port: port.to_string(),
            source,
        })?;
    info!("opened serial port {port} at {baud_rate} baud");
    Ok(stream)
}

/// Connects to a device simulator at `addr`.
///
/// # Errors
///
/// [`LinkError::Connect`] if the connection is refused or unreachable.
pub async fn connect_tcp(addr: &str) -> Result<TcpStream, LinkError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| LinkError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;
    info!("connected to {addr}");
    Ok(stream)
}

/// Names of the serial ports present on this machine.
///
/// # Errors
///
/// [`LinkError::Serial`] if the platform enumeration fails.
pub fn available_ports() -> Result<Vec<String>, LinkError> {
    let ports = tokio_serial::available_ports().map_err(|source| LinkError::Serial {
        port: "*".to_string(),
        source,
    })?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
