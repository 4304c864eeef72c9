//! Serial port handling
//!
//! Provides the serial-port [`Connection`] used to reach a Control Unit
//! over its PC adapter, plus port discovery.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, Span};

use super::{Connection, ConnectionConfig, ProtocolError, Result};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key putting ttyUSB* first (the usual CU adapter), then ttyACM*,
/// each numerically, then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial ports with deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux: pick up device nodes the enumeration API missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

fn serial_error(e: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::SerialError(e.to_string())
}

/// Open and configure a serial port (8N1, no flow control)
pub fn open_port(config: &ConnectionConfig) -> Result<Box<dyn SerialPort>> {
    let mut port = serialport::new(&config.port_name, config.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(config.timeout())
        .open()
        .map_err(serial_error)?;
    clear_buffers(port.as_mut())?;
    Ok(port)
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<()> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(serial_error)
}

/// [`Connection`] over a serial port.
///
/// Reads poll `bytes_to_read()` instead of blocking inside the driver, and
/// release the port lock between polls, so [`close`](Connection::close)
/// from another thread takes effect within one poll interval.
pub struct SerialConnection {
    port: Mutex<Option<Box<dyn SerialPort>>>,
    closed: AtomicBool,
    config: ConnectionConfig,
    span: Span,
}

impl SerialConnection {
    /// Open the port named in `config`
    pub fn open(config: ConnectionConfig) -> Result<Self> {
        let span = info_span!("cu.connection", port = %config.port_name);
        Self::open_with_span(config, span)
    }

    /// Open the port, logging under the supplied span
    pub fn open_with_span(config: ConnectionConfig, span: Span) -> Result<Self> {
        info!(parent: &span, baud = config.baud_rate, timeout_ms = config.timeout_ms, "opening serial port");
        let port = open_port(&config)?;
        info!(parent: &span, "serial port open");
        Ok(Self::from_port(port, config, span))
    }

    /// Wrap an already opened port
    pub fn from_port(port: Box<dyn SerialPort>, config: ConnectionConfig, span: Span) -> Self {
        Self {
            port: Mutex::new(Some(port)),
            closed: AtomicBool::new(false),
            config,
            span,
        }
    }

    /// The configuration this connection was opened with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn SerialPort>>> {
        // a panic while holding the lock leaves the port itself usable
        self.port.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn io_error(&self, e: std::io::Error) -> ProtocolError {
        if self.is_closed() {
            return ProtocolError::NotConnected;
        }
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ProtocolError::Timeout,
            _ => ProtocolError::IoError(e),
        }
    }
}

impl Connection for SerialConnection {
    fn send(&self, data: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::NotConnected);
        }
        let mut guard = self.lock();
        let port = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        debug!(parent: &self.span, "send {} bytes: {:?}", data.len(), String::from_utf8_lossy(data));
        port.write_all(data).map_err(|e| self.io_error(e))?;
        port.flush().map_err(|e| self.io_error(e))
    }

    fn recv(&self, max_length: usize) -> Result<Vec<u8>> {
        let timeout = self.config.timeout();
        let poll_interval = self.config.poll_interval();
        let start = Instant::now();
        let mut buffer = vec![0u8; max_length.max(1)];

        loop {
            if self.is_closed() {
                return Err(ProtocolError::NotConnected);
            }

            {
                let mut guard = self.lock();
                let port = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
                let available = port.bytes_to_read().map_err(serial_error)? as usize;

                if available > 0 {
                    let to_read = available.min(buffer.len());
                    match port.read(&mut buffer[..to_read]) {
                        Ok(0) => {}
                        Ok(n) => {
                            buffer.truncate(n);
                            debug!(parent: &self.span, "recv {} bytes: {:?}", n, String::from_utf8_lossy(&buffer));
                            return Ok(buffer);
                        }
                        Err(ref e)
                            if e.kind() == std::io::ErrorKind::TimedOut
                                || e.kind() == std::io::ErrorKind::WouldBlock => {}
                        Err(e) => return Err(self.io_error(e)),
                    }
                }
            }

            if start.elapsed() >= timeout {
                debug!(parent: &self.span, "recv timed out after {}ms", timeout.as_millis());
                return Ok(Vec::new());
            }
            std::thread::sleep(poll_interval);
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(parent: &self.span, "closing serial port");
        }
        self.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports_is_ordered_and_unique() {
        let ports = list_ports();
        let keys: Vec<_> = ports.iter().map(|p| port_sort_key(&p.name)).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));

        let mut names: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();
        names.dedup();
        assert_eq!(names.len(), ports.len());
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyACM1",
            "/dev/ttyUSB1",
            "/dev/ttyUSB10",
            "/dev/ttyACM0",
            "/dev/someport",
            "/dev/ttyUSB0",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo::bare(n.to_string()))
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB10",
                "/dev/ttyACM0",
                "/dev/ttyACM1",
                "/dev/someport",
            ]
        );
    }

    #[test]
    fn test_open_missing_port_fails() {
        let config = ConnectionConfig::new("/dev/does-not-exist-carrera");
        assert!(matches!(
            SerialConnection::open(config),
            Err(ProtocolError::SerialError(_))
        ));
    }
}
