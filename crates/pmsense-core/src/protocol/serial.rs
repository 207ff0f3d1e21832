//! Serial port handling
//!
//! Low-level port access for the sensor UART.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use tracing::{debug, info};

use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_IO_TIMEOUT_MS};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => Self {
                name: info.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
                serial_number: usb_info.serial_number,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key for port names
///
/// USB-serial bridges (ttyUSB*, where the sensor's CH340 shows up) come
/// first, then ttyACM*, both numerically by suffix, then everything else
/// by name.
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

/// List available serial ports in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux: udev-less systems may hide ports from the enumeration API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") || fname.starts_with("ttyACM") {
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

/// Open a serial port
///
/// `timeout` bounds every individual read and write call.
pub fn open_port(
    name: &str,
    baud_rate: Option<u32>,
    timeout: Option<Duration>,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
    let timeout = timeout.unwrap_or(Duration::from_millis(DEFAULT_IO_TIMEOUT_MS));

    info!("opening serial port {} at {} baud", name, baud);
    serialport::new(name, baud)
        .timeout(timeout)
        .open()
        .map_err(|e| ProtocolError::TransportOpen {
            port: name.to_string(),
            reason: e.to_string(),
        })
}

/// Configure a port for the sensor: 8N1, no flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    let port_name = port.name().unwrap_or_default();
    let open_err = |e: serialport::Error| ProtocolError::TransportOpen {
        port: port_name.clone(),
        reason: e.to_string(),
    };
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(open_err)?;
    port.set_parity(serialport::Parity::None).map_err(open_err)?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(open_err)?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(open_err)?;
    debug!("configure_port: 8N1, no flow control");
    Ok(())
}
