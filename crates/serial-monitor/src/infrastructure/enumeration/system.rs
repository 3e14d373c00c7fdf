//! Enumerates the ports the OS reports via `serialport::available_ports`.

use serialport::SerialPortType;

use super::{EnumerationError, PortEnumerator, PortInfo};

/// Production enumerator backed by the OS port list.
///
/// The OS list does not say whether a port is held open elsewhere, so
/// `busy` is always reported as `false` here.
#[derive(Debug, Default, Clone)]
pub struct SystemPortEnumerator;

impl SystemPortEnumerator {
    pub fn new() -> Self {
        Self
    }
}

impl PortEnumerator for SystemPortEnumerator {
    fn enumerate(&self) -> Result<Vec<PortInfo>, EnumerationError> {
        let ports = serialport::available_ports()
            .map_err(|e| EnumerationError::Backend(e.to_string()))?;

        Ok(ports
            .into_iter()
            // On macOS only the /dev/cu.* calling units are useful to open.
            .filter(|_p| {
                #[cfg(target_os = "macos")]
                {
                    !_p.port_name.starts_with("/dev/tty.")
                }
                #[cfg(not(target_os = "macos"))]
                {
                    true
                }
            })
            .map(|p| describe(p.port_name, p.port_type))
            .collect())
    }
}

fn describe(name: String, port_type: SerialPortType) -> PortInfo {
    let mut info = PortInfo::named(name);
    match port_type {
        SerialPortType::UsbPort(usb) => {
            info.description = usb.product.unwrap_or_else(|| "USB serial".to_string());
            info.manufacturer = usb.manufacturer.unwrap_or_default();
            info.serial_number = usb.serial_number.unwrap_or_default();
            info.vendor_id = Some(usb.vid);
            info.product_id = Some(usb.pid);
        }
        SerialPortType::BluetoothPort => info.description = "Bluetooth".to_string(),
        SerialPortType::PciPort => info.description = "PCI".to_string(),
        SerialPortType::Unknown => {}
    }
    info
}
