// src/ports.rs
//
// Serial port enumeration and hot-plug detection.
// list_ports() wraps the OS enumeration; PortScanner polls it on an
// interval and publishes a ports-changed event whenever the sorted set of
// device paths differs from the previous snapshot. Enumeration failures
// are logged and treated as "no change".

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::events::{EventBus, MonitorEvent};

/// Information about an available serial device.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
    pub friendly_name: String,
}

/// List available serial ports.
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.*
/// devices. The cu (calling unit) devices are non-blocking and preferred
/// for outgoing connections; the tty devices block on open waiting for
/// carrier detect.
pub fn list_ports() -> Result<Vec<PortInfo>, String> {
    let ports = serialport::available_ports()
        .map_err(|e| format!("Failed to enumerate ports: {}", e))?;

    Ok(ports
        .into_iter()
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
        .map(|p| {
            let (manufacturer, product, serial_number, vendor_id, product_id) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                _ => (None, None, None, None, None),
            };
            let friendly_name = product.clone().unwrap_or_else(|| p.port_name.clone());
            PortInfo {
                path: p.port_name,
                manufacturer,
                serial_number,
                vendor_id,
                product_id,
                friendly_name,
            }
        })
        .collect())
}

/// Sorted path set used for delta detection between polls.
fn path_set(ports: &[PortInfo]) -> Vec<String> {
    let mut paths: Vec<String> = ports.iter().map(|p| p.path.clone()).collect();
    paths.sort();
    paths
}

/// Decide whether a poll result warrants a broadcast.
/// Exposed for tests; compares sorted path sets, not metadata.
pub(crate) fn ports_changed(previous: &[String], current: &[String]) -> bool {
    previous != current
}

/// Hot-plug poll loop. One task, stoppable, publishing PortsChanged.
pub struct PortScanner {
    bus: EventBus,
    stop_flag: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PortScanner {
    pub fn new(bus: EventBus) -> Self {
        PortScanner {
            bus,
            stop_flag: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Start polling. A second start while running is a no-op.
    pub fn start(&self, interval: Duration) {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if task.is_some() {
            return;
        }

        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = Arc::clone(&self.stop_flag);
        let bus = self.bus.clone();

        tlog!("[ports] Hot-plug polling every {:?}", interval);
        *task = Some(tokio::spawn(async move {
            let mut previous: Option<Vec<String>> = None;

            loop {
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                match list_ports() {
                    Ok(ports) => {
                        let paths = path_set(&ports);
                        let changed = previous
                            .as_deref()
                            .map(|prev| ports_changed(prev, &paths))
                            .unwrap_or(true);
                        if changed {
                            tlog!("[ports] Port set changed: {:?}", paths);
                            previous = Some(paths);
                            bus.publish(MonitorEvent::PortsChanged { ports });
                        }
                    }
                    Err(e) => {
                        // Never fatal; the next poll may succeed
                        tlog!("[ports] Enumeration failed: {}", e);
                    }
                }

                tokio::time::sleep(interval).await;
            }
        }));
    }

    /// Stop polling and wait for the task to exit.
    pub async fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
            tlog!("[ports] Hot-plug polling stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(list: &[&str]) -> Vec<String> {
        let mut v: Vec<String> = list.iter().map(|s| s.to_string()).collect();
        v.sort();
        v
    }

    #[test]
    fn test_change_detection() {
        let one = paths(&["/dev/ttyUSB0"]);
        let two = paths(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);

        assert!(ports_changed(&one, &two));
        assert!(ports_changed(&two, &one));
        // Same set again: no broadcast
        assert!(!ports_changed(&two, &two.clone()));
        assert!(!ports_changed(&[], &[]));
    }

    #[test]
    fn test_order_does_not_matter() {
        // path_set sorts, so enumeration order never causes a broadcast
        let a = vec![
            PortInfo {
                path: "/dev/ttyUSB1".to_string(),
                manufacturer: None,
                serial_number: None,
                vendor_id: None,
                product_id: None,
                friendly_name: "/dev/ttyUSB1".to_string(),
            },
            PortInfo {
                path: "/dev/ttyUSB0".to_string(),
                manufacturer: None,
                serial_number: None,
                vendor_id: None,
                product_id: None,
                friendly_name: "/dev/ttyUSB0".to_string(),
            },
        ];
        assert_eq!(path_set(&a), paths(&["/dev/ttyUSB0", "/dev/ttyUSB1"]));
    }

    #[tokio::test]
    async fn test_scanner_start_stop() {
        let bus = EventBus::new();
        let scanner = PortScanner::new(bus);
        scanner.start(Duration::from_millis(10));
        // Double start is a no-op
        scanner.start(Duration::from_millis(10));
        scanner.stop().await;
        scanner.stop().await;
    }
}
