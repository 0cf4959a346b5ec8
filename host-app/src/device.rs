//! Device information sections.

use std::collections::BTreeMap;
use std::thread;

use tracing::warn;

use snaply_capture::DisplayMetrics;
use snaply_ipc::DeviceInfo;

use crate::error::HostError;

const BYTES_IN_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One named section of device information.
#[derive(Debug)]
pub struct DeviceInfoSection {
    /// Section name, e.g. `device` or `screen`.
    pub name: String,

    /// Entries, or why the section could not be read.
    pub entries: Result<BTreeMap<String, String>, HostError>,
}

impl DeviceInfoSection {
    /// A section that was read successfully.
    pub fn ok<I, K, V>(name: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.to_string(),
            entries: Ok(entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect()),
        }
    }

    /// A section that could not be read.
    pub fn failed(name: &str, err: HostError) -> Self {
        Self {
            name: name.to_string(),
            entries: Err(err),
        }
    }
}

/// Host source of device information.
pub trait DeviceInfoProvider: Send + Sync {
    /// Read every section the host knows about.
    fn sections(&self) -> Vec<DeviceInfoSection>;
}

/// Merge the readable sections. Failed sections are logged and left out.
pub fn collect_device_info(provider: &dyn DeviceInfoProvider) -> DeviceInfo {
    let mut info = DeviceInfo::new();
    for section in provider.sections() {
        match section.entries {
            Ok(entries) => {
                info.insert(section.name, entries);
            }
            Err(e) => warn!(section = %section.name, "Skipping device info section: {}", e),
        }
    }
    info
}

/// Format a byte count as gigabytes with one decimal.
pub fn format_gigabytes(bytes: u64) -> String {
    format!("{:.1} GB", bytes as f64 / BYTES_IN_GB)
}

/// Device information available from the standard library.
#[derive(Debug, Clone, Default)]
pub struct LocalDeviceInfo {
    display: Option<DisplayMetrics>,
}

impl LocalDeviceInfo {
    /// Create a provider, optionally reporting a display.
    pub fn new(display: Option<DisplayMetrics>) -> Self {
        Self { display }
    }
}

impl DeviceInfoProvider for LocalDeviceInfo {
    fn sections(&self) -> Vec<DeviceInfoSection> {
        let mut sections = vec![DeviceInfoSection::ok(
            "device",
            [
                ("os", std::env::consts::OS),
                ("family", std::env::consts::FAMILY),
                ("arch", std::env::consts::ARCH),
            ],
        )];

        sections.push(match thread::available_parallelism() {
            Ok(n) => DeviceInfoSection::ok("system", [("available_processors", n.to_string())]),
            Err(e) => {
                DeviceInfoSection::failed("system", HostError::SectionUnavailable(e.to_string()))
            }
        });

        sections.push(match &self.display {
            Some(m) if m.is_valid() => DeviceInfoSection::ok(
                "screen",
                [
                    ("resolution", format!("{}x{}", m.width_px, m.height_px)),
                    ("density_dpi", m.density_dpi.to_string()),
                ],
            ),
            _ => DeviceInfoSection::failed(
                "screen",
                HostError::SectionUnavailable("no display metrics".into()),
            ),
        });

        sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PartialProvider;

    impl DeviceInfoProvider for PartialProvider {
        fn sections(&self) -> Vec<DeviceInfoSection> {
            vec![
                DeviceInfoSection::ok("device", [("model", "Pixel")]),
                DeviceInfoSection::failed(
                    "network",
                    HostError::SectionUnavailable("no connectivity service".into()),
                ),
            ]
        }
    }

    #[test]
    fn test_failed_sections_are_dropped() {
        let info = collect_device_info(&PartialProvider);
        assert_eq!(info.len(), 1);
        assert_eq!(info["device"]["model"], "Pixel");
        assert!(!info.contains_key("network"));
    }

    #[test]
    fn test_format_gigabytes() {
        assert_eq!(format_gigabytes(0), "0.0 GB");
        assert_eq!(format_gigabytes(3 * 1024 * 1024 * 1024 / 2), "1.5 GB");
    }

    #[test]
    fn test_local_info_without_display() {
        let info = collect_device_info(&LocalDeviceInfo::default());
        assert_eq!(info["device"]["os"], std::env::consts::OS);
        assert!(!info.contains_key("screen"));

        let info = collect_device_info(&LocalDeviceInfo::new(Some(DisplayMetrics::new(
            1080, 2400, 420,
        ))));
        assert_eq!(info["screen"]["resolution"], "1080x2400");
    }
}
