//! Output device discovery across every cpal host
//!
//! A [`DeviceId`] may name its host ("ALSA", "JACK", ...) so the same card
//! exposed through two hosts can be told apart.

use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Rates probed against each device's supported ranges
const PROBE_RATES: [u32; 5] = [22050, 44100, 48000, 88200, 96000];

/// An output device as shown to the user
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub id: DeviceId,
    pub name: String,
    pub host: String,
    /// Default output of its host
    pub is_default: bool,
    /// Entries of [`PROBE_RATES`] the device accepts, ascending
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.host, self.name)?;
        if self.is_default {
            write!(f, " (default)")?;
        }
        Ok(())
    }
}

fn host_label(id: HostId) -> String {
    match id.name() {
        "ALSA" | "Alsa" => "ALSA".into(),
        "JACK" | "Jack" => "JACK".into(),
        "WASAPI" | "Wasapi" => "WASAPI".into(),
        other => other.into(),
    }
}

/// Every host that initialises, with its display label
fn hosts() -> impl Iterator<Item = (String, Host)> {
    cpal::available_hosts().into_iter().filter_map(|id| match cpal::host_from_id(id) {
        Ok(host) => Some((host_label(id), host)),
        Err(e) => {
            log::debug!("Skipping host {}: {}", host_label(id), e);
            None
        }
    })
}

fn describe(device: &cpal::Device, host: &str, default_name: Option<&str>) -> Option<AudioDevice> {
    let name = device.name().ok()?;
    let ranges: Vec<_> = device.supported_output_configs().ok()?.collect();
    if ranges.is_empty() {
        return None;
    }

    let max_channels = ranges.iter().map(|r| r.channels()).max().unwrap_or(0);
    let sample_rates = PROBE_RATES
        .into_iter()
        .filter(|&rate| {
            ranges
                .iter()
                .any(|r| (r.min_sample_rate().0..=r.max_sample_rate().0).contains(&rate))
        })
        .collect();

    Some(AudioDevice {
        id: DeviceId::with_host(&name, host),
        is_default: default_name == Some(name.as_str()),
        name,
        host: host.to_string(),
        sample_rates,
        max_channels,
    })
}

/// Output devices of all hosts, host defaults first
pub fn get_output_devices() -> AudioResult<Vec<AudioDevice>> {
    let mut found = Vec::new();

    for (label, host) in hosts() {
        let default_name = host.default_output_device().and_then(|d| d.name().ok());
        let devices = match host.output_devices() {
            Ok(devices) => devices,
            Err(e) => {
                log::debug!("Can't list {} devices: {}", label, e);
                continue;
            }
        };
        found.extend(devices.filter_map(|d| describe(&d, &label, default_name.as_deref())));
    }

    if found.is_empty() {
        return Err(AudioError::NoDevices);
    }
    found.sort_by(|a, b| {
        (!a.is_default, &a.host, &a.name).cmp(&(!b.is_default, &b.host, &b.name))
    });

    log::debug!("Found {} output devices", found.len());
    Ok(found)
}

/// Resolve a configured device
///
/// With a host in the id only that host is searched; otherwise the first
/// device with a matching name on any host wins.
pub fn find_device_by_id(id: &DeviceId) -> AudioResult<cpal::Device> {
    let matches = |d: &cpal::Device| d.name().is_ok_and(|n| n == id.name);

    if let Some(wanted) = id.host.as_deref() {
        if let Some((_, host)) = hosts().find(|(label, _)| label == wanted) {
            return host
                .output_devices()
                .map_err(|e| AudioError::Query(e.to_string()))?
                .find(matches)
                .ok_or_else(|| AudioError::DeviceNotFound(id.name.clone()));
        }
    }

    hosts()
        .filter_map(|(_, host)| host.output_devices().ok()?.find(matches))
        .next()
        .ok_or_else(|| AudioError::DeviceNotFound(id.name.clone()))
}

/// Default output device of the default host
pub fn get_default_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::NoDefaultDevice)
}
