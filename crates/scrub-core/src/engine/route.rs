//! Output routing: which sound channels feed which device channels
//!
//! One [`RouteMatrix`] per output device table. The mixer only uses table 0
//! (the device the hub was initialized with); further tables are carried so
//! persisted routes survive a round trip untouched.
//!
//! Persisted form is a flat list of `u16` words:
//!
//! ```text
//! [device_count, rows, cols, f(0,0) .. f(0,cols-1), f(1,0) .. , rows, cols, ..]
//! ```

use super::error::{EngineError, EngineResult, RouteError};
use crate::types::MAX_CHANNELS;

/// Bitmask of device channels fed by one source channel
pub type RouteMask = u16;

/// Source channels (rows) by device channels (columns)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatrix {
    rows: usize,
    cols: usize,
    flags: Vec<bool>,
}

impl RouteMatrix {
    /// Matrix with nothing routed
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            flags: vec![false; rows * cols],
        }
    }

    /// Mono feeds every device channel; otherwise channel `c` feeds `c % cols`
    pub fn default_for(source_channels: usize, device_channels: usize) -> Self {
        let mut matrix = Self::new(source_channels, device_channels);
        if device_channels == 0 {
            return matrix;
        }
        for src in 0..source_channels {
            if source_channels == 1 {
                for dst in 0..device_channels {
                    matrix.flags[dst] = true;
                }
            } else {
                matrix.flags[src * device_channels + src % device_channels] = true;
            }
        }
        matrix
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Whether `src` feeds `dst`; out-of-range pairs are never routed
    pub fn is_routed(&self, src: usize, dst: usize) -> bool {
        src < self.rows && dst < self.cols && self.flags[src * self.cols + dst]
    }

    pub fn set(&mut self, src: usize, dst: usize, on: bool) -> EngineResult<()> {
        if src >= self.rows {
            return Err(EngineError::InvalidChannel {
                channel: src,
                count: self.rows,
            });
        }
        if dst >= self.cols {
            return Err(EngineError::InvalidChannel {
                channel: dst,
                count: self.cols,
            });
        }
        self.flags[src * self.cols + dst] = on;
        Ok(())
    }

    /// Per-source bitmasks for the mixer
    pub fn masks(&self) -> [RouteMask; MAX_CHANNELS] {
        let mut masks = [0; MAX_CHANNELS];
        for (src, mask) in masks.iter_mut().enumerate().take(self.rows) {
            for dst in 0..self.cols.min(MAX_CHANNELS) {
                if self.flags[src * self.cols + dst] {
                    *mask |= 1 << dst;
                }
            }
        }
        masks
    }
}

/// Default routing as mixer bitmasks, without building a matrix
pub fn default_masks(source_channels: usize, device_channels: usize) -> [RouteMask; MAX_CHANNELS] {
    let mut masks = [0; MAX_CHANNELS];
    let device_channels = device_channels.min(MAX_CHANNELS);
    if device_channels == 0 {
        return masks;
    }
    for (src, mask) in masks.iter_mut().enumerate().take(source_channels) {
        *mask = if source_channels == 1 {
            ((1u32 << device_channels) - 1) as RouteMask
        } else {
            1 << (src % device_channels)
        };
    }
    masks
}

/// Routing tables for every output device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRoute {
    devices: Vec<RouteMatrix>,
}

impl OutputRoute {
    pub fn new(devices: Vec<RouteMatrix>) -> Self {
        Self { devices }
    }

    /// Default table for each device channel count
    pub fn default_for(source_channels: usize, device_channels: &[usize]) -> Self {
        Self {
            devices: device_channels
                .iter()
                .map(|&cols| RouteMatrix::default_for(source_channels, cols))
                .collect(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, index: usize) -> Option<&RouteMatrix> {
        self.devices.get(index)
    }

    pub fn device_mut(&mut self, index: usize) -> Option<&mut RouteMatrix> {
        self.devices.get_mut(index)
    }

    /// Table the mixer uses
    pub fn primary(&self) -> Option<&RouteMatrix> {
        self.devices.first()
    }

    pub fn to_words(&self) -> Vec<u16> {
        let mut words = vec![self.devices.len() as u16];
        for m in &self.devices {
            words.push(m.rows as u16);
            words.push(m.cols as u16);
            words.extend(m.flags.iter().map(|&f| f as u16));
        }
        words
    }

    pub fn from_words(words: &[u16]) -> Result<Self, RouteError> {
        let need = |expected: usize| -> Result<(), RouteError> {
            if words.len() < expected {
                Err(RouteError::Truncated {
                    expected,
                    got: words.len(),
                })
            } else {
                Ok(())
            }
        };

        need(1)?;
        let count = words[0] as usize;
        let mut pos = 1;
        let mut devices = Vec::with_capacity(count.min(MAX_CHANNELS));

        for _ in 0..count {
            need(pos + 2)?;
            let rows = words[pos] as usize;
            let cols = words[pos + 1] as usize;
            if rows > MAX_CHANNELS || cols > MAX_CHANNELS {
                return Err(RouteError::TooLarge { rows, cols });
            }
            pos += 2;

            need(pos + rows * cols)?;
            let flags = words[pos..pos + rows * cols]
                .iter()
                .enumerate()
                .map(|(i, &w)| match w {
                    0 => Ok(false),
                    1 => Ok(true),
                    value => Err(RouteError::BadFlag {
                        index: pos + i,
                        value,
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            pos += rows * cols;

            devices.push(RouteMatrix { rows, cols, flags });
        }

        if pos != words.len() {
            return Err(RouteError::Trailing(words.len() - pos));
        }
        Ok(Self { devices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mono_feeds_all() {
        let m = RouteMatrix::default_for(1, 4);
        for dst in 0..4 {
            assert!(m.is_routed(0, dst));
        }
        assert_eq!(m.masks()[0], 0b1111);
        assert_eq!(default_masks(1, 4)[0], 0b1111);
    }

    #[test]
    fn test_default_wraps_extra_channels() {
        let m = RouteMatrix::default_for(4, 2);
        assert!(m.is_routed(0, 0));
        assert!(m.is_routed(1, 1));
        assert!(m.is_routed(2, 0));
        assert!(m.is_routed(3, 1));
        assert!(!m.is_routed(0, 1));
        assert_eq!(m.masks(), default_masks(4, 2));
    }

    #[test]
    fn test_set_bounds() {
        let mut m = RouteMatrix::new(2, 2);
        m.set(1, 0, true).unwrap();
        assert!(m.is_routed(1, 0));
        assert!(m.set(2, 0, true).is_err());
        assert!(m.set(0, 5, true).is_err());
        assert!(!m.is_routed(9, 9));
    }

    #[test]
    fn test_word_format() {
        let route = OutputRoute::default_for(2, &[2]);
        assert_eq!(route.to_words(), vec![1, 2, 2, 1, 0, 0, 1]);

        let two = OutputRoute::default_for(1, &[2, 1]);
        let words = two.to_words();
        assert_eq!(words, vec![2, 1, 2, 1, 1, 1, 1, 1]);
        assert_eq!(OutputRoute::from_words(&words).unwrap(), two);
    }

    #[test]
    fn test_malformed_words() {
        assert!(matches!(
            OutputRoute::from_words(&[]),
            Err(RouteError::Truncated { .. })
        ));
        assert!(matches!(
            OutputRoute::from_words(&[1, 2, 2, 1, 0]),
            Err(RouteError::Truncated { .. })
        ));
        assert!(matches!(
            OutputRoute::from_words(&[1, 1, 1, 7]),
            Err(RouteError::BadFlag { index: 3, value: 7 })
        ));
        assert!(matches!(
            OutputRoute::from_words(&[1, 1, 1, 1, 0]),
            Err(RouteError::Trailing(1))
        ));
        assert!(matches!(
            OutputRoute::from_words(&[1, 40, 2]),
            Err(RouteError::TooLarge { .. })
        ));
    }
}
