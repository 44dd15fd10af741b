use serde_derive::Deserialize;

/// Byte positions of the readings inside the fixed-layout SML frame a meter
/// emits. The defaults fit a Landis+Gyr E220.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FrameLayout {
    /// 4-byte signed big-endian net active power in W.
    pub power_offset: usize,
    /// 8-byte unsigned big-endian energy counter in 0.1 Wh.
    pub energy_offset: usize,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            power_offset: 12 * 16 + 4 + 8,
            energy_offset: 10 * 16 + 8 + 8,
        }
    }
}

impl FrameLayout {
    /// Net active power, zero when the frame is too short.
    pub fn power_w(&self, frame: &[u8]) -> i32 {
        field::<4>(frame, self.power_offset)
            .map(i32::from_be_bytes)
            .unwrap_or(0)
    }

    /// Cumulative energy in Wh, zero when the frame is too short.
    pub fn energy_wh(&self, frame: &[u8]) -> f64 {
        field::<8>(frame, self.energy_offset)
            .map(|bytes| u64::from_be_bytes(bytes) as f64 / 10.)
            .unwrap_or(0.)
    }

    /// Length needed to hold both readings.
    pub fn required_len(&self) -> usize {
        (self.power_offset.saturating_add(4)).max(self.energy_offset.saturating_add(8))
    }
}

fn field<const N: usize>(frame: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    frame.get(offset..end)?.try_into().ok()
}
