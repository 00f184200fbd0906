//! Volume values and unit conversion.
//!
//! A [`Volume`] is a raw value tagged with the unit range it is expressed in.
//! AVRCP absolute volume, LE Audio VCS and USB audio class volume all use
//! different ranges, and every hop between profiles converts with
//! [`Volume::convert_to`]. Construction never clamps; callers that need a
//! bounded value use [`Volume::limited`].

/// Inclusive range of raw volume values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VolumeRange {
    /// Lowest value
    pub min: i16,
    /// Highest value
    pub max: i16,
}

/// A unit range together with the number of user visible steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VolumeConfig {
    /// Raw value range
    pub range: VolumeRange,
    /// Number of discrete steps across the range
    pub number_of_steps: u16,
}

impl VolumeConfig {
    /// Width of the range
    #[must_use]
    pub const fn span(&self) -> i32 {
        self.range.max as i32 - self.range.min as i32
    }

    /// Raw distance between two adjacent steps, at least one
    #[must_use]
    pub const fn step_size(&self) -> i16 {
        let span = self.span();
        if self.number_of_steps <= 1 || span <= 0 {
            return 1;
        }
        let step = span / (self.number_of_steps as i32 - 1);
        if step < 1 { 1 } else { step as i16 }
    }

    /// Midpoint of the range
    #[must_use]
    pub const fn midpoint(&self) -> i16 {
        self.range.min + (self.span() / 2) as i16
    }
}

/// AVRCP absolute volume, 0 to 127
pub const AVRCP_VOLUME_CONFIG: VolumeConfig = VolumeConfig {
    range: VolumeRange { min: 0, max: 127 },
    number_of_steps: 127,
};

/// LE Audio VCS volume setting, 0 to 255
pub const LE_AUDIO_VOLUME_CONFIG: VolumeConfig = VolumeConfig {
    range: VolumeRange { min: 0, max: 255 },
    number_of_steps: 256,
};

/// USB audio class volume as exchanged with the host, 0 to 255
pub const USB_VOLUME_CONFIG: VolumeConfig = VolumeConfig {
    range: VolumeRange { min: 0, max: 255 },
    number_of_steps: 256,
};

/// HFP speaker gain, 0 to 15
pub const HFP_VOLUME_CONFIG: VolumeConfig = VolumeConfig {
    range: VolumeRange { min: 0, max: 15 },
    number_of_steps: 16,
};

/// A raw value in a specific unit range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Volume {
    /// Unit range `value` is expressed in
    pub config: VolumeConfig,
    /// Raw value, not guaranteed to be inside `config.range`
    pub value: i16,
}

impl Volume {
    /// Wrap a raw value
    #[must_use]
    pub const fn new(config: VolumeConfig, value: i16) -> Self {
        Self { config, value }
    }

    /// Volume at the middle of `config`
    #[must_use]
    pub const fn midpoint(config: VolumeConfig) -> Self {
        Self::new(config, config.midpoint())
    }

    /// Express this volume in `target` units, scaling by the range ratio and
    /// rounding to the nearest raw value.
    #[must_use]
    pub fn convert_to(&self, target: VolumeConfig) -> i16 {
        if self.config.range == target.range {
            return self.value;
        }
        let from_span = self.config.span();
        if from_span <= 0 {
            return target.range.min;
        }
        let offset = i32::from(self.value) - i32::from(self.config.range.min);
        let scaled = rounded_div(offset * target.span(), from_span);
        saturate(scaled + i32::from(target.range.min))
    }

    /// Convert into a new [`Volume`] tagged with `target`
    #[must_use]
    pub fn converted(&self, target: VolumeConfig) -> Self {
        Self::new(target, self.convert_to(target))
    }

    /// Clamp into the config range
    #[must_use]
    pub fn limited(&self) -> Self {
        let value = self
            .value
            .clamp(self.config.range.min, self.config.range.max);
        Self::new(self.config, value)
    }

    /// Position inside the range as a rounded percentage
    #[must_use]
    pub fn percent(&self) -> u8 {
        let span = self.config.span();
        if span <= 0 {
            return 0;
        }
        let offset = i32::from(self.limited().value) - i32::from(self.config.range.min);
        // offset is within 0..=span, so the result is within 0..=100
        u8::try_from(rounded_div(offset * 100, span)).unwrap_or(100)
    }

    /// One step up, clamped
    #[must_use]
    pub fn increment(&self) -> Self {
        Self::new(
            self.config,
            self.value.saturating_add(self.config.step_size()),
        )
        .limited()
    }

    /// One step down, clamped
    #[must_use]
    pub fn decrement(&self) -> Self {
        Self::new(
            self.config,
            self.value.saturating_sub(self.config.step_size()),
        )
        .limited()
    }

    /// Raw value clamped into `0..=255` for single byte transports
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        u8::try_from(self.value.clamp(0, 255)).unwrap_or(u8::MAX)
    }
}

/// Round-half-up integer division that behaves for negative numerators
fn rounded_div(num: i32, den: i32) -> i32 {
    (2 * num + den).div_euclid(2 * den)
}

fn saturate(value: i32) -> i16 {
    i16::try_from(value).unwrap_or(if value < 0 { i16::MIN } else { i16::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIGS: [VolumeConfig; 3] = [
        AVRCP_VOLUME_CONFIG,
        LE_AUDIO_VOLUME_CONFIG,
        USB_VOLUME_CONFIG,
    ];

    #[test]
    fn test_round_trip_within_one_step() {
        for from in CONFIGS {
            for to in CONFIGS {
                for value in from.range.min..=from.range.max {
                    let original = Volume::new(from, value);
                    let back = original.converted(to).convert_to(from);
                    assert!(
                        (back - value).abs() <= from.step_size(),
                        "{value} -> {back} via {to:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_conversion_end_points() {
        let max = Volume::new(AVRCP_VOLUME_CONFIG, 127);
        let min = Volume::new(AVRCP_VOLUME_CONFIG, 0);
        assert_eq!(max.convert_to(LE_AUDIO_VOLUME_CONFIG), 255);
        assert_eq!(min.convert_to(LE_AUDIO_VOLUME_CONFIG), 0);
        assert_eq!(
            Volume::new(LE_AUDIO_VOLUME_CONFIG, 128).convert_to(AVRCP_VOLUME_CONFIG),
            64
        );
    }

    #[test]
    fn test_conversion_does_not_clamp() {
        let over = Volume::new(AVRCP_VOLUME_CONFIG, 254);
        assert_eq!(over.convert_to(LE_AUDIO_VOLUME_CONFIG), 510);
        assert_eq!(over.limited().value, 127);
    }

    #[test]
    fn test_step_and_percent() {
        let volume = Volume::new(USB_VOLUME_CONFIG, 254);
        assert_eq!(volume.increment().value, 255);
        assert_eq!(volume.increment().increment().value, 255);
        assert_eq!(Volume::new(USB_VOLUME_CONFIG, 0).decrement().value, 0);
        assert_eq!(Volume::new(AVRCP_VOLUME_CONFIG, 127).percent(), 100);
        assert_eq!(Volume::midpoint(AVRCP_VOLUME_CONFIG).value, 63);
        assert_eq!(Volume::new(USB_VOLUME_CONFIG, 18).percent(), 7);
    }
}
