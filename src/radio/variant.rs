//! Supported chip variants and the family each one belongs to

use core::fmt;

/// Silicon family, which decides the register/command model in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipFamily {
    /// SX1276/77/78/79: register-mapped, single-byte sync word
    Sx127x,
    /// SX1262/68: command-based, two-byte sync word, BUSY handshake
    Sx126x,
}

/// Chip variant selected at configuration time
///
/// The discriminants match the numeric chip type used in existing
/// configuration files.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipVariant {
    Sx1276 = 0,
    Sx1277 = 1,
    Sx1278 = 2,
    Sx1279 = 3,
    Sx1262 = 4,
    Sx1268 = 5,
}

impl ChipVariant {
    /// Family implementing this variant
    pub fn family(self) -> ChipFamily {
        match self {
            Self::Sx1276 | Self::Sx1277 | Self::Sx1278 | Self::Sx1279 => ChipFamily::Sx127x,
            Self::Sx1262 | Self::Sx1268 => ChipFamily::Sx126x,
        }
    }

    /// Part name as printed on the package
    pub fn name(self) -> &'static str {
        match self {
            Self::Sx1276 => "SX1276",
            Self::Sx1277 => "SX1277",
            Self::Sx1278 => "SX1278",
            Self::Sx1279 => "SX1279",
            Self::Sx1262 => "SX1262",
            Self::Sx1268 => "SX1268",
        }
    }

    /// Whether the RF front end only covers the low band (137-525 MHz)
    ///
    /// Affects the RSSI offset on SX127x parts.
    pub fn is_low_band(self) -> bool {
        matches!(self, Self::Sx1278)
    }
}

impl TryFrom<u8> for ChipVariant {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Sx1276),
            1 => Ok(Self::Sx1277),
            2 => Ok(Self::Sx1278),
            3 => Ok(Self::Sx1279),
            4 => Ok(Self::Sx1262),
            5 => Ok(Self::Sx1268),
            _ => Err(value),
        }
    }
}

impl fmt::Display for ChipVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_mapping() {
        assert_eq!(ChipVariant::Sx1276.family(), ChipFamily::Sx127x);
        assert_eq!(ChipVariant::Sx1279.family(), ChipFamily::Sx127x);
        assert_eq!(ChipVariant::Sx1262.family(), ChipFamily::Sx126x);
        assert_eq!(ChipVariant::Sx1268.family(), ChipFamily::Sx126x);
    }

    #[test]
    fn test_from_config_index() {
        assert_eq!(ChipVariant::try_from(0), Ok(ChipVariant::Sx1276));
        assert_eq!(ChipVariant::try_from(4), Ok(ChipVariant::Sx1262));
        assert_eq!(ChipVariant::try_from(5), Ok(ChipVariant::Sx1268));
        // SX1280 (index 6) is a 2.4 GHz part and not supported
        assert_eq!(ChipVariant::try_from(6), Err(6));
    }
}
