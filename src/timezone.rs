//! # Local Timezone Module
//!
//! Converte gli istanti UTC dell'export nell'ora locale dell'utente.
//!
//! ## Responsabilità:
//! - Parsing dell'identificatore di timezone configurato
//! - Calcolo dell'anno locale usato per il bucketing delle directory
//! - Ora locale + offset per i campi metadata (EXIF / QuickTime)
//!
//! ## Formati accettati:
//! - Nomi IANA: `Europe/Oslo`, `America/New_York`
//! - Offset fissi: `UTC`, `UTC+5`, `UTC-05:30`, `+02:00`

use crate::error::ArchiveError;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Offset, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

/// Timezone used for year bucketing and embedded local times
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl LocalZone {
    pub fn utc() -> Self {
        Self::Fixed(Utc.fix())
    }

    /// Wall-clock time and UTC offset of `instant` in this zone
    pub fn localize(&self, instant: DateTime<Utc>) -> (NaiveDateTime, FixedOffset) {
        match self {
            LocalZone::Named(tz) => {
                let local = instant.with_timezone(tz);
                (local.naive_local(), local.offset().fix())
            }
            LocalZone::Fixed(offset) => {
                let local = instant.with_timezone(offset);
                (local.naive_local(), *offset)
            }
        }
    }

    /// Calendar year the user experienced `instant` in
    pub fn year_of(&self, instant: DateTime<Utc>) -> i32 {
        self.localize(instant).0.year()
    }

    fn parse_offset(raw: &str) -> Option<FixedOffset> {
        let (sign, rest) = match raw.as_bytes().first()? {
            b'+' => (1, &raw[1..]),
            b'-' => (-1, &raw[1..]),
            _ => return None,
        };
        let (hours, minutes) = match rest.split_once(':') {
            Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
            None if rest.len() == 4 => (rest.get(..2)?.parse::<i32>().ok()?, rest.get(2..)?.parse::<i32>().ok()?),
            None => (rest.parse::<i32>().ok()?, 0),
        };
        if hours > 14 || minutes >= 60 {
            return None;
        }
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
    }
}

impl FromStr for LocalZone {
    type Err = ArchiveError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let upper = trimmed.to_ascii_uppercase();

        if upper == "UTC" || upper == "Z" {
            return Ok(Self::utc());
        }

        let offset_part = upper
            .strip_prefix("UTC")
            .or_else(|| upper.strip_prefix("GMT"))
            .unwrap_or(&upper);
        if offset_part.starts_with('+') || offset_part.starts_with('-') {
            return Self::parse_offset(offset_part)
                .map(LocalZone::Fixed)
                .ok_or_else(|| ArchiveError::Config(format!("Invalid UTC offset: {}", raw)));
        }

        trimmed
            .parse::<Tz>()
            .map(LocalZone::Named)
            .map_err(|e| ArchiveError::Config(format!("Unknown timezone '{}': {}", raw, e)))
    }
}

impl fmt::Display for LocalZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalZone::Named(tz) => write!(f, "{}", tz.name()),
            LocalZone::Fixed(offset) => write!(f, "UTC{}", offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn new_years_eve() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 31, 23, 30, 0).unwrap()
    }

    #[test]
    fn test_year_bucket_west_of_utc_stays_in_old_year() {
        let zone: LocalZone = "UTC-5".parse().unwrap();
        let (local, _) = zone.localize(new_years_eve());
        assert_eq!(zone.year_of(new_years_eve()), 2024);
        assert_eq!((local.hour(), local.minute()), (18, 30));
    }

    #[test]
    fn test_year_bucket_east_of_utc_moves_to_new_year() {
        let zone: LocalZone = "UTC+5".parse().unwrap();
        let (local, _) = zone.localize(new_years_eve());
        assert_eq!(zone.year_of(new_years_eve()), 2025);
        assert_eq!((local.day(), local.hour(), local.minute()), (1, 4, 30));
    }

    #[test]
    fn test_named_zone_uses_dst_offset() {
        let zone: LocalZone = "Europe/Oslo".parse().unwrap();
        let summer = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        let (_, offset) = zone.localize(summer);
        assert_eq!(offset.local_minus_utc(), 2 * 3600);
        assert_eq!(zone.to_string(), "Europe/Oslo");
    }

    #[test]
    fn test_offset_spellings() {
        let half: LocalZone = "UTC+05:30".parse().unwrap();
        assert_eq!(half, LocalZone::Fixed(FixedOffset::east_opt(5 * 3600 + 1800).unwrap()));
        let bare: LocalZone = "-0800".parse().unwrap();
        assert_eq!(bare, LocalZone::Fixed(FixedOffset::west_opt(8 * 3600).unwrap()));
        assert_eq!("utc".parse::<LocalZone>().unwrap(), LocalZone::utc());
    }

    #[test]
    fn test_invalid_zones_rejected() {
        assert!("Mars/Olympus".parse::<LocalZone>().is_err());
        assert!("UTC+99".parse::<LocalZone>().is_err());
        assert!("UTC+ab".parse::<LocalZone>().is_err());
        assert!("UTC+aé1".parse::<LocalZone>().is_err());
        assert!("+é12".parse::<LocalZone>().is_err());
    }
}
