//! Prefix-based carrier lookup and the detection strategy each carrier needs.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CarrierClass {
    Viettel,
    Vina,
    Mobifone,
    Vietnamobile,
    Unknown,
}

/// How a call on this carrier is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStrategy {
    /// CLCC polling only.
    FastPoll,
    /// CLCC polling raced against call-audio analysis.
    DualChannelAudio,
}

const VIETTEL: &[&str] = &[
    "086", "096", "097", "098", "032", "033", "034", "035", "036", "037", "038", "039",
];
const MOBIFONE: &[&str] = &["089", "090", "093", "087", "070", "079", "077", "076", "078"];
const VINA: &[&str] = &["088", "091", "094", "083", "084", "085", "081", "082"];
const VIETNAMOBILE: &[&str] = &["092", "056", "058", "059", "099"];

const MAX_NATIONAL_DIGITS: usize = 10;

impl CarrierClass {
    pub fn label(self) -> &'static str {
        match self {
            CarrierClass::Viettel => "viettel",
            CarrierClass::Vina => "vina",
            CarrierClass::Mobifone => "mobifone",
            CarrierClass::Vietnamobile => "vietnamobile",
            CarrierClass::Unknown => "unknown",
        }
    }

    /// `None` means the number is not dialed at all.
    pub fn strategy(self) -> Option<DetectionStrategy> {
        match self {
            CarrierClass::Viettel => Some(DetectionStrategy::DualChannelAudio),
            CarrierClass::Vina | CarrierClass::Mobifone | CarrierClass::Vietnamobile => {
                Some(DetectionStrategy::FastPoll)
            }
            CarrierClass::Unknown => None,
        }
    }

    pub fn needs_audio(self) -> bool {
        self.strategy() == Some(DetectionStrategy::DualChannelAudio)
    }

    /// USSD code that reports balance and own number for a SIM on this carrier.
    pub fn balance_code(self) -> &'static str {
        match self {
            CarrierClass::Vietnamobile => "*102#",
            _ => "*101#",
        }
    }
}

impl fmt::Display for CarrierClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Strip separators and fold the +84/84 country code into a leading zero.
pub fn normalize_number(raw: &str) -> String {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, ' ' | '-' | '.'))
        .collect();
    if let Some(rest) = compact.strip_prefix("+84") {
        return format!("0{rest}");
    }
    if compact.len() == 11 {
        if let Some(rest) = compact.strip_prefix("84") {
            return format!("0{rest}");
        }
    }
    compact
}

pub fn classify(number: &str) -> CarrierClass {
    let number = normalize_number(number);
    if number.len() > MAX_NATIONAL_DIGITS || !number.chars().all(|ch| ch.is_ascii_digit()) {
        return CarrierClass::Unknown;
    }
    let Some(prefix) = number.get(..3) else {
        return CarrierClass::Unknown;
    };
    let tables = [
        (CarrierClass::Viettel, VIETTEL),
        (CarrierClass::Mobifone, MOBIFONE),
        (CarrierClass::Vina, VINA),
        (CarrierClass::Vietnamobile, VIETNAMOBILE),
    ];
    tables
        .iter()
        .find(|(_, prefixes)| prefixes.contains(&prefix))
        .map(|(carrier, _)| *carrier)
        .unwrap_or(CarrierClass::Unknown)
}
