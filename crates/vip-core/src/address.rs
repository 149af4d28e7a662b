//! Logical addressing
//!
//! Every ViP device is reached through a logical address instead of an
//! IP/port pair:
//! ```text
//! ┌──────────────────────────────┬────────┐
//! │ main: 8 chars [0-9A-Z]       │ sub: u8│
//! └──────────────────────────────┴────────┘
//!   "00000123"                     1
//! ```
//!
//! String forms:
//! - full: `00000123:1`
//! - stripped: `123:1`, `00000123`, `123`
//!
//! Sub-addresses:
//! - `0x00` none
//! - `0x01..=0x3F` device
//! - `0x80..=0x9F` addressable unit
//! - `0xFF` broadcast

use crate::{Error, Result};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of characters in a main address
pub const MAIN_LEN: usize = 8;

/// Encoded size of a logical address (main + sub)
pub const WIRE_LEN: usize = MAIN_LEN + 1;

/// Encoded size of an address range (two mains)
pub const RANGE_WIRE_LEN: usize = MAIN_LEN * 2;

/// No sub-address
pub const SUB_NONE: u8 = 0x00;

/// Every sub-address behind a main address
pub const SUB_BROADCAST: u8 = 0xFF;

/// First device sub-address
pub const SUB_DEVICE_MIN: u8 = 0x01;

/// Last device sub-address
pub const SUB_DEVICE_MAX: u8 = 0x3F;

/// First addressable-unit code
pub const SUB_UNIT_MIN: u8 = 0x80;

/// Last addressable-unit code
pub const SUB_UNIT_MAX: u8 = 0x9F;

const UNASSIGNED_MAIN: [u8; MAIN_LEN] = [b'0'; MAIN_LEN];

/// Largest main address expressible as a decimal integer
pub const MAX_NUMERIC_MAIN: u32 = 99_999_999;

/// A device logical address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalAddress {
    main: [u8; MAIN_LEN],
    sub: u8,
}

/// How to print an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrintForm {
    /// `00000123:1`
    #[default]
    Full,
    /// `123:1`
    NoLeadingZeros,
    /// `00000123`
    NoSub,
    /// `123`
    Short,
}

impl LogicalAddress {
    /// The reserved "unassigned" address
    pub const UNASSIGNED: LogicalAddress = LogicalAddress {
        main: UNASSIGNED_MAIN,
        sub: SUB_NONE,
    };

    /// Build from raw main bytes and a sub-address.
    ///
    /// No validation happens here; use [`LogicalAddress::is_valid`].
    pub const fn from_raw(main: [u8; MAIN_LEN], sub: u8) -> Self {
        Self { main, sub }
    }

    /// Parse from `MAIN[:SUB]`, left-padding short mains with zeros
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidAddress("empty address".to_string()));
        }

        let (main_str, sub) = match s.split_once(':') {
            Some((main, sub)) => {
                let sub = sub
                    .parse::<u8>()
                    .map_err(|_| Error::InvalidAddress(format!("bad sub-address in {}", s)))?;
                (main, sub)
            }
            None => (s, SUB_NONE),
        };

        if main_str.is_empty() || main_str.len() > MAIN_LEN {
            return Err(Error::InvalidAddress(format!(
                "main address must be 1 to {} characters: {}",
                MAIN_LEN, s
            )));
        }

        let mut main = UNASSIGNED_MAIN;
        let offset = MAIN_LEN - main_str.len();
        for (i, c) in main_str.bytes().enumerate() {
            let c = c.to_ascii_uppercase();
            if !is_main_char(c) {
                return Err(Error::InvalidAddress(format!(
                    "invalid character '{}' in {}",
                    c as char, s
                )));
            }
            main[offset + i] = c;
        }

        let addr = Self { main, sub };
        if !addr.is_sub_valid() {
            return Err(Error::InvalidAddress(format!(
                "sub-address 0x{:02x} not allowed in {}",
                sub, s
            )));
        }
        Ok(addr)
    }

    /// Build from a decimal main address
    pub fn from_u32(main: u32, sub: u8) -> Result<Self> {
        if main > MAX_NUMERIC_MAIN {
            return Err(Error::InvalidAddress(format!(
                "{} exceeds {} digits",
                main, MAIN_LEN
            )));
        }
        let digits = format!("{:08}", main);
        let mut raw = UNASSIGNED_MAIN;
        raw.copy_from_slice(digits.as_bytes());
        let addr = Self { main: raw, sub };
        if !addr.is_sub_valid() {
            return Err(Error::InvalidAddress(format!(
                "sub-address 0x{:02x} not allowed",
                sub
            )));
        }
        Ok(addr)
    }

    /// Main address characters
    pub fn main(&self) -> &[u8; MAIN_LEN] {
        &self.main
    }

    /// Main address as a string slice
    pub fn main_str(&self) -> &str {
        // Only ASCII bytes reach `main` through the constructors; raw
        // wire input is replaced lossily by `read`.
        std::str::from_utf8(&self.main).unwrap_or("????????")
    }

    /// Sub-address
    pub fn sub(&self) -> u8 {
        self.sub
    }

    /// Same main address with another sub-address
    pub fn with_sub(&self, sub: u8) -> Self {
        Self {
            main: self.main,
            sub,
        }
    }

    /// Decimal value of the main address, if it is all digits
    pub fn as_u32(&self) -> Option<u32> {
        self.main_str().parse().ok()
    }

    /// Compare main addresses only
    pub fn main_eq(&self, other: &LogicalAddress) -> bool {
        self.main == other.main
    }

    /// True for the reserved all-zero main address
    pub fn is_unassigned(&self) -> bool {
        self.main == UNASSIGNED_MAIN
    }

    /// True for the broadcast sub-address
    pub fn is_broadcast(&self) -> bool {
        self.sub == SUB_BROADCAST
    }

    /// True if the sub-address is in the device range
    pub fn is_device(&self) -> bool {
        (SUB_DEVICE_MIN..=SUB_DEVICE_MAX).contains(&self.sub)
    }

    /// True if the sub-address is an addressable-unit code
    pub fn is_unit(&self) -> bool {
        (SUB_UNIT_MIN..=SUB_UNIT_MAX).contains(&self.sub)
    }

    /// Main characters in the allowed alphabet and sub in the allowed set
    pub fn is_valid(&self) -> bool {
        self.main.iter().all(|c| is_main_char(*c)) && self.is_sub_valid()
    }

    fn is_sub_valid(&self) -> bool {
        self.sub == SUB_NONE || self.is_broadcast() || self.is_device() || self.is_unit()
    }

    /// True if `target` (possibly a broadcast sub) designates this address
    pub fn matches(&self, target: &LogicalAddress) -> bool {
        if target.is_broadcast() {
            self.main_eq(target)
        } else {
            self == target
        }
    }

    /// Print in the requested form
    pub fn format(&self, form: PrintForm) -> String {
        let main = match form {
            PrintForm::Full | PrintForm::NoSub => self.main_str(),
            PrintForm::NoLeadingZeros | PrintForm::Short => {
                let trimmed = self.main_str().trim_start_matches('0');
                if trimmed.is_empty() {
                    "0"
                } else {
                    trimmed
                }
            }
        };
        match form {
            PrintForm::Full | PrintForm::NoLeadingZeros => format!("{}:{}", main, self.sub),
            PrintForm::NoSub | PrintForm::Short => main.to_string(),
        }
    }

    /// Stripped print form, dropping leading zeros and/or the sub-address
    pub fn to_stripped(&self, strip_zeros: bool, strip_sub: bool) -> String {
        let form = match (strip_zeros, strip_sub) {
            (false, false) => PrintForm::Full,
            (true, false) => PrintForm::NoLeadingZeros,
            (false, true) => PrintForm::NoSub,
            (true, true) => PrintForm::Short,
        };
        self.format(form)
    }

    /// Write the 9-byte wire form
    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.main);
        buf.put_u8(self.sub);
    }

    /// Read the 9-byte wire form. Caller checks the length beforehand.
    pub fn read(buf: &mut impl Buf) -> Self {
        let mut main = UNASSIGNED_MAIN;
        buf.copy_to_slice(&mut main);
        for c in main.iter_mut() {
            if !c.is_ascii() {
                *c = b'?';
            }
        }
        let sub = buf.get_u8();
        Self { main, sub }
    }
}

fn is_main_char(c: u8) -> bool {
    c.is_ascii_digit() || c.is_ascii_uppercase()
}

impl Default for LogicalAddress {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.main_str(), self.sub)
    }
}

impl fmt::Debug for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalAddress({})", self)
    }
}

impl std::str::FromStr for LogicalAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LogicalAddress::parse(s)
    }
}

impl TryFrom<&str> for LogicalAddress {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        LogicalAddress::parse(s)
    }
}

impl TryFrom<String> for LogicalAddress {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        LogicalAddress::parse(&s)
    }
}

impl From<LogicalAddress> for String {
    fn from(addr: LogicalAddress) -> Self {
        addr.to_string()
    }
}

/// An inclusive range of main addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    min: [u8; MAIN_LEN],
    max: [u8; MAIN_LEN],
}

impl AddressRange {
    /// Range spanning the mains of `min` and `max` (subs are ignored)
    pub fn new(min: LogicalAddress, max: LogicalAddress) -> Self {
        Self {
            min: min.main,
            max: max.main,
        }
    }

    /// Range holding a single main address
    pub fn single(addr: LogicalAddress) -> Self {
        Self::new(addr, addr)
    }

    /// Parse `MIN-MAX` or a single `MAIN`
    pub fn parse(s: &str) -> Result<Self> {
        let range = match s.split_once('-') {
            Some((min, max)) => Self::new(LogicalAddress::parse(min)?, LogicalAddress::parse(max)?),
            None => Self::single(LogicalAddress::parse(s)?),
        };
        if !range.is_valid() {
            return Err(Error::InvalidRange(s.to_string()));
        }
        Ok(range)
    }

    /// Lower bound
    pub fn min(&self) -> LogicalAddress {
        LogicalAddress::from_raw(self.min, SUB_NONE)
    }

    /// Upper bound
    pub fn max(&self) -> LogicalAddress {
        LogicalAddress::from_raw(self.max, SUB_NONE)
    }

    /// min <= max
    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    /// True if the main of `addr` lies within the range
    pub fn contains(&self, addr: &LogicalAddress) -> bool {
        self.min <= addr.main && addr.main <= self.max
    }

    /// True unless one range lies strictly below the other
    pub fn overlaps(&self, other: &AddressRange) -> bool {
        !(self.max < other.min || other.max < self.min)
    }

    /// Write the 16-byte wire form
    pub fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.min);
        buf.put_slice(&self.max);
    }

    /// Read the 16-byte wire form. Caller checks the length beforehand.
    pub fn read(buf: &mut impl Buf) -> Self {
        let mut min = UNASSIGNED_MAIN;
        let mut max = UNASSIGNED_MAIN;
        buf.copy_to_slice(&mut min);
        buf.copy_to_slice(&mut max);
        Self { min, max }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.min().format(PrintForm::NoSub),
            self.max().format(PrintForm::NoSub)
        )
    }
}
