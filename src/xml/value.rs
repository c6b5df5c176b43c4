use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::XmlMapperOptions;

/// A leaf value converted from element or attribute text.
pub trait XmlValue: Sized + Send + 'static {
    /// Kind name reported in conversion errors.
    const KIND: &'static str;

    /// Empty text leaves the field untouched instead of being converted.
    const SKIPS_EMPTY: bool = false;

    fn from_xml_text(text: &str, options: &XmlMapperOptions) -> Result<Self, String>;
}

impl XmlValue for String {
    const KIND: &'static str = "string";

    fn from_xml_text(text: &str, _options: &XmlMapperOptions) -> Result<Self, String> {
        Ok(text.to_owned())
    }
}

impl XmlValue for bool {
    const KIND: &'static str = "boolean";

    fn from_xml_text(text: &str, _options: &XmlMapperOptions) -> Result<Self, String> {
        match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(format!("{other:?} is not a boolean literal")),
        }
    }
}

macro_rules! impl_numeric_value {
    ($($ty:ty => $kind:literal),+ $(,)?) => {
        $(
            impl XmlValue for $ty {
                const KIND: &'static str = $kind;

                fn from_xml_text(text: &str, _options: &XmlMapperOptions) -> Result<Self, String> {
                    text.trim().parse::<$ty>().map_err(|error| error.to_string())
                }
            }
        )+
    };
}

impl_numeric_value!(
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    isize => "isize",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    usize => "usize",
    f32 => "f32",
    f64 => "f64",
);

impl XmlValue for Decimal {
    const KIND: &'static str = "decimal";

    fn from_xml_text(text: &str, _options: &XmlMapperOptions) -> Result<Self, String> {
        Decimal::from_str(text.trim()).map_err(|error| error.to_string())
    }
}

impl XmlValue for Uuid {
    const KIND: &'static str = "uuid";

    fn from_xml_text(text: &str, _options: &XmlMapperOptions) -> Result<Self, String> {
        if text.is_empty() {
            return Ok(Uuid::nil());
        }
        Uuid::parse_str(text.trim()).map_err(|error| error.to_string())
    }
}

/// Absolute URL or a relative reference kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UriRef {
    Absolute(url::Url),
    Relative(String),
}

impl UriRef {
    pub fn parse(text: &str) -> Result<Self, url::ParseError> {
        match url::Url::parse(text) {
            Ok(url) => Ok(Self::Absolute(url)),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Self::Relative(text.to_owned())),
            Err(error) => Err(error),
        }
    }

    pub fn is_absolute(&self) -> bool {
        matches!(self, Self::Absolute(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Absolute(url) => url.as_str(),
            Self::Relative(text) => text,
        }
    }
}

impl Default for UriRef {
    fn default() -> Self {
        Self::Relative(String::new())
    }
}

impl std::fmt::Display for UriRef {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl XmlValue for UriRef {
    const KIND: &'static str = "uri";

    fn from_xml_text(text: &str, _options: &XmlMapperOptions) -> Result<Self, String> {
        UriRef::parse(text.trim()).map_err(|error| error.to_string())
    }
}

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d %B %Y", "%B %d, %Y"];

fn parse_naive_lenient(text: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_utc());
    }
    DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .map(|date| date.and_time(NaiveTime::MIN))
        })
        .or_else(|| {
            DateTime::parse_from_rfc2822(text)
                .ok()
                .map(|parsed| parsed.naive_utc())
        })
}

impl XmlValue for NaiveDateTime {
    const KIND: &'static str = "date-time";

    fn from_xml_text(text: &str, options: &XmlMapperOptions) -> Result<Self, String> {
        let text = text.trim();
        if let Some(format) = options.date_format.as_deref() {
            return NaiveDateTime::parse_from_str(text, format)
                .or_else(|error| {
                    NaiveDate::parse_from_str(text, format)
                        .map(|date| date.and_time(NaiveTime::MIN))
                        .map_err(|_| error)
                })
                .map_err(|error| format!("does not match format {format:?}: {error}"));
        }
        parse_naive_lenient(text).ok_or_else(|| "unrecognized date/time".to_owned())
    }
}

impl XmlValue for DateTime<FixedOffset> {
    const KIND: &'static str = "date-time-offset";
    const SKIPS_EMPTY: bool = true;

    fn from_xml_text(text: &str, _options: &XmlMapperOptions) -> Result<Self, String> {
        let text = text.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Ok(parsed);
        }
        if let Ok(parsed) = DateTime::parse_from_rfc2822(text) {
            return Ok(parsed);
        }
        // Offset-less text is taken as UTC.
        DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f %z")
            .ok()
            .or_else(|| parse_naive_lenient(text).map(|naive| naive.and_utc().fixed_offset()))
            .ok_or_else(|| "unrecognized date/time with offset".to_owned())
    }
}

impl XmlValue for TimeDelta {
    const KIND: &'static str = "duration";

    fn from_xml_text(text: &str, _options: &XmlMapperOptions) -> Result<Self, String> {
        parse_iso_duration(text.trim())
    }
}

impl<V: XmlValue> XmlValue for Option<V> {
    const KIND: &'static str = V::KIND;

    fn from_xml_text(text: &str, options: &XmlMapperOptions) -> Result<Self, String> {
        if text.is_empty() {
            return Ok(None);
        }
        V::from_xml_text(text, options).map(Some)
    }
}

const SECONDS_PER_DAY: i64 = 86_400;

/// Parses `[-]PnYnMnDTnHnMn.nS`. Years count as 365 days and months as 30.
fn parse_iso_duration(text: &str) -> Result<TimeDelta, String> {
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let Some(body) = unsigned.strip_prefix('P') else {
        return Err("duration must start with 'P'".to_owned());
    };
    let (date_part, time_part) = match body.split_once('T') {
        Some((_, "")) => return Err("time designator without components".to_owned()),
        Some((date, time)) => (date, Some(time)),
        None => (body, None),
    };

    let mut seconds = 0_i64;
    let mut nanos = 0_u32;
    let mut components = 0;

    components += accumulate(
        date_part,
        &[('Y', 365 * SECONDS_PER_DAY), ('M', 30 * SECONDS_PER_DAY), ('D', SECONDS_PER_DAY)],
        &mut seconds,
        &mut nanos,
    )?;
    if let Some(time_part) = time_part {
        components += accumulate(time_part, &[('H', 3_600), ('M', 60), ('S', 1)], &mut seconds, &mut nanos)?;
    }
    if components == 0 {
        return Err("duration has no components".to_owned());
    }

    let delta = TimeDelta::new(seconds, nanos).ok_or_else(|| "duration out of range".to_owned())?;
    Ok(if negative { -delta } else { delta })
}

fn accumulate(
    part: &str,
    units: &[(char, i64)],
    seconds: &mut i64,
    nanos: &mut u32,
) -> Result<usize, String> {
    let mut rest = part;
    let mut next_unit = 0;
    let mut count = 0;

    while !rest.is_empty() {
        let Some(end) = rest.find(|c: char| !c.is_ascii_digit() && c != '.') else {
            return Err(format!("missing designator after {rest:?}"));
        };
        let (number, tail) = rest.split_at(end);
        let mut chars = tail.chars();
        let designator = chars.next().unwrap_or_default();
        rest = chars.as_str();

        let Some(offset) = units[next_unit..]
            .iter()
            .position(|(unit, _)| *unit == designator)
        else {
            return Err(format!("unexpected designator {designator:?}"));
        };
        let (_, unit_seconds) = units[next_unit + offset];
        next_unit += offset + 1;

        let (whole, fraction) = match number.split_once('.') {
            Some((whole, fraction)) if designator == 'S' => (whole, Some(fraction)),
            Some(_) => return Err(format!("fraction not allowed on {designator:?}")),
            None => (number, None),
        };
        if whole.is_empty() {
            return Err(format!("missing amount before {designator:?}"));
        }
        let amount: i64 = whole.parse().map_err(|_| format!("invalid amount {whole:?}"))?;
        *seconds = amount
            .checked_mul(unit_seconds)
            .and_then(|value| seconds.checked_add(value))
            .ok_or_else(|| "duration out of range".to_owned())?;
        if let Some(fraction) = fraction {
            let digits: String = fraction.chars().take(9).collect();
            let padded = format!("{digits:0<9}");
            *nanos = padded
                .parse()
                .map_err(|_| format!("invalid fraction {fraction:?}"))?;
        }
        count += 1;
    }
    Ok(count)
}

/// Resolves enum text: exact member name, then case-insensitive name, then
/// the numeric value of a defined member.
pub fn parse_enum<E: Copy>(text: &str, members: &[(&str, i64, E)]) -> Result<E, String> {
    let text = text.trim();
    if let Some((_, _, member)) = members.iter().find(|(name, _, _)| *name == text) {
        return Ok(*member);
    }
    if let Some((_, _, member)) = members
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(text))
    {
        return Ok(*member);
    }
    let numeric: i64 = text
        .parse()
        .map_err(|_| format!("{text:?} is neither a member name nor a number"))?;
    members
        .iter()
        .find(|(_, value, _)| *value == numeric)
        .map(|(_, _, member)| *member)
        .ok_or_else(|| format!("{numeric} is not a defined member"))
}

/// Implements [`XmlValue`] for a fieldless `Copy` enum, matching member
/// names first and discriminants second.
///
/// ```
/// #[derive(Clone, Copy, Debug, Default, PartialEq)]
/// enum Level {
///     #[default]
///     Low = 1,
///     High = 5,
/// }
///
/// restpipe::xml_enum!(Level { Low, High });
/// ```
#[macro_export]
macro_rules! xml_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::xml::XmlValue for $ty {
            const KIND: &'static str = "enum";

            fn from_xml_text(
                text: &str,
                _options: &$crate::xml::XmlMapperOptions,
            ) -> ::std::result::Result<Self, ::std::string::String> {
                $crate::xml::parse_enum(
                    text,
                    &[$((stringify!($variant), $ty::$variant as i64, $ty::$variant)),+],
                )
            }
        }
    };
}
