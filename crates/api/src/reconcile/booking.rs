//! Transcript heuristics and booking argument parsing

use serde_json::Value;
use time::{macros::format_description, Date, Time};

/// Phrases the assistant says when it has booked something.
pub const BOOKING_PHRASES: [&str; 4] = [
    "appointment confirmed",
    "booked you for",
    "scheduled for",
    "see you on",
];

pub const DEFAULT_BOOKING_TIME: &str = "9:00 AM";

/// Case-insensitive match of the transcript against [`BOOKING_PHRASES`].
pub fn detect_appointment_booked(transcript: &str) -> bool {
    let transcript = transcript.to_lowercase();
    BOOKING_PHRASES
        .iter()
        .any(|phrase| transcript.contains(phrase))
}

/// True when any non-blank keyword occurs in the transcript, ignoring case.
pub fn detect_emergency(transcript: &str, keywords: &[String]) -> bool {
    let transcript = transcript.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .any(|k| transcript.contains(&k))
}

/// `YYYY-MM-DD`
pub fn parse_booking_date(input: &str) -> Option<Date> {
    Date::parse(input.trim(), format_description!("[year]-[month]-[day]")).ok()
}

/// `h:MM AM/PM` (case-insensitive, space optional) or 24-hour `HH:MM`.
pub fn parse_booking_time(input: &str) -> Option<Time> {
    let normalized = input.trim().to_uppercase();

    let (clock, meridiem) = if let Some(rest) = normalized.strip_suffix("AM") {
        (rest.trim_end(), Some(false))
    } else if let Some(rest) = normalized.strip_suffix("PM") {
        (rest.trim_end(), Some(true))
    } else {
        (normalized.as_str(), None)
    };

    let (hour, minute) = clock.split_once(':')?;
    if minute.len() != 2 {
        return None;
    }
    let hour: u8 = hour.parse().ok()?;
    let minute: u8 = minute.parse().ok()?;

    let hour = match meridiem {
        Some(is_pm) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            match (hour, is_pm) {
                (12, false) => 0,
                (12, true) => 12,
                (h, true) => h + 12,
                (h, false) => h,
            }
        }
        None => hour,
    };

    Time::from_hms(hour, minute, 0).ok()
}

/// A booking argument that was sent but is neither text nor a number.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unreadable booking argument `{0}`")]
pub struct UnreadableArgument(pub &'static str);

/// Arguments of a `bookAppointment` function call. Blank values are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingArgs {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub customer_address: Option<String>,
    pub service_type: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub notes: Option<String>,
}

impl BookingArgs {
    /// Reads each field on its own. Numbers are taken as text, so a phone
    /// number the model emitted as digits still lands. The parameters may
    /// also arrive as a JSON-encoded string.
    pub fn from_parameters(parameters: &Value) -> Result<Self, UnreadableArgument> {
        let decoded;
        let parameters = match parameters {
            Value::String(raw) => {
                decoded = serde_json::from_str::<Value>(raw)
                    .map_err(|_| UnreadableArgument("parameters"))?;
                &decoded
            }
            other => other,
        };

        match parameters {
            Value::Null => return Ok(Self::default()),
            Value::Object(_) => {}
            _ => return Err(UnreadableArgument("parameters")),
        }

        Ok(Self {
            customer_name: text_argument(parameters, "customerName")?,
            customer_phone: text_argument(parameters, "customerPhone")?,
            customer_email: text_argument(parameters, "customerEmail")?,
            customer_address: text_argument(parameters, "customerAddress")?,
            service_type: text_argument(parameters, "serviceType")?,
            date: text_argument(parameters, "date")?,
            time: text_argument(parameters, "time")?,
            notes: text_argument(parameters, "notes")?,
        })
    }
}

fn text_argument(parameters: &Value, key: &'static str) -> Result<Option<String>, UnreadableArgument> {
    match parameters.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => {
            let text = text.trim();
            Ok((!text.is_empty()).then(|| text.to_string()))
        }
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(_) => Err(UnreadableArgument(key)),
    }
}
