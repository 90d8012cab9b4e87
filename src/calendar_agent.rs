//! Appointment scheduling agent
//!
//! Interprets natural-language dates via a provider sub-task, checks and
//! books consultation slots through the [`CalendarService`], and fills
//! missing contact data from facts extracted earlier in the conversation.
//! Dates with a stale year roll forward to the next occurrence instead of
//! failing.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::agent::{Agent, CallPlan};
use crate::calendar::{business_rejection, localize, now_local, BookingRequest, CalendarService};
use crate::capability::{capability_fn, Capability, CapabilityResult, FailureKind};
use crate::error::BotError;
use crate::items::Message;
use crate::provider::ModelProvider;

pub const CALENDAR_AGENT_NAME: &str = "calendar_agent";

pub const CONTACT_QUERY: &str =
    "Bitte teilen Sie mir Ihren Namen, Ihre E-Mail-Adresse und optional Ihre Telefonnummer mit.";

type Clock = Arc<dyn Fn() -> DateTime<Tz> + Send + Sync>;

#[derive(Debug, Deserialize, JsonSchema)]
struct ParseRelativeDateArgs {
    /// Die zu analysierende Zeitangabe (z.B. 'nächster Dienstag 9:00')
    text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CheckAvailabilityArgs {
    /// Datum (YYYY-MM-DD)
    date: String,
    /// Uhrzeit (HH:MM)
    time: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct BookAppointmentArgs {
    /// Datum (YYYY-MM-DD)
    date: String,
    /// Uhrzeit (HH:MM)
    time: String,
    /// E-Mail-Adresse
    email: String,
    /// Name des Kunden
    name: String,
    /// Telefonnummer (optional)
    phone: Option<String>,
}

pub struct CalendarAgent {
    provider: Arc<dyn ModelProvider>,
    service: Arc<CalendarService>,
    clock: Clock,
}

impl CalendarAgent {
    pub fn new(provider: Arc<dyn ModelProvider>, service: Arc<CalendarService>) -> Self {
        Self {
            provider,
            service,
            clock: Arc::new(now_local),
        }
    }

    /// Pin the clock, for deterministic tests
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Tz> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

#[async_trait]
impl Agent for CalendarAgent {
    fn name(&self) -> &str {
        CALENDAR_AGENT_NAME
    }

    fn description(&self) -> &str {
        "Plant, prüft und bucht Beratungstermine"
    }

    fn persona(&self) -> String {
        format!(
            "Du bist ein Terminplanungs-Agent für Solaranlagen-Beratungen. Du verstehst \
             natürliche Zeitangaben wie \"nächster Dienstag\" oder \"morgen\" und wandelst \
             diese in konkrete Termine um.\n\n\
             Terminregeln:\n\
             - Montag bis Freitag\n\
             - Zwischen 9:00 und 17:00 Uhr\n\
             - Dauer: 60 Minuten\n\n\
             Erforderliche Daten:\n\
             - Name\n\
             - E-Mail-Adresse\n\
             - Optional: Telefonnummer\n\n\
             Besonderheiten:\n\
             - Termin-Management erfolgt über Link in der Bestätigungsmail\n\
             - Informiere Kunden, dass sie über diesen Link Termine ändern oder \
             stornieren können\n\
             - Bei technischen Fragen zur Solaranlage zum Solar-Agent weiterleiten\n\n\
             Aktuelles Datum: {}",
            (self.clock)().format("%Y-%m-%d")
        )
    }

    fn capabilities(&self) -> Vec<Arc<dyn Capability>> {
        let parse_provider = self.provider.clone();
        let parse_clock = self.clock.clone();
        let check_service = self.service.clone();
        let check_clock = self.clock.clone();
        let book_service = self.service.clone();
        let book_clock = self.clock.clone();

        vec![
            capability_fn(
                "parse_relative_date",
                "Wandelt relative Zeitangaben in konkrete Daten um",
                move |args: ParseRelativeDateArgs| {
                    let provider = parse_provider.clone();
                    let clock = parse_clock.clone();
                    async move { parse_relative_date(provider, clock(), args).await }
                },
            ),
            capability_fn(
                "check_availability",
                "Prüft die Verfügbarkeit eines Termins",
                move |args: CheckAvailabilityArgs| {
                    let service = check_service.clone();
                    let clock = check_clock.clone();
                    async move { check_availability(service, clock(), args).await }
                },
            ),
            capability_fn(
                "book_appointment",
                "Bucht einen neuen Beratungstermin",
                move |args: BookAppointmentArgs| {
                    let service = book_service.clone();
                    let clock = book_clock.clone();
                    async move { book_appointment(service, clock(), args).await }
                },
            ),
        ]
    }

    /// Fill missing contact fields from conversation facts; without name
    /// and e-mail the booking becomes a clarifying question instead.
    async fn prepare_call(
        &self,
        name: &str,
        arguments: &Value,
        facts: &HashMap<String, String>,
    ) -> CallPlan {
        if name != "book_appointment" {
            return CallPlan::Execute(arguments.clone());
        }

        let mut enriched = arguments.clone();
        if let Some(map) = enriched.as_object_mut() {
            for key in ["name", "email", "phone"] {
                let missing = map
                    .get(key)
                    .map(|v| v.is_null() || v.as_str().is_some_and(str::is_empty))
                    .unwrap_or(true);
                if missing {
                    if let Some(value) = facts.get(key) {
                        map.insert(key.to_string(), json!(value));
                    }
                }
            }

            let has = |key: &str| {
                map.get(key)
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.is_empty())
            };
            if !has("name") || !has("email") {
                return CallPlan::Clarify(CONTACT_QUERY.to_string());
            }
        }

        CallPlan::Execute(enriched)
    }
}

/// Interpret the date fields; a stale year rolls forward to the next
/// occurrence of the same day.
fn roll_forward(
    date: &str,
    time: &str,
    now: DateTime<Tz>,
) -> std::result::Result<(NaiveDate, NaiveTime), String> {
    let parsed_time = NaiveTime::parse_from_str(time, "%H:%M")
        .map_err(|_| format!("Ungültige Uhrzeit: {}", time))?;
    let mut parsed_date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| format!("Ungültiges Datum: {}", date))?;

    if parsed_date.year() < now.year() {
        parsed_date = parsed_date
            .with_year(now.year())
            .ok_or_else(|| format!("Ungültiges Datum: {}", date))?;
        if parsed_date.and_time(parsed_time) < now.naive_local() {
            parsed_date = parsed_date
                .with_year(now.year() + 1)
                .ok_or_else(|| format!("Ungültiges Datum: {}", date))?;
        }
    }

    Ok((parsed_date, parsed_time))
}

async fn parse_relative_date(
    provider: Arc<dyn ModelProvider>,
    now: DateTime<Tz>,
    args: ParseRelativeDateArgs,
) -> CapabilityResult {
    let prompt = format!(
        "Wandle die folgende Zeitangabe in ein konkretes Datum um.\n\
         Zeitangabe: \"{}\"\n\
         Aktuelles Datum: {}\n\n\
         Antworte nur mit dem Datum im Format YYYY-MM-DD und der Uhrzeit im Format HH:MM, \
         getrennt durch ein Leerzeichen. Beispiel: \"2024-02-20 09:00\"",
        args.text,
        now.format("%Y-%m-%d")
    );

    let messages = vec![Message::system(prompt), Message::user(&args.text)];
    let response = match provider.complete(messages, Vec::new()).await {
        Ok((response, _usage)) => response,
        Err(e) => {
            return CapabilityResult::fail(FailureKind::BackendError, e.to_string());
        }
    };

    let content = response.content.unwrap_or_default();
    let trimmed = content.trim().trim_matches('"');
    let mut parts = trimmed.split_whitespace();
    let (date_str, time_str) = match (parts.next(), parts.next()) {
        (Some(date), Some(time)) => (date, time),
        _ => {
            return CapabilityResult::fail(
                FailureKind::InvalidDate,
                format!("Zeitangabe konnte nicht interpretiert werden: {}", args.text),
            );
        }
    };

    let (date, time) = match roll_forward(date_str, time_str, now) {
        Ok(parsed) => parsed,
        Err(message) => return CapabilityResult::fail(FailureKind::InvalidDate, message),
    };

    if date.and_time(time) < now.naive_local() {
        return CapabilityResult::fail(
            FailureKind::InvalidDate,
            "Das Datum liegt in der Vergangenheit",
        );
    }

    debug!(input = %args.text, date = %date, time = %time, "relative date resolved");
    CapabilityResult::ok(json!({
        "date": date.format("%Y-%m-%d").to_string(),
        "time": time.format("%H:%M").to_string(),
    }))
}

async fn check_availability(
    service: Arc<CalendarService>,
    now: DateTime<Tz>,
    args: CheckAvailabilityArgs,
) -> CapabilityResult {
    let (date, time) = match roll_forward(&args.date, &args.time, now) {
        Ok(parsed) => parsed,
        Err(message) => return CapabilityResult::fail(FailureKind::InvalidDate, message),
    };
    let slot = match localize(date.and_time(time)) {
        Ok(slot) => slot,
        Err(e) => return CapabilityResult::fail(FailureKind::InvalidDate, e.to_string()),
    };

    let availability = match service.check_availability(slot).await {
        Ok(availability) => availability,
        Err(e) => return CapabilityResult::fail(FailureKind::BackendError, e.to_string()),
    };

    if availability.available {
        return CapabilityResult::ok(json!({ "available": true }));
    }

    let alternatives: Vec<String> = service
        .find_alternatives(slot)
        .await
        .into_iter()
        .map(|alt| alt.format("%Y-%m-%d %H:%M").to_string())
        .collect();

    CapabilityResult::ok(json!({
        "available": false,
        "reason": availability.reason,
        "alternatives": alternatives,
    }))
}

async fn book_appointment(
    service: Arc<CalendarService>,
    now: DateTime<Tz>,
    args: BookAppointmentArgs,
) -> CapabilityResult {
    let (date, time) = match roll_forward(&args.date, &args.time, now) {
        Ok(parsed) => parsed,
        Err(message) => return CapabilityResult::fail(FailureKind::InvalidDate, message),
    };
    let slot = match localize(date.and_time(time)) {
        Ok(slot) => slot,
        Err(e) => return CapabilityResult::fail(FailureKind::InvalidDate, e.to_string()),
    };

    if let Some(reason) = business_rejection(&slot) {
        return CapabilityResult::fail(FailureKind::InvalidInput, reason);
    }

    let request = BookingRequest {
        start: slot,
        email: args.email.clone(),
        name: args.name.clone(),
        phone: args.phone.clone(),
        notes: Some("Solar-Beratungstermin".to_string()),
    };

    match service.create_appointment(&request).await {
        Ok(confirmation) => {
            let mut payload = json!({
                "response": format_booking_confirmation(date, time, &args.name, &args.email),
                "event_id": confirmation.id,
            });
            if let Some(link) = confirmation.management_link {
                payload["management_link"] = json!(link);
            }
            CapabilityResult::ok(payload)
        }
        Err(BotError::SlotTaken) => CapabilityResult::fail(
            FailureKind::AlreadyBooked,
            "Dieser Termin ist bereits vergeben. Bitte wählen Sie einen anderen Termin.",
        ),
        Err(e) => CapabilityResult::fail(FailureKind::BackendError, e.to_string()),
    }
}

const GERMAN_MONTHS: [&str; 12] = [
    "Januar",
    "Februar",
    "März",
    "April",
    "Mai",
    "Juni",
    "Juli",
    "August",
    "September",
    "Oktober",
    "November",
    "Dezember",
];

fn format_booking_confirmation(date: NaiveDate, time: NaiveTime, name: &str, email: &str) -> String {
    let month = GERMAN_MONTHS[date.month0() as usize];
    format!(
        "Ihr Termin wurde erfolgreich gebucht!\n\n\
         Details:\n\
         - Datum: {}. {} {}\n\
         - Uhrzeit: {} Uhr\n\
         - Name: {}\n\n\
         Eine Bestätigungsmail wurde an {} gesendet.\n\
         In der E-Mail finden Sie einen Link, über den Sie den Termin bei Bedarf \
         ändern oder stornieren können.",
        date.day(),
        month,
        date.year(),
        time.format("%H:%M"),
        name,
        email
    )
}
