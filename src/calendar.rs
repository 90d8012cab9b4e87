//! Appointment calendar: business-hours policy, backends, booking service
//!
//! The business-hours policy (Monday–Friday, 09:00–17:00 Europe/Berlin,
//! 60-minute slots) is enforced before any backend query. Booking re-checks
//! availability immediately before creation; the check/create gap is
//! minimized, not eliminated, since the backing calendar is an external
//! system. A lost race surfaces as "already booked", never as a silent
//! overwrite.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::error::{BotError, Result};
use crate::retry::{retry_async, RetryPolicy};

/// Business timezone; naive timestamps are interpreted in this zone
pub const BUSINESS_TZ: Tz = chrono_tz::Europe::Berlin;
/// First bookable hour
pub const BUSINESS_START: u32 = 9;
/// Appointments must end by this hour
pub const BUSINESS_END: u32 = 17;
/// Fixed appointment duration in minutes
pub const APPOINTMENT_MINUTES: i64 = 60;

/// Whether a slot start lies within business hours on a business day
pub fn within_business_hours(start: &DateTime<Tz>) -> bool {
    start.weekday().number_from_monday() <= 5
        && (BUSINESS_START..BUSINESS_END).contains(&start.hour())
}

/// Rejection reason for an out-of-policy slot, if any
pub fn business_rejection(start: &DateTime<Tz>) -> Option<String> {
    if start.weekday().number_from_monday() > 5 {
        return Some("Termine sind nur von Montag bis Freitag möglich.".to_string());
    }
    if !(BUSINESS_START..BUSINESS_END).contains(&start.hour()) {
        return Some("Termine sind nur zwischen 9:00 und 17:00 Uhr möglich.".to_string());
    }
    None
}

/// Busy/free answer for one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Availability {
    pub fn free() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    pub fn taken(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
        }
    }
}

/// A booking to create
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub start: DateTime<Tz>,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

/// Created event handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub id: String,
    /// Link through which the customer can change or cancel the appointment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub management_link: Option<String>,
}

/// External event store with busy/free semantics
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// Whether any event overlaps the given window
    async fn is_busy(&self, start: DateTime<Tz>, end: DateTime<Tz>) -> Result<bool>;

    /// Create the event; a taken slot yields `BotError::SlotTaken`
    async fn insert_event(&self, request: &BookingRequest) -> Result<BookingConfirmation>;
}

/// In-memory backend; check-and-insert happens under one lock, so a slot
/// race deterministically produces exactly one winner.
#[derive(Default)]
pub struct InMemoryCalendar {
    slots: Mutex<HashSet<i64>>,
    busy_queries: AtomicUsize,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of busy/free queries the backend has answered
    pub fn query_count(&self) -> usize {
        self.busy_queries.load(Ordering::SeqCst)
    }

    pub fn occupy(&self, start: DateTime<Tz>) {
        self.slots
            .lock()
            .expect("calendar slots lock")
            .insert(start.timestamp());
    }
}

#[async_trait]
impl CalendarBackend for InMemoryCalendar {
    async fn is_busy(&self, start: DateTime<Tz>, _end: DateTime<Tz>) -> Result<bool> {
        self.busy_queries.fetch_add(1, Ordering::SeqCst);
        let slots = self.slots.lock().expect("calendar slots lock");
        Ok(slots.contains(&start.timestamp()))
    }

    async fn insert_event(&self, request: &BookingRequest) -> Result<BookingConfirmation> {
        let mut slots = self.slots.lock().expect("calendar slots lock");
        if !slots.insert(request.start.timestamp()) {
            return Err(BotError::SlotTaken);
        }
        Ok(BookingConfirmation {
            id: Uuid::new_v4().to_string(),
            management_link: None,
        })
    }
}

const EVENT_DESCRIPTION: &str = "\
Beratungsgespräch für Ihre Solaranlage

Agenda:
- Analyse Ihres Stromverbrauchs
- Berechnung des Solarpotentials
- Individuelle Wirtschaftlichkeitsberechnung
- Fördermöglichkeiten und Finanzierung
- Konkrete nächste Schritte
";

/// Google-Calendar-shaped REST backend (events list/insert)
pub struct GoogleCalendarBackend {
    http: reqwest::Client,
    calendar_id: String,
    access_token: String,
}

impl GoogleCalendarBackend {
    pub fn new(
        http: reqwest::Client,
        calendar_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            calendar_id: calendar_id.into(),
            access_token: access_token.into(),
        }
    }

    fn events_url(&self) -> String {
        format!(
            "https://www.googleapis.com/calendar/v3/calendars/{}/events",
            self.calendar_id
        )
    }
}

#[async_trait]
impl CalendarBackend for GoogleCalendarBackend {
    async fn is_busy(&self, start: DateTime<Tz>, end: DateTime<Tz>) -> Result<bool> {
        let response = self
            .http
            .get(self.events_url())
            .bearer_auth(&self.access_token)
            .query(&[
                ("timeMin", start.to_rfc3339()),
                ("timeMax", end.to_rfc3339()),
                ("singleEvents", "true".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        let items = body["items"].as_array().map(Vec::len).unwrap_or(0);
        Ok(items > 0)
    }

    async fn insert_event(&self, request: &BookingRequest) -> Result<BookingConfirmation> {
        let end = request.start + ChronoDuration::minutes(APPOINTMENT_MINUTES);
        let notes = request.notes.as_deref().unwrap_or(EVENT_DESCRIPTION);
        let event = json!({
            "summary": "Solar Beratungstermin",
            "description": notes,
            "start": {
                "dateTime": request.start.to_rfc3339(),
                "timeZone": "Europe/Berlin",
            },
            "end": {
                "dateTime": end.to_rfc3339(),
                "timeZone": "Europe/Berlin",
            },
            "attendees": [{"email": request.email}],
            "reminders": {
                "useDefault": false,
                "overrides": [
                    {"method": "email", "minutes": 24 * 60},
                    {"method": "popup", "minutes": 30},
                ],
            },
        });

        let response = self
            .http
            .post(self.events_url())
            .bearer_auth(&self.access_token)
            .query(&[("sendUpdates", "all")])
            .json(&event)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(BotError::CalendarError(format!(
                "Fehler bei der Kalendererstellung: HTTP {}",
                status
            )));
        }

        let created: serde_json::Value = response.json().await?;
        let id = created["id"]
            .as_str()
            .ok_or_else(|| {
                BotError::CalendarError("Kalenderantwort ohne Ereignis-ID".to_string())
            })?
            .to_string();
        info!(event_id = %id, "calendar event created");

        Ok(BookingConfirmation {
            id,
            management_link: created["htmlLink"].as_str().map(String::from),
        })
    }
}

/// Booking policy and orchestration over a backend
pub struct CalendarService {
    backend: Arc<dyn CalendarBackend>,
    retry: RetryConfig,
    alternative_count: usize,
    /// Safety bound for the alternative-slot scan: 14 days of hourly steps
    scan_bound: usize,
}

impl CalendarService {
    pub fn new(backend: Arc<dyn CalendarBackend>) -> Self {
        Self {
            backend,
            retry: RetryConfig::default(),
            alternative_count: 3,
            scan_bound: 14 * 24,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_alternative_count(mut self, count: usize) -> Self {
        self.alternative_count = count;
        self
    }

    pub fn alternative_count(&self) -> usize {
        self.alternative_count
    }

    /// Busy/free for one slot; the business-hours policy rejects before the
    /// backend is queried at all.
    pub async fn check_availability(&self, start: DateTime<Tz>) -> Result<Availability> {
        if let Some(reason) = business_rejection(&start) {
            debug!(slot = %start, %reason, "slot outside business policy");
            return Ok(Availability::taken(reason));
        }

        let end = start + ChronoDuration::minutes(APPOINTMENT_MINUTES);
        let busy = retry_async(
            || self.backend.is_busy(start, end),
            &mut RetryPolicy::new(self.retry.clone()),
        )
        .await?;

        if busy {
            Ok(Availability::taken("Dieser Termin ist bereits vergeben."))
        } else {
            Ok(Availability::free())
        }
    }

    /// Create the appointment with an immediate availability re-check.
    /// Creation itself is never retried; a failure is surfaced to the user
    /// with an explicit request to try again.
    pub async fn create_appointment(
        &self,
        request: &BookingRequest,
    ) -> Result<BookingConfirmation> {
        if let Some(reason) = business_rejection(&request.start) {
            return Err(BotError::CalendarError(reason));
        }

        // double-check-then-create: availability may have changed since the
        // user stated their intent
        let end = request.start + ChronoDuration::minutes(APPOINTMENT_MINUTES);
        let busy = retry_async(
            || self.backend.is_busy(request.start, end),
            &mut RetryPolicy::new(self.retry.clone()),
        )
        .await?;
        if busy {
            return Err(BotError::SlotTaken);
        }

        self.backend.insert_event(request).await
    }

    /// Scan forward hour by hour, skipping non-business times, until the
    /// configured number of free slots is found or the safety bound is hit.
    pub async fn find_alternatives(&self, from: DateTime<Tz>) -> Vec<DateTime<Tz>> {
        let mut suggestions = Vec::new();
        let mut current = from;

        for _ in 0..self.scan_bound {
            current = current + ChronoDuration::hours(1);
            if !within_business_hours(&current) {
                continue;
            }
            let end = current + ChronoDuration::minutes(APPOINTMENT_MINUTES);
            match self.backend.is_busy(current, end).await {
                Ok(false) => {
                    suggestions.push(current);
                    if suggestions.len() >= self.alternative_count {
                        break;
                    }
                }
                Ok(true) => {}
                Err(e) => {
                    warn!(error = %e, "alternative scan aborted on backend error");
                    break;
                }
            }
        }

        suggestions
    }
}

/// Interpret a naive local timestamp in the business timezone
pub fn localize(naive: chrono::NaiveDateTime) -> Result<DateTime<Tz>> {
    BUSINESS_TZ
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| BotError::CalendarError("Mehrdeutige oder ungültige Ortszeit".to_string()))
}

/// Current time in the business timezone
pub fn now_local() -> DateTime<Tz> {
    Utc::now().with_timezone(&BUSINESS_TZ)
}
