//! Interactive chat with the solar consultation backend.
//!
//! Wires the real collaborators from the environment and drives the
//! coordinator line by line. `:reset` forgets the conversation, `:quit`
//! exits. Without `GOOGLE_CALENDAR_TOKEN` bookings land in an in-memory
//! calendar instead of a real one.

use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use solarbot::solar::{GoogleGeocoder, PvgisClient};
use solarbot::{
    AgentRuntime, CalendarAgent, CalendarBackend, CalendarService, Coordinator,
    GoogleCalendarBackend, InMemoryCalendar, OpenAIProvider, Settings, SolarAgent, SolarCalculator,
};

const USER_ID: &str = "cli";

#[tokio::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let settings = Settings::from_env();
    let provider = Arc::new(OpenAIProvider::new(&settings.model));

    let http = reqwest::Client::builder()
        .timeout(settings.api_timeout)
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    let calculator = Arc::new(
        SolarCalculator::new(
            Arc::new(GoogleGeocoder::new(
                http.clone(),
                &settings.geocoding_api_key,
            )),
            Arc::new(PvgisClient::new(http.clone())),
        )
        .with_retry(settings.retry.clone()),
    );

    let backend: Arc<dyn CalendarBackend> = match env::var("GOOGLE_CALENDAR_TOKEN") {
        Ok(token) => Arc::new(GoogleCalendarBackend::new(
            http,
            settings.calendar_id.clone(),
            token,
        )),
        Err(_) => {
            eprintln!("Hinweis: GOOGLE_CALENDAR_TOKEN nicht gesetzt, Termine werden nur lokal gespeichert.");
            Arc::new(InMemoryCalendar::new())
        }
    };
    let calendar = Arc::new(CalendarService::new(backend).with_retry(settings.retry.clone()));

    let runtime = AgentRuntime::new(provider.clone())
        .max_depth(settings.max_depth)
        .history_window(settings.history_window)
        .capability_timeout(settings.api_timeout);

    let coordinator = Coordinator::new(runtime)
        .register(Arc::new(SolarAgent::new(calculator)))
        .register(Arc::new(CalendarAgent::new(provider, calendar)))
        .max_handoffs(settings.max_handoffs)
        .request_budget(settings.request_budget);

    println!("Solarbot ({}). :reset startet neu, :quit beendet.", settings.model);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            ":quit" => break,
            ":reset" => {
                coordinator.reset(USER_ID);
                println!("Konversation zurückgesetzt.");
                continue;
            }
            _ => {}
        }

        let envelope = coordinator.handle(USER_ID, line).await;
        let prefix = if envelope.is_error() {
            "Fehler"
        } else {
            envelope.agent.as_str()
        };
        println!("[{}] {}", prefix, envelope.content);
    }

    Ok(())
}
