//! Solar consultation agent
//!
//! Answers sizing and savings questions backed by the [`SolarCalculator`].
//! Without roof parameters the calculation runs simplified with standard
//! assumptions (35° tilt, south orientation) and says so in the summary;
//! with full parameters it validates the roof area against the minimum
//! required for the recommended system size.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::agent::Agent;
use crate::capability::{capability_fn, Capability, CapabilityResult, FailureKind};
use crate::solar::{round2, Orientation, SavingsEstimate, SolarCalculator, SQM_PER_KWP};

pub const SOLAR_AGENT_NAME: &str = "solar_agent";

/// Standard tilt assumed when the user gives no roof angle
const DEFAULT_TILT: f64 = 35.0;

#[derive(Debug, Deserialize, JsonSchema)]
struct CalculateSolarSystemArgs {
    /// Jährlicher Stromverbrauch in kWh
    yearly_consumption: f64,
    /// Adresse für Standortdaten
    address: String,
    /// Verfügbare Dachfläche in m²
    roof_area: Option<f64>,
    /// Dachneigung in Grad
    roof_angle: Option<f64>,
    orientation: Option<Orientation>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AnalyzeEfficiencyArgs {
    /// Gewünschte Anlagengröße in kWp
    system_size: f64,
    module_type: Option<ModuleType>,
    /// Batteriespeicher einbeziehen
    include_battery: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
enum ModuleType {
    Standard,
    Premium,
    HighEnd,
}

impl ModuleType {
    /// (efficiency, yearly degradation, performance ratio)
    fn characteristics(self) -> (f64, f64, f64) {
        match self {
            ModuleType::Standard => (0.195, 0.0055, 0.85),
            ModuleType::Premium => (0.21, 0.005, 0.86),
            ModuleType::HighEnd => (0.225, 0.0035, 0.88),
        }
    }
}

pub struct SolarAgent {
    calculator: Arc<SolarCalculator>,
}

impl SolarAgent {
    pub fn new(calculator: Arc<SolarCalculator>) -> Self {
        Self { calculator }
    }
}

#[async_trait]
impl Agent for SolarAgent {
    fn name(&self) -> &str {
        SOLAR_AGENT_NAME
    }

    fn description(&self) -> &str {
        "Beantwortet Fragen zu Solaranlagen, Anlagengröße und Einsparungen"
    }

    fn persona(&self) -> String {
        "Du bist ein Solaranlagen-Experte. Beginne mit der Abfrage des jährlichen \
         Stromverbrauchs (kWh) und der Adresse/PLZ. Optional frage nach:\n\
         - Dachfläche (m²)\n\
         - Dachausrichtung\n\
         - Dachneigung\n\n\
         Ohne optionale Daten nutze vereinfachte Berechnung mit Standardwerten. \
         Übergebe Terminanfragen an den Kalender-Agenten.\n\n\
         Verwende diese Modelle für technische Antworten:\n\
         Standard: 380Wp, 19,5% Wirkungsgrad\n\
         Premium: 410Wp, 21% Wirkungsgrad\n\
         High-End: 440Wp, 22,5% Wirkungsgrad"
            .to_string()
    }

    fn capabilities(&self) -> Vec<Arc<dyn Capability>> {
        let calculator = self.calculator.clone();
        vec![
            capability_fn(
                "calculate_solar_system",
                "Berechnet die optimale Solaranlagengröße und potenzielle Einsparungen",
                move |args: CalculateSolarSystemArgs| {
                    let calculator = calculator.clone();
                    async move { calculate_solar_system(calculator, args).await }
                },
            ),
            capability_fn(
                "analyze_efficiency",
                "Analysiert die Effizienz verschiedener Anlagenkonfigurationen",
                |args: AnalyzeEfficiencyArgs| async move { analyze_efficiency(args) },
            ),
        ]
    }
}

async fn calculate_solar_system(
    calculator: Arc<SolarCalculator>,
    args: CalculateSolarSystemArgs,
) -> CapabilityResult {
    if args.yearly_consumption <= 0.0 {
        return CapabilityResult::fail(
            FailureKind::InvalidInput,
            "Der jährliche Stromverbrauch muss größer als 0 sein.",
        );
    }

    let simplified =
        args.roof_area.is_none() || args.roof_angle.is_none() || args.orientation.is_none();
    let tilt = args.roof_angle.unwrap_or(DEFAULT_TILT);
    let orientation = args.orientation.unwrap_or(Orientation::South);

    let estimate = calculator
        .estimate(
            args.yearly_consumption,
            &args.address,
            tilt,
            orientation.azimuth(),
        )
        .await;

    let needed_area = round2(estimate.system_size * SQM_PER_KWP);

    let mut results = match serde_json::to_value(&estimate) {
        Ok(value) => value,
        Err(e) => {
            return CapabilityResult::fail(FailureKind::BackendError, e.to_string());
        }
    };

    if simplified {
        results["calculation_type"] = json!("simplified");
        results["assumptions"] = json!({
            "roof_angle": DEFAULT_TILT,
            "orientation": "south",
            "minimum_roof_area": needed_area,
        });
    } else {
        let roof_area = args.roof_area.unwrap_or_default();
        if roof_area < needed_area {
            return CapabilityResult::fail(
                FailureKind::InvalidInput,
                format!(
                    "Die verfügbare Dachfläche von {}m² ist zu klein für die \
                     benötigte Anlagengröße (Minimum: {}m²)",
                    roof_area, needed_area
                ),
            );
        }
        results["calculation_type"] = json!("detailed");
        results["roof_parameters"] = json!({
            "area": roof_area,
            "angle": tilt,
            "orientation": orientation.as_str(),
        });
    }

    let text_summary = format_calculation(&estimate, simplified, needed_area, args.roof_area);

    CapabilityResult::ok(json!({
        "calculation": {
            "text_summary": text_summary,
            "results": results,
        }
    }))
}

fn format_calculation(
    estimate: &SavingsEstimate,
    simplified: bool,
    needed_area: f64,
    roof_area: Option<f64>,
) -> String {
    let mut lines = Vec::new();
    if simplified {
        lines.push(
            "Basierend auf einer vereinfachten Berechnung mit Standardwerten \
             (35° Dachneigung, Südausrichtung):"
                .to_string(),
        );
    } else {
        lines.push("Basierend auf Ihren spezifischen Dachparametern:".to_string());
    }

    lines.push(format!("• Anlagengröße: {} kWp", estimate.system_size));
    let shown_area = if simplified {
        needed_area
    } else {
        roof_area.unwrap_or(needed_area)
    };
    lines.push(format!("• Mindest-Dachfläche: {}m²", shown_area));
    lines.push(format!(
        "• Jährliche Produktion: {} kWh",
        estimate.yearly_production
    ));
    lines.push(format!(
        "• Deckung des Verbrauchs: {}%",
        (estimate.consumption_coverage * 10.0).round() / 10.0
    ));

    let savings = &estimate.financial_savings;
    lines.push(format!(
        "• Jährliche Ersparnis: {}€",
        savings.self_consumption_savings
    ));
    if savings.feed_in_revenue > 0.0 {
        lines.push(format!("• Einspeisevergütung: {}€", savings.feed_in_revenue));
    }
    lines.push(format!(
        "• Gesamtersparnis pro Jahr: {}€",
        savings.total_savings
    ));

    let env = &estimate.environmental_impact;
    lines.push(format!("• CO2-Einsparung: {} kg/Jahr", env.co2_savings));
    lines.push(format!("• Entspricht {} Bäumen", env.trees_equivalent));

    if simplified {
        lines.push(
            "\nFür eine genauere Berechnung können Sie uns Ihre spezifischen \
             Dachparameter mitteilen."
                .to_string(),
        );
    }

    lines.join("\n")
}

fn analyze_efficiency(args: AnalyzeEfficiencyArgs) -> CapabilityResult {
    if args.system_size <= 0.0 {
        return CapabilityResult::fail(
            FailureKind::InvalidInput,
            "Die Anlagengröße muss größer als 0 sein.",
        );
    }

    let module_type = args.module_type.unwrap_or(ModuleType::Premium);
    let include_battery = args.include_battery.unwrap_or(false);
    let (efficiency, degradation, performance_ratio) = module_type.characteristics();

    let yearly_yield = args.system_size * 1000.0 * performance_ratio;
    let (battery_size, self_consumption) = if include_battery {
        let battery_size = args.system_size * 1.0;
        (battery_size, (0.35 + battery_size * 0.05).min(0.8))
    } else {
        (0.0, 0.35)
    };

    CapabilityResult::ok(json!({
        "analysis": {
            "yearly_yield": yearly_yield,
            "efficiency": efficiency,
            "degradation": degradation,
            "performance_ratio": performance_ratio,
            "self_consumption": self_consumption,
            "includes_battery": include_battery,
            "battery_size": battery_size,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::{BotError, Result};
    use crate::solar::{Coordinates, Geocoder, YieldEstimator};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::time::Duration;

    struct FixedGeocoder;

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn geocode(&self, _address: &str) -> Result<Coordinates> {
            Ok(Coordinates {
                lat: 52.52,
                lon: 13.405,
            })
        }
    }

    struct FixedEstimator {
        yield_per_kwp: Option<f64>,
    }

    #[async_trait]
    impl YieldEstimator for FixedEstimator {
        async fn yearly_yield(
            &self,
            _coordinates: Coordinates,
            peak_kwp: f64,
            _tilt: f64,
            _azimuth: f64,
        ) -> Result<f64> {
            match self.yield_per_kwp {
                Some(per_kwp) => Ok(peak_kwp * per_kwp),
                None => Err(BotError::YieldError("Dienst nicht erreichbar".to_string())),
            }
        }
    }

    fn agent(yield_per_kwp: Option<f64>) -> SolarAgent {
        let retry = RetryConfig {
            max_retries: 0,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let calculator = SolarCalculator::new(
            Arc::new(FixedGeocoder),
            Arc::new(FixedEstimator { yield_per_kwp }),
        )
        .with_retry(retry);
        SolarAgent::new(Arc::new(calculator))
    }

    fn find_capability(agent: &SolarAgent, name: &str) -> Arc<dyn Capability> {
        agent
            .capabilities()
            .into_iter()
            .find(|c| c.name() == name)
            .unwrap()
    }

    #[tokio::test]
    async fn test_simplified_calculation_carries_assumptions() {
        let agent = agent(Some(950.0));
        let calculate = find_capability(&agent, "calculate_solar_system");

        let result = calculate
            .execute(json!({
                "yearly_consumption": 3500.0,
                "address": "10115 Berlin",
            }))
            .await;

        assert!(result.is_success());
        let calculation = result.get("calculation").unwrap();
        let results = &calculation["results"];
        assert_eq!(results["calculation_type"], json!("simplified"));
        assert_eq!(results["assumptions"]["roof_angle"], json!(35.0));
        assert_eq!(results["assumptions"]["orientation"], json!("south"));
        // 3.5 kWp * 2.5 m²/kWp
        assert_eq!(results["assumptions"]["minimum_roof_area"], json!(8.75));
        let summary = calculation["text_summary"].as_str().unwrap();
        assert!(summary.contains("vereinfachten Berechnung"));
        assert!(summary.contains("Anlagengröße: 3.5 kWp"));
    }

    #[tokio::test]
    async fn test_detailed_calculation_validates_roof_area() {
        let agent = agent(Some(950.0));
        let calculate = find_capability(&agent, "calculate_solar_system");

        let result = calculate
            .execute(json!({
                "yearly_consumption": 6000.0,
                "address": "10115 Berlin",
                "roof_area": 10.0,
                "roof_angle": 30.0,
                "orientation": "west",
            }))
            .await;

        assert!(!result.is_success());
        assert_eq!(result.error_kind, Some(FailureKind::InvalidInput));
        let message = result.message.unwrap();
        assert!(message.contains("10m²"));
        assert!(message.contains("15m²"));
    }

    #[tokio::test]
    async fn test_detailed_calculation_reports_roof_parameters() {
        let agent = agent(Some(950.0));
        let calculate = find_capability(&agent, "calculate_solar_system");

        let result = calculate
            .execute(json!({
                "yearly_consumption": 4000.0,
                "address": "80331 München",
                "roof_area": 40.0,
                "roof_angle": 25.0,
                "orientation": "east",
            }))
            .await;

        assert!(result.is_success());
        let results = &result.get("calculation").unwrap()["results"];
        assert_eq!(results["calculation_type"], json!("detailed"));
        assert_eq!(results["roof_parameters"]["orientation"], json!("east"));
        assert_eq!(results["roof_parameters"]["area"], json!(40.0));
    }

    #[tokio::test]
    async fn test_estimator_outage_falls_back() {
        let agent = agent(None);
        let calculate = find_capability(&agent, "calculate_solar_system");

        let result = calculate
            .execute(json!({
                "yearly_consumption": 3000.0,
                "address": "10115 Berlin",
            }))
            .await;

        assert!(result.is_success());
        let results = &result.get("calculation").unwrap()["results"];
        // fallback formula: 3 kWp * 1000 kWh/kWp
        assert_eq!(results["yearly_production"], json!(3000.0));
        assert_eq!(results["source"], json!("fallback"));
    }

    #[tokio::test]
    async fn test_non_positive_consumption_rejected() {
        let agent = agent(Some(950.0));
        let calculate = find_capability(&agent, "calculate_solar_system");

        let result = calculate
            .execute(json!({
                "yearly_consumption": 0.0,
                "address": "10115 Berlin",
            }))
            .await;

        assert!(!result.is_success());
        assert_eq!(result.error_kind, Some(FailureKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_efficiency_analysis_with_battery() {
        let agent = agent(Some(950.0));
        let analyze = find_capability(&agent, "analyze_efficiency");

        let result = analyze
            .execute(json!({
                "system_size": 5.0,
                "module_type": "high_end",
                "include_battery": true,
            }))
            .await;

        assert!(result.is_success());
        let analysis = result.get("analysis").unwrap();
        assert_eq!(analysis["yearly_yield"], json!(4400.0));
        assert_eq!(analysis["performance_ratio"], json!(0.88));
        assert_eq!(analysis["battery_size"], json!(5.0));
        // 0.35 + 5 * 0.05 = 0.6
        assert_eq!(analysis["self_consumption"], json!(0.6));
    }

    #[tokio::test]
    async fn test_efficiency_analysis_defaults_to_premium() {
        let agent = agent(Some(950.0));
        let analyze = find_capability(&agent, "analyze_efficiency");

        let result = analyze.execute(json!({"system_size": 4.0})).await;

        assert!(result.is_success());
        let analysis = result.get("analysis").unwrap();
        assert_eq!(analysis["efficiency"], json!(0.21));
        assert_eq!(analysis["self_consumption"], json!(0.35));
        assert_eq!(analysis["includes_battery"], json!(false));
    }

    #[test]
    fn test_capability_schemas_name_required_fields() {
        let agent = agent(Some(950.0));
        let spec = find_capability(&agent, "calculate_solar_system").spec();
        let required: Vec<&str> = spec.parameters["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"yearly_consumption"));
        assert!(required.contains(&"address"));
        assert!(!required.contains(&"roof_area"));
    }
}
