//! Text widgets for the surveillance board.
//!
//! Every payload struct defaults every field, so a sparse payload renders with
//! zeros and empty-state text. Only a payload of the wrong JSON shape is an error.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::format::{format_datetime, format_number, format_percentage, format_trend};
use super::Widget;

fn decode<T: DeserializeOwned + Default>(payload: &Value) -> Result<T> {
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(strip_nulls(payload)).context("payload shape mismatch")
}

/// Drops `null` object members so they fall back to the field default like absent ones.
fn strip_nulls(v: &Value) -> Value {
    match v {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

fn or_default<'a>(s: &'a str, fallback: &'a str) -> &'a str {
    if s.is_empty() {
        fallback
    } else {
        s
    }
}

// =============================================================================
// Stat cards
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DashboardStats {
    malaria_cases: f64,
    dengue_cases: f64,
    respiratory_cases: f64,
    vaccination_coverage: f64,
    malaria_trend: f64,
    dengue_trend: f64,
    respiratory_trend: f64,
    vaccination_trend: f64,
}

/// Headline case counts with trend arrows.
pub struct StatCards;

impl Widget for StatCards {
    fn lines(&self, payload: &Value, now: DateTime<Utc>) -> Result<Vec<String>> {
        let s: DashboardStats = decode(payload)?;
        Ok(vec![
            format!("Malaria cases: {} ({})", format_number(s.malaria_cases), format_trend(s.malaria_trend)),
            format!("Dengue cases: {} ({})", format_number(s.dengue_cases), format_trend(s.dengue_trend)),
            format!(
                "Respiratory cases: {} ({})",
                format_number(s.respiratory_cases),
                format_trend(s.respiratory_trend)
            ),
            format!(
                "Vaccination coverage: {} ({})",
                format_percentage(s.vaccination_coverage),
                format_trend(s.vaccination_trend)
            ),
            format!("Last updated: {}", format_datetime(now)),
        ])
    }
}

// =============================================================================
// Weather
// =============================================================================

/// Cities whose weather is averaged ahead of the national summary.
pub const HIGH_RISK_CITIES: &[&str] = &["Karachi", "Lahore", "Faisalabad", "Rawalpindi", "Multan", "Peshawar", "Quetta"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NationalSummary {
    avg_temperature: f64,
    conditions: String,
    avg_humidity: f64,
    avg_wind_speed: f64,
    avg_pressure: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CityWeather {
    city: String,
    temperature: f64,
    humidity: f64,
    wind_speed: f64,
    pressure: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WeatherData {
    national_summary: NationalSummary,
    cities: Vec<CityWeather>,
}

pub struct WeatherSummary;

impl Widget for WeatherSummary {
    fn lines(&self, payload: &Value, _now: DateTime<Utc>) -> Result<Vec<String>> {
        let w: WeatherData = decode(payload)?;
        let risky: Vec<&CityWeather> = w
            .cities
            .iter()
            .filter(|c| HIGH_RISK_CITIES.contains(&c.city.as_str()))
            .collect();

        let (temp, description, humidity, wind, pressure) = if risky.is_empty() {
            let s = &w.national_summary;
            (
                s.avg_temperature,
                or_default(&s.conditions, "Data unavailable").to_string(),
                s.avg_humidity,
                s.avg_wind_speed,
                s.avg_pressure,
            )
        } else {
            let n = risky.len() as f64;
            let avg = |f: fn(&CityWeather) -> f64| risky.iter().map(|c| f(c)).sum::<f64>() / n;
            let names: Vec<&str> = risky.iter().map(|c| c.city.as_str()).collect();
            (
                avg(|c| c.temperature),
                format!("High-Risk Areas: {}", names.join(", ")),
                avg(|c| c.humidity),
                avg(|c| c.wind_speed),
                avg(|c| c.pressure),
            )
        };

        Ok(vec![
            format!("{}°C", temp.round()),
            description,
            format!("Humidity: {}%", humidity.round()),
            format!("Wind: {:.1} km/h", wind),
            format!("Pressure: {} hPa", pressure.round()),
        ])
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WeatherAlert {
    city: String,
    message: String,
    severity: String,
    health_impact: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WeatherAlerts {
    alerts: Vec<WeatherAlert>,
}

pub struct ClimateAlerts;

impl Widget for ClimateAlerts {
    fn lines(&self, payload: &Value, _now: DateTime<Utc>) -> Result<Vec<String>> {
        let a: WeatherAlerts = decode(payload)?;
        if a.alerts.is_empty() {
            return Ok(vec![
                "Monitoring Active".to_string(),
                "Currently monitoring climate conditions across high-risk areas".to_string(),
            ]);
        }
        let mut out = vec![format!("{} active climate alert(s)", a.alerts.len())];
        for alert in &a.alerts {
            out.push(format!("[{}] {}: {}", or_default(&alert.severity, "info"), alert.city, alert.message));
            out.push(format!(
                "    {}",
                or_default(&alert.health_impact, "Health impact assessment needed")
            ));
        }
        Ok(out)
    }
}

// =============================================================================
// AI recommendations and scenarios
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PriorityAction {
    action: String,
    resources_needed: String,
    target_areas: Vec<String>,
    priority: String,
    timeline: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Recommendations {
    priority_actions: Vec<PriorityAction>,
}

pub struct RecommendationList;

impl Widget for RecommendationList {
    fn lines(&self, payload: &Value, _now: DateTime<Utc>) -> Result<Vec<String>> {
        let r: Recommendations = decode(payload)?;
        if r.priority_actions.is_empty() {
            return Ok(vec!["No specific recommendations available at this time.".to_string()]);
        }
        let mut out = Vec::new();
        for a in &r.priority_actions {
            out.push(format!("[{}] {}", or_default(&a.priority, "low"), a.action));
            if !a.resources_needed.is_empty() {
                out.push(format!("    {}", a.resources_needed));
            }
            if !a.target_areas.is_empty() {
                out.push(format!("    Target Areas: {}", a.target_areas.join(", ")));
            }
            out.push(format!("    Timeline: {}", a.timeline));
        }
        Ok(out)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Scenario {
    name: String,
    probability: String,
    description: String,
    timeline: String,
    confidence_level: String,
    key_factors: Vec<String>,
    interventions_needed: Vec<String>,
    budget_estimate: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Scenarios {
    scenarios: Vec<Scenario>,
}

pub struct ScenarioList;

impl Widget for ScenarioList {
    fn lines(&self, payload: &Value, _now: DateTime<Utc>) -> Result<Vec<String>> {
        let s: Scenarios = decode(payload)?;
        if s.scenarios.is_empty() {
            return Ok(vec!["No scenario simulations available.".to_string()]);
        }
        let mut out = Vec::new();
        for sc in &s.scenarios {
            out.push(format!(
                "{} ({}, {})",
                sc.name,
                or_default(&sc.probability, "N/A"),
                or_default(&sc.timeline, "Timeline N/A")
            ));
            if !sc.confidence_level.is_empty() {
                out.push(format!("    {}", sc.confidence_level));
            }
            if !sc.description.is_empty() {
                out.push(format!("    {}", sc.description));
            }
            if !sc.key_factors.is_empty() {
                out.push(format!("    Factors: {}", sc.key_factors.join("; ")));
            }
            if !sc.interventions_needed.is_empty() {
                out.push(format!("    Interventions: {}", sc.interventions_needed.join(", ")));
            }
            if !sc.budget_estimate.is_empty() {
                out.push(format!("    Budget: {}", sc.budget_estimate));
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Alerts and risk areas
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HealthAlert {
    message: String,
    location: String,
    date: String,
    priority: String,
}

pub struct HealthAlerts;

impl Widget for HealthAlerts {
    fn lines(&self, payload: &Value, _now: DateTime<Utc>) -> Result<Vec<String>> {
        let alerts: Vec<HealthAlert> = decode(payload)?;
        if alerts.is_empty() {
            return Ok(vec!["No active health alerts at this time.".to_string()]);
        }
        Ok(alerts
            .iter()
            .map(|a| {
                format!(
                    "[{}] {} ({}) {}",
                    or_default(&a.priority, "low"),
                    a.message,
                    or_default(&a.location, "Sindh Province (High-risk districts)"),
                    a.date
                )
                .trim_end()
                .to_string()
            })
            .collect())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RiskArea {
    location: String,
    cases: f64,
    risk_level: String,
}

pub struct HighRiskAreas;

impl Widget for HighRiskAreas {
    fn lines(&self, payload: &Value, _now: DateTime<Utc>) -> Result<Vec<String>> {
        let areas: Vec<RiskArea> = decode(payload)?;
        if areas.is_empty() {
            return Ok(vec!["No high-risk areas identified".to_string()]);
        }
        Ok(areas
            .iter()
            .map(|a| {
                format!(
                    "{}: {} cases [{}]",
                    a.location,
                    format_number(a.cases),
                    or_default(&a.risk_level, "Low")
                )
            })
            .collect())
    }
}

// =============================================================================
// Surveillance and climate monitoring
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DiseaseShare {
    disease: String,
    cases: f64,
    percentage: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SurveillanceData {
    total_cases: f64,
    monitoring_districts: f64,
    active_diseases: f64,
    coverage_percentage: f64,
    disease_breakdown: Vec<DiseaseShare>,
}

pub fn share_severity(percentage: f64) -> &'static str {
    if percentage > 60.0 {
        "high"
    } else if percentage > 30.0 {
        "medium"
    } else {
        "low"
    }
}

pub struct Surveillance;

impl Widget for Surveillance {
    fn lines(&self, payload: &Value, _now: DateTime<Utc>) -> Result<Vec<String>> {
        let s: SurveillanceData = decode(payload)?;
        let mut out = vec![
            format!("Total Cases Monitored: {}", format_number(s.total_cases)),
            format!("Districts Under Surveillance: {}", format_number(s.monitoring_districts)),
            format!("Active Disease Categories: {}", format_number(s.active_diseases)),
            format!("Population Coverage: {}%", s.coverage_percentage),
        ];
        if !s.disease_breakdown.is_empty() {
            out.push("Disease Distribution".to_string());
            for d in s.disease_breakdown.iter().take(5) {
                out.push(format!(
                    "  {}: {} cases, {:.1}% [{}]",
                    d.disease,
                    format_number(d.cases),
                    d.percentage,
                    share_severity(d.percentage)
                ));
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TemperatureTrends {
    current_avg: f64,
    trend: String,
    heat_index: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HumidityAnalysis {
    current_avg: f64,
    disease_risk: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HealthCorrelations {
    malaria_risk: String,
    dengue_risk: String,
    respiratory_risk: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegionInfo {
    districts: Vec<String>,
    total_cases: Value,
    climate_factors: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClimateData {
    temperature_trends: TemperatureTrends,
    humidity_analysis: HumidityAnalysis,
    health_correlations: Option<HealthCorrelations>,
    high_risk_areas: BTreeMap<String, RegionInfo>,
}

pub struct ClimateMonitoring;

impl Widget for ClimateMonitoring {
    fn lines(&self, payload: &Value, _now: DateTime<Utc>) -> Result<Vec<String>> {
        let c: ClimateData = decode(payload)?;
        let t = &c.temperature_trends;
        let h = &c.humidity_analysis;
        let mut out = vec![
            format!("Temperature: {}°C ({})", t.current_avg.round(), or_default(&t.trend, "Stable")),
            format!("Humidity: {}% (Risk: {})", h.current_avg.round(), or_default(&h.disease_risk, "Low")),
            format!("Heat Index: {}°C", t.heat_index.round()),
        ];
        for (region, info) in &c.high_risk_areas {
            let cases = match &info.total_cases {
                Value::Number(n) => format_number(n.as_f64().unwrap_or(0.0)),
                Value::String(s) => s.clone(),
                _ => "N/A".to_string(),
            };
            out.push(format!(
                "{}: {} cases in {}",
                region.replace('_', " "),
                cases,
                info.districts.join(", ")
            ));
            if !info.climate_factors.is_empty() {
                out.push(format!("    {}", info.climate_factors));
            }
        }
        if let Some(hc) = &c.health_correlations {
            out.push(format!(
                "Risk correlations: malaria {}, dengue {}, respiratory {}",
                or_default(&hc.malaria_risk, "N/A"),
                or_default(&hc.dengue_risk, "N/A"),
                or_default(&hc.respiratory_risk, "N/A")
            ));
        }
        Ok(out)
    }
}

// =============================================================================
// Map and chart
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MapPoint {
    location: String,
    lat: f64,
    lng: f64,
    cases: f64,
    province: String,
}

/// Marker colour band for a location's case count.
pub fn case_risk_level(cases: f64) -> &'static str {
    if cases > 3000.0 {
        "High"
    } else if cases > 1000.0 {
        "Medium"
    } else {
        "Low"
    }
}

pub struct MapMarkers;

impl Widget for MapMarkers {
    fn lines(&self, payload: &Value, _now: DateTime<Utc>) -> Result<Vec<String>> {
        let points: Vec<MapPoint> = decode(payload)?;
        let mut out = vec![format!("{} marker(s)", points.len())];
        for p in &points {
            out.push(format!(
                "{} ({:.4}, {:.4}) {} cases, risk {}, {}",
                p.location,
                p.lat,
                p.lng,
                format_number(p.cases),
                case_risk_level(p.cases),
                p.province
            ));
        }
        Ok(out)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Series {
    dates: Vec<String>,
    cases: Vec<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DiseaseTrends {
    malaria: Series,
    dengue: Series,
    respiratory: Series,
}

/// Line chart reduced to one row per series: point count and latest value.
pub struct TrendChart;

impl Widget for TrendChart {
    fn lines(&self, payload: &Value, _now: DateTime<Utc>) -> Result<Vec<String>> {
        let t: DiseaseTrends = decode(payload)?;
        let span = match (t.malaria.dates.first(), t.malaria.dates.last()) {
            (Some(first), Some(last)) => format!("{} .. {}", first, last),
            _ => "no dates".to_string(),
        };
        let mut out = vec![format!("Period: {}", span)];
        for (name, series) in [("Malaria", &t.malaria), ("Dengue", &t.dengue), ("Respiratory", &t.respiratory)] {
            let latest = series.cases.last().copied().map(format_number).unwrap_or_else(|| "-".to_string());
            out.push(format!("{}: {} point(s), latest {}", name, series.cases.len(), latest));
        }
        Ok(out)
    }
}
