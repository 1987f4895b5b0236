//! Synthetic weather lookup, the stock confirmation-gated tool.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::{FieldSpec, ToolDefinition, ToolHandler, ToolSchema};

pub const WEATHER_TOOL: &str = "getWeather";
pub const WEATHER_RESOURCE_TYPE: &str = "weather";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeatherCondition {
    Sunny,
    Cloudy,
    #[serde(rename = "Partly Cloudy")]
    PartlyCloudy,
    Rainy,
    Stormy,
    Snowy,
    Foggy,
}

impl WeatherCondition {
    pub const ALL: [WeatherCondition; 7] = [
        WeatherCondition::Sunny,
        WeatherCondition::Cloudy,
        WeatherCondition::PartlyCloudy,
        WeatherCondition::Rainy,
        WeatherCondition::Stormy,
        WeatherCondition::Snowy,
        WeatherCondition::Foggy,
    ];

    /// Base temperature (°C), humidity range (%) and wind range (km/h).
    fn profile(&self) -> (i32, Range<u8>, Range<u32>) {
        match self {
            WeatherCondition::Sunny => (28, 30..50, 2..7),
            WeatherCondition::Cloudy => (18, 60..80, 5..12),
            WeatherCondition::PartlyCloudy => (22, 45..60, 3..9),
            WeatherCondition::Rainy => (15, 80..95, 8..18),
            WeatherCondition::Stormy => (12, 85..95, 15..35),
            WeatherCondition::Snowy => (-2, 70..90, 6..14),
            WeatherCondition::Foggy => (10, 90..100, 1..4),
        }
    }
}

impl fmt::Display for WeatherCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WeatherCondition::Sunny => "Sunny",
            WeatherCondition::Cloudy => "Cloudy",
            WeatherCondition::PartlyCloudy => "Partly Cloudy",
            WeatherCondition::Rainy => "Rainy",
            WeatherCondition::Stormy => "Stormy",
            WeatherCondition::Snowy => "Snowy",
            WeatherCondition::Foggy => "Foggy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherData {
    pub location: String,
    pub temperature: i32,
    pub units: Units,
    pub condition: WeatherCondition,
    pub humidity: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<u32>,
}

/// Draw one synthetic observation.
pub fn sample<R: Rng + ?Sized>(location: &str, units: Units, rng: &mut R) -> WeatherData {
    let condition = WeatherCondition::ALL[rng.gen_range(0..WeatherCondition::ALL.len())];
    let (base, humidity, wind) = condition.profile();
    let celsius = base + rng.gen_range(-3..3);
    let temperature = match units {
        Units::Metric => celsius,
        Units::Imperial => (f64::from(celsius) * 9.0 / 5.0 + 32.0).round() as i32,
    };
    WeatherData {
        location: location.to_string(),
        temperature,
        units,
        condition,
        humidity: rng.gen_range(humidity),
        wind_speed: Some(rng.gen_range(wind)),
    }
}

#[derive(Debug, Deserialize)]
struct WeatherParams {
    location: String,
    #[serde(default)]
    units: Units,
}

/// Handler producing [`WeatherData`] after a simulated network delay.
#[derive(Debug, Clone)]
pub struct WeatherTool {
    latency: Duration,
}

impl WeatherTool {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }

    pub fn schema() -> ToolSchema {
        ToolSchema::new()
            .field(
                "location",
                FieldSpec::string()
                    .describe("City or location name")
                    .required(),
            )
            .field(
                "units",
                FieldSpec::string()
                    .describe("Units for temperature (metric: Celsius, imperial: Fahrenheit)")
                    .one_of(["metric", "imperial"])
                    .default_value("metric"),
            )
    }

    /// The gated `getWeather` tool backed by this handler.
    pub fn definition(self) -> ToolDefinition {
        ToolDefinition::new(
            WEATHER_TOOL,
            "Get weather information for a location",
            Self::schema(),
            Arc::new(self),
        )
        .gated()
    }

    pub async fn fetch(&self, location: &str, units: Units) -> WeatherData {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        sample(location, units, &mut rand::thread_rng())
    }
}

#[async_trait]
impl ToolHandler for WeatherTool {
    async fn run(&self, params: JsonMap<String, JsonValue>) -> anyhow::Result<JsonValue> {
        let p: WeatherParams = serde_json::from_value(JsonValue::Object(params))
            .context("invalid weather parameters")?;
        let data = self.fetch(&p.location, p.units).await;
        tracing::debug!(
            location = %data.location,
            condition = %data.condition,
            temperature = data.temperature,
            "weather generated"
        );
        serde_json::to_value(&data)
            .with_context(|| format!("failed to get weather data for {}", p.location))
    }
}
