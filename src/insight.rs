use std::collections::BTreeMap;
use std::ops::Range;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::{GeneratedInsight, SourceType};

/// Per-record failure while turning a payload into an insight.
///
/// These are recoverable: the batch driver logs them and moves on.
#[derive(Debug, Error)]
pub enum InsightError {
    /// Stored content is not a JSON document at all.
    #[error("content for {source_type} record is not valid JSON: {source}")]
    InvalidJson {
        source_type: SourceType,
        #[source]
        source: serde_json::Error,
    },

    /// Content is JSON but lacks a required field or has the wrong shape.
    #[error("malformed {source_type} payload: {reason}")]
    MalformedPayload {
        source_type: SourceType,
        reason: String,
    },
}

pub fn confidence_range(source_type: SourceType) -> Range<f64> {
    match source_type {
        SourceType::Financial => 0.85..0.95,
        SourceType::Scientific => 0.88..0.98,
        SourceType::Social => 0.82..0.92,
        SourceType::Iot => 0.80..0.90,
    }
}

pub fn category_label(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::Financial => "AVANCÉ",
        SourceType::Scientific => "SCIENTIFIQUE",
        SourceType::Social => "SOCIAL",
        SourceType::Iot => "ENVIRONNEMENTAL",
    }
}

#[derive(Deserialize)]
struct FinancialPayload {
    symbol: String,
    data: FinancialData,
}

#[derive(Deserialize)]
struct FinancialData {
    price_change_percent: f64,
    volatility: f64,
}

#[derive(Deserialize)]
struct ScientificPayload {
    query: String,
    papers_found: u64,
    trending_topics: Vec<String>,
}

#[derive(Deserialize)]
struct SocialPayload {
    topic: String,
    sentiment_analysis: SentimentAnalysis,
    engagement_metrics: EngagementMetrics,
}

#[derive(Deserialize)]
struct SentimentAnalysis {
    positive: f64,
}

#[derive(Deserialize)]
struct EngagementMetrics {
    mentions: u64,
}

#[derive(Deserialize)]
struct IotPayload {
    sensor_type: String,
    anomalies_detected: u64,
    readings: BTreeMap<String, f64>,
}

fn parse_payload<T: DeserializeOwned>(
    source_type: SourceType,
    content: &Value,
) -> Result<T, InsightError> {
    T::deserialize(content).map_err(|err| InsightError::MalformedPayload {
        source_type,
        reason: err.to_string(),
    })
}

/// Builds the templated insight for one payload.
///
/// Returns `Ok(None)` when `source_type` is not one of the recognized types.
/// Pure apart from drawing the confidence score from `rng`.
pub fn generate_insight<R: Rng + ?Sized>(
    source_type: &str,
    content: &Value,
    rng: &mut R,
) -> Result<Option<GeneratedInsight>, InsightError> {
    let Some(source_type) = SourceType::recognize(source_type) else {
        return Ok(None);
    };

    let text = match source_type {
        SourceType::Financial => {
            let payload: FinancialPayload = parse_payload(source_type, content)?;
            let change = payload.data.price_change_percent;
            let trend = if change > 0.0 { "haussière" } else { "baissière" };
            format!(
                "ARBITRAGE P3: {} montre tendance {} ({}%). Opportunité d'optimisation détectée avec volatilité {}",
                payload.symbol, trend, change, payload.data.volatility
            )
        }
        SourceType::Scientific => {
            let payload: ScientificPayload = parse_payload(source_type, content)?;
            let topics: Vec<&str> = payload
                .trending_topics
                .iter()
                .take(2)
                .map(String::as_str)
                .collect();
            format!(
                "INNOVATION P3: Analyse de {} publications sur '{}' révèle convergence vers {}",
                payload.papers_found,
                payload.query,
                topics.join(", ")
            )
        }
        SourceType::Social => {
            let payload: SocialPayload = parse_payload(source_type, content)?;
            format!(
                "ARBITRAGE SOCIAL P3: Sentiment {:.1}% positif sur '{}'. Engagement élevé ({} mentions) suggère momentum croissant",
                payload.sentiment_analysis.positive * 100.0,
                payload.topic,
                payload.engagement_metrics.mentions
            )
        }
        SourceType::Iot => {
            let payload: IotPayload = parse_payload(source_type, content)?;
            let readings: Vec<String> = payload
                .readings
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            format!(
                "P3 IOT: {} anomalies détectées dans données {}. Conditions environnementales: {}",
                payload.anomalies_detected,
                payload.sensor_type,
                readings.join(", ")
            )
        }
    };

    Ok(Some(GeneratedInsight {
        text,
        confidence: rng.gen_range(confidence_range(source_type)),
        category_label: category_label(source_type).to_string(),
    }))
}

/// Same as [`generate_insight`], starting from the JSON text held in storage.
///
/// Unrecognized source types short-circuit before the content is parsed.
pub fn generate_from_stored<R: Rng + ?Sized>(
    source_type: &str,
    content: &str,
    rng: &mut R,
) -> Result<Option<GeneratedInsight>, InsightError> {
    let Some(recognized) = SourceType::recognize(source_type) else {
        return Ok(None);
    };
    let value: Value =
        serde_json::from_str(content).map_err(|source| InsightError::InvalidJson {
            source_type: recognized,
            source,
        })?;
    generate_insight(source_type, &value, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn financial_positive_change_is_bullish() {
        let content = json!({
            "symbol": "AAPL",
            "data": {"price_change_percent": 3.2, "volatility": 0.15}
        });
        let insight = generate_insight("financial", &content, &mut rng())
            .unwrap()
            .unwrap();

        assert!(insight.text.contains("AAPL"));
        assert!(insight.text.contains("haussière"));
        assert!(insight.text.contains("(3.2%)"));
        assert!(insight.text.contains("volatilité 0.15"));
        assert!((0.85..0.95).contains(&insight.confidence));
        assert_eq!(insight.category_label, "AVANCÉ");
    }

    #[test]
    fn financial_flat_or_negative_change_is_bearish() {
        let mut rng = rng();
        for change in [0.0, -1.4] {
            let content = json!({
                "symbol": "TSLA",
                "data": {"price_change_percent": change, "volatility": 0.2}
            });
            let insight = generate_insight("financial", &content, &mut rng)
                .unwrap()
                .unwrap();
            assert!(insight.text.contains("baissière"), "{}", insight.text);
        }
    }

    #[test]
    fn scientific_mentions_first_two_topics() {
        let content = json!({
            "query": "machine learning ethics",
            "papers_found": 42,
            "trending_topics": ["AGI safety", "LLM optimization", "Multimodal learning"]
        });
        let insight = generate_insight("scientific", &content, &mut rng())
            .unwrap()
            .unwrap();

        assert_eq!(
            insight.text,
            "INNOVATION P3: Analyse de 42 publications sur 'machine learning ethics' révèle convergence vers AGI safety, LLM optimization"
        );
        assert!((0.88..0.98).contains(&insight.confidence));
    }

    #[test]
    fn social_formats_sentiment_as_percentage() {
        let content = json!({
            "topic": "AI ethics",
            "sentiment_analysis": {"positive": 0.734, "negative": 0.2},
            "engagement_metrics": {"mentions": 1200}
        });
        let insight = generate_insight("social", &content, &mut rng())
            .unwrap()
            .unwrap();

        assert!(insight.text.contains("Sentiment 73.4% positif sur 'AI ethics'"));
        assert!(insight.text.contains("(1200 mentions)"));
        assert_eq!(insight.category_label, "SOCIAL");
    }

    #[test]
    fn iot_lists_readings_in_key_order() {
        let content = json!({
            "sensor_type": "environmental",
            "anomalies_detected": 2,
            "readings": {"temperature": 21.5, "humidity": 55.0}
        });
        let insight = generate_insight("iot", &content, &mut rng())
            .unwrap()
            .unwrap();

        assert!(insight
            .text
            .ends_with("Conditions environnementales: humidity=55, temperature=21.5"));
        assert!(insight.text.starts_with("P3 IOT: 2 anomalies"));
    }

    #[test]
    fn unknown_source_type_produces_nothing() {
        let result = generate_insight("unknown_type", &json!({}), &mut rng()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn missing_keys_are_malformed() {
        let content = json!({"symbol": "AAPL"});
        let err = generate_insight("financial", &content, &mut rng()).unwrap_err();
        assert!(matches!(
            err,
            InsightError::MalformedPayload {
                source_type: SourceType::Financial,
                ..
            }
        ));
    }

    #[test]
    fn stored_garbage_is_invalid_json_only_for_known_types() {
        let err = generate_from_stored("iot", "{not json", &mut rng()).unwrap_err();
        assert!(matches!(err, InsightError::InvalidJson { .. }));

        let skipped = generate_from_stored("weather", "{not json", &mut rng()).unwrap();
        assert!(skipped.is_none());
    }

    #[test]
    fn confidence_stays_inside_branch_bounds() {
        let mut rng = StdRng::seed_from_u64(99);
        let cases = [
            (
                "financial",
                json!({"symbol": "GOOGL", "data": {"price_change_percent": 1.0, "volatility": 0.1}}),
                0.85,
                0.95,
            ),
            (
                "scientific",
                json!({"query": "ai", "papers_found": 30, "trending_topics": ["AGI safety"]}),
                0.88,
                0.98,
            ),
            (
                "social",
                json!({"topic": "AI ethics", "sentiment_analysis": {"positive": 0.5}, "engagement_metrics": {"mentions": 10}}),
                0.82,
                0.92,
            ),
            (
                "iot",
                json!({"sensor_type": "environmental", "anomalies_detected": 1, "readings": {"humidity": 50.0}}),
                0.80,
                0.90,
            ),
        ];

        for (source_type, content, low, high) in &cases {
            for _ in 0..1000 {
                let insight = generate_insight(source_type, content, &mut rng)
                    .unwrap()
                    .unwrap();
                assert!(
                    insight.confidence >= *low && insight.confidence < *high,
                    "{source_type} confidence {} outside [{low}, {high})",
                    insight.confidence
                );
            }
        }
    }
}
