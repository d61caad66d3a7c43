use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Label used both as the page identifier and as the vector id, e.g. `<Page 003>`.
pub fn page_label(number: u32) -> String {
    format!("<Page {number:03}>")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    #[serde(rename = "pageNumber")]
    pub page_number: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub page_number: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: PageMetadata,
}

impl VectorRecord {
    pub fn from_page(page: &PageRecord, embedding: Vec<f32>) -> Self {
        Self {
            id: page.page_number.clone(),
            embedding,
            metadata: PageMetadata {
                page_number: page.page_number.clone(),
                text: page.content.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f64,
    pub metadata: Option<PageMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    Dotproduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::Dotproduct => "dotproduct",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            "dotproduct" => Ok(Self::Dotproduct),
            other => Err(format!("unknown similarity metric: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerlessSpec {
    pub cloud: String,
    pub region: String,
}

impl Default for ServerlessSpec {
    fn default() -> Self {
        Self {
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    pub serverless: ServerlessSpec,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, dimension: usize, metric: Metric) -> Self {
        Self {
            name: name.into(),
            dimension,
            metric,
            serverless: ServerlessSpec::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TroubleshootingAnswer {
    Found {
        #[serde(rename = "pageNumber")]
        page_number: String,
        #[serde(rename = "pageSource")]
        page_source: String,
    },
    NotFound {
        output: String,
    },
}

impl TroubleshootingAnswer {
    pub fn page_number(&self) -> Option<&str> {
        match self {
            Self::Found { page_number, .. } => Some(page_number),
            Self::NotFound { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_labels_are_zero_padded() {
        assert_eq!(page_label(3), "<Page 003>");
        assert_eq!(page_label(42), "<Page 042>");
        assert_eq!(page_label(1234), "<Page 1234>");
    }

    #[test]
    fn answer_serializes_to_flat_json() -> Result<(), serde_json::Error> {
        let found = TroubleshootingAnswer::Found {
            page_number: "<Page 001>".to_string(),
            page_source: "Troubleshooting Condition".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&found)?,
            json!({"pageNumber": "<Page 001>", "pageSource": "Troubleshooting Condition"})
        );

        let missing = TroubleshootingAnswer::NotFound {
            output: "could not find Troubleshooting page".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&missing)?,
            json!({"output": "could not find Troubleshooting page"})
        );
        Ok(())
    }

    #[test]
    fn metric_parses_case_insensitively() {
        assert_eq!("Cosine".parse::<Metric>(), Ok(Metric::Cosine));
        assert_eq!("dotproduct".parse::<Metric>(), Ok(Metric::Dotproduct));
        assert!("manhattan".parse::<Metric>().is_err());
    }
}
