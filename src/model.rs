//! Request and response bodies
//!
//! The `/add_person` and `/get_similar_person` shapes (including the
//! capitalized `Person`/`Name`/`Features`/`Score` keys) are what existing
//! clients of the service send and parse.

use serde::{Deserialize, Serialize};
use visage_core::{Entity, MatchResult};

/// POST /add_person body. Also the record format for `visage-db import`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPersonRequest {
    pub name: String,
    pub features: Vec<f64>,
}

impl From<AddPersonRequest> for Entity {
    fn from(value: AddPersonRequest) -> Self {
        Entity::new(value.name, value.features)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonBody {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Features")]
    pub features: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchBody {
    #[serde(rename = "Person")]
    pub person: PersonBody,
    #[serde(rename = "Score")]
    pub score: f64,
}

impl From<MatchResult> for MatchBody {
    fn from(value: MatchResult) -> Self {
        Self {
            person: PersonBody {
                name: value.entity.name.clone(),
                features: value.entity.features.clone(),
            },
            score: value.score,
        }
    }
}

/// GET /get_similar_person response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarPersonsResponse {
    pub persons: Vec<MatchBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub entities: usize,
    pub capacity: usize,
    pub dimensions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
