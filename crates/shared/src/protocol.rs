use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{RestaurantId, ReviewId, UserId};

/// Query-string parameters, kept ordered so requests are reproducible.
pub type QueryParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: ReviewId,
    pub restaurant_id: RestaurantId,
    pub user_id: UserId,
    pub text: String,
    pub rating: u8,
    pub timestamp: DateTime<Utc>,
}

impl Review {
    pub fn key(&self) -> ReviewKey {
        ReviewKey {
            id: self.id.clone(),
            restaurant_id: self.restaurant_id.clone(),
        }
    }
}

/// Body of `PUT /reviews`: the review without its `id` and `userId`, which
/// travel in the query string instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewChanges {
    pub restaurant_id: RestaurantId,
    pub text: String,
    pub rating: u8,
    pub timestamp: DateTime<Utc>,
}

impl From<&Review> for ReviewChanges {
    fn from(review: &Review) -> Self {
        Self {
            restaurant_id: review.restaurant_id.clone(),
            text: review.text.clone(),
            rating: review.rating,
            timestamp: review.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewKey {
    pub id: ReviewId,
    pub restaurant_id: RestaurantId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: RestaurantId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuisine: Option<String>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl Restaurant {
    pub fn new(id: impl Into<RestaurantId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cuisine: None,
            reviews: Vec::new(),
            details: Map::new(),
        }
    }

    pub fn review(&self, id: &ReviewId) -> Option<&Review> {
        self.reviews.iter().find(|review| &review.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantSummary {
    pub id: RestaurantId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuisine: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// One page of `GET /restaurants`, tagged with the query that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestaurantsPage {
    #[serde(default)]
    pub query: QueryParams,
    #[serde(default)]
    pub items: Vec<RestaurantSummary>,
    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tokens {
    /// Overlay the fields of a refresh response. Fields the response does not
    /// carry keep their previous value.
    pub fn merged(&self, update: Map<String, Value>) -> serde_json::Result<Tokens> {
        let mut fields = match serde_json::to_value(self)? {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        fields.extend(update);
        serde_json::from_value(Value::Object(fields))
    }
}
