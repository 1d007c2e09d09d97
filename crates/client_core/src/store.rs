use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use shared::{
    domain::RestaurantId,
    error::ErrorReport,
    protocol::{Restaurant, RestaurantsPage, Review, ReviewKey, Tokens},
};
use tokio::sync::watch;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    ChangeUser(Tokens),
    InFlightBegin,
    InFlightComplete,
    GetCuisines(Vec<String>),
    GetRestaurants(RestaurantsPage),
    GetRestaurant(Restaurant),
    AddReview(Review),
    EditReview(Review),
    DeleteReview(ReviewKey),
    RestoreReviews(ReviewsRestore),
    ReportError(ErrorReport),
    DismissError,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::ChangeUser(_) => "CHANGE_USER",
            Action::InFlightBegin => "IN_FLIGHT_BEGIN",
            Action::InFlightComplete => "IN_FLIGHT_COMPLETE",
            Action::GetCuisines(_) => "GET_CUISINES",
            Action::GetRestaurants(_) => "GET_RESTAURANTS",
            Action::GetRestaurant(_) => "GET_RESTAURANT",
            Action::AddReview(_) => "ADD_REVIEW",
            Action::EditReview(_) => "EDIT_REVIEW",
            Action::DeleteReview(_) => "DELETE_REVIEW",
            Action::RestoreReviews(_) => "RESTORE_REVIEWS",
            Action::ReportError(_) => "REPORT_ERROR",
            Action::DismissError => "DISMISS_ERROR",
        }
    }
}

/// Puts a restaurant's review list back to `reviews`, but only while the list
/// still reads `expected`. Anything else means another update landed in
/// between, and the action is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewsRestore {
    pub restaurant_id: RestaurantId,
    pub expected: Vec<Review>,
    pub reviews: Vec<Review>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationState {
    pub cuisines: Vec<String>,
    pub restaurants: RestaurantsPage,
    pub restaurants_by_id: BTreeMap<RestaurantId, Restaurant>,
    pub in_flight: u32,
    /// Reserved for provider login; nothing populates it yet.
    #[serde(skip)]
    pub user: Option<Tokens>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorReport>,
}

impl ApplicationState {
    pub fn restaurant(&self, id: &RestaurantId) -> Option<&Restaurant> {
        self.restaurants_by_id.get(id)
    }
}

/// `(state, action) -> state'`.
///
/// Transitions that change nothing hand back the same `Arc`, so callers can
/// detect a no-op with `Arc::ptr_eq`.
pub fn reduce(state: &Arc<ApplicationState>, action: Action) -> Arc<ApplicationState> {
    match action {
        // nothing confidential to purge on a user switch
        Action::ChangeUser(_) => Arc::clone(state),

        Action::InFlightBegin | Action::InFlightComplete => {
            let in_flight = reduce_in_flight(state.in_flight, &action);
            update(state, |next| next.in_flight = in_flight)
        }

        Action::GetCuisines(cuisines) => update(state, |next| next.cuisines = cuisines),

        Action::GetRestaurants(page) => update(state, |next| next.restaurants = page),

        Action::GetRestaurant(restaurant) => update(state, |next| {
            next.restaurants_by_id
                .insert(restaurant.id.clone(), restaurant);
        }),

        Action::AddReview(_) | Action::EditReview(_) | Action::DeleteReview(_) => {
            reduce_restaurant_reviews(state, action)
        }

        Action::RestoreReviews(restore) => reduce_restore_reviews(state, restore),

        Action::ReportError(report) => update(state, |next| next.last_error = Some(report)),

        Action::DismissError if state.last_error.is_none() => Arc::clone(state),
        Action::DismissError => update(state, |next| next.last_error = None),
    }
}

fn update(
    state: &ApplicationState,
    apply: impl FnOnce(&mut ApplicationState),
) -> Arc<ApplicationState> {
    let mut next = state.clone();
    apply(&mut next);
    Arc::new(next)
}

fn reduce_in_flight(in_flight: u32, action: &Action) -> u32 {
    match action {
        Action::InFlightBegin => in_flight.saturating_add(1),
        Action::InFlightComplete => in_flight.saturating_sub(1),
        _ => in_flight,
    }
}

fn reduce_restaurant_reviews(state: &Arc<ApplicationState>, action: Action) -> Arc<ApplicationState> {
    let restaurant_id = match &action {
        Action::AddReview(review) | Action::EditReview(review) => &review.restaurant_id,
        Action::DeleteReview(key) => &key.restaurant_id,
        _ => return Arc::clone(state),
    };

    // the restaurant must already be loaded, and under its own id
    let Some(restaurant) = state.restaurants_by_id.get(restaurant_id) else {
        return Arc::clone(state);
    };
    if &restaurant.id != restaurant_id {
        return Arc::clone(state);
    }

    let restaurant = Restaurant {
        reviews: reduce_reviews(&restaurant.reviews, action),
        ..restaurant.clone()
    };
    update(state, |next| {
        next.restaurants_by_id
            .insert(restaurant.id.clone(), restaurant);
    })
}

fn reduce_restore_reviews(
    state: &Arc<ApplicationState>,
    restore: ReviewsRestore,
) -> Arc<ApplicationState> {
    let Some(restaurant) = state.restaurants_by_id.get(&restore.restaurant_id) else {
        return Arc::clone(state);
    };
    if restaurant.reviews != restore.expected || restaurant.reviews == restore.reviews {
        return Arc::clone(state);
    }

    let restaurant = Restaurant {
        reviews: restore.reviews,
        ..restaurant.clone()
    };
    update(state, |next| {
        next.restaurants_by_id
            .insert(restore.restaurant_id, restaurant);
    })
}

fn reduce_reviews(reviews: &[Review], action: Action) -> Vec<Review> {
    match action {
        Action::AddReview(review) => std::iter::once(review)
            .chain(reviews.iter().cloned())
            .collect(),
        Action::EditReview(review) => {
            let rest = reviews
                .iter()
                .filter(|existing| existing.id != review.id)
                .cloned()
                .collect::<Vec<_>>();
            std::iter::once(review).chain(rest).collect()
        }
        Action::DeleteReview(key) => reviews
            .iter()
            .filter(|existing| existing.id != key.id)
            .cloned()
            .collect(),
        _ => reviews.to_vec(),
    }
}

/// The single mutation entry point into application state.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, action: Action) -> Arc<ApplicationState>;
    fn state(&self) -> Arc<ApplicationState>;
}

pub struct Store {
    state: watch::Sender<Arc<ApplicationState>>,
}

impl Store {
    pub fn new() -> Self {
        Self::with_state(ApplicationState::default())
    }

    pub fn with_state(state: ApplicationState) -> Self {
        let (state, _) = watch::channel(Arc::new(state));
        Self { state }
    }

    /// Receivers are only notified when a dispatch produced a new state.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ApplicationState>> {
        self.state.subscribe()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatch for Store {
    fn dispatch(&self, action: Action) -> Arc<ApplicationState> {
        let kind = action.kind();
        let mut reduced = None;
        let changed = self.state.send_if_modified(|current| {
            let next = reduce(current, action);
            let changed = !Arc::ptr_eq(current, &next);
            *current = Arc::clone(&next);
            reduced = Some(next);
            changed
        });
        if !changed {
            trace!(action = kind, "dispatch left state unchanged");
        }
        reduced.unwrap_or_else(|| self.state())
    }

    fn state(&self) -> Arc<ApplicationState> {
        Arc::clone(&self.state.borrow())
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
