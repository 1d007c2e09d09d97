use std::{future::Future, sync::Arc};

use reqwest::{header::CONTENT_TYPE, Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use shared::{
    domain::{RestaurantId, ReviewId, UserId},
    protocol::{QueryParams, Restaurant, RestaurantsPage, Review, ReviewChanges, ReviewKey, Tokens},
};
use tracing::{info, warn};

use crate::{
    deferred::Deferred,
    error::GatewayError,
    http::AuthorizedHttp,
    pending::{flatten_join, PendingQuery},
    refresh::{RefreshCoordinator, RefreshOutcome},
    session::{load_tokens, save_tokens, SessionStore},
    settings::ClientSettings,
    store::{Action, ApplicationState, Dispatch, ReviewsRestore},
};

/// Identity from the provider SDK login. Provider login is not enabled, so
/// nothing assigns it yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkUser {
    pub id: String,
}

pub struct RestaurantApi {
    settings: ClientSettings,
    transport: Client,
    dispatcher: Arc<dyn Dispatch>,
    session: Arc<dyn SessionStore>,
    http: Deferred<AuthorizedHttp>,
    sdk_user: Deferred<SdkUser>,
    refresh: RefreshCoordinator<Tokens, GatewayError>,
}

impl RestaurantApi {
    pub fn new(
        settings: ClientSettings,
        dispatcher: Arc<dyn Dispatch>,
        session: Arc<dyn SessionStore>,
    ) -> Arc<Self> {
        let refresh = RefreshCoordinator::new(settings.refresh_cooldown);
        Arc::new(Self {
            settings,
            transport: Client::new(),
            dispatcher,
            session,
            http: Deferred::new(),
            sdk_user: Deferred::new(),
            refresh,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn is_authenticated(&self) -> bool {
        self.http.is_set()
    }

    pub fn sdk_user(&self) -> Option<SdkUser> {
        self.sdk_user.try_get()
    }

    pub async fn tokens(&self) -> Option<Tokens> {
        load_tokens(self.session.as_ref()).await
    }

    /// Prepare the authenticated client. Operations issued before this
    /// finishes wait for it.
    pub async fn auth(self: &Arc<Self>) -> Result<(), GatewayError> {
        if let Err(err) = self.auth_http().await {
            self.report_failure("auth", &err);
            return Err(err);
        }
        self.auth_sdk();
        Ok(())
    }

    async fn auth_http(&self) -> Result<(), GatewayError> {
        if let Some(tokens) = load_tokens(self.session.as_ref()).await {
            // TODO: check expiry and refresh before installing stored tokens
            info!(app_id = %self.settings.app_id, "auth: using stored session tokens");
            return self.install(&tokens);
        }

        info!(app_id = %self.settings.app_id, "auth: requesting anonymous credential");
        let tokens: Tokens = self.post_auth(&self.settings.auth_anon_url, None).await?;
        save_tokens(self.session.as_ref(), &tokens).await?;
        self.install(&tokens)
    }

    fn auth_sdk(&self) {
        info!(app_id = %self.settings.app_id, "auth: provider sdk login disabled, skipping");
    }

    /// Refresh the access token with `tokens.refresh_token`. Callers arriving
    /// while a refresh runs share its result; calls within the cooldown after
    /// a success are skipped.
    pub async fn auth_refresh(
        self: &Arc<Self>,
        tokens: Tokens,
    ) -> Result<RefreshOutcome<Tokens>, GatewayError> {
        let this = Arc::clone(self);
        let outcome = self
            .refresh
            .run(move || async move { this.refresh_tokens(tokens).await })
            .await;
        if let Err(err) = &outcome {
            self.report_failure("auth_refresh", err);
        }
        outcome
    }

    async fn refresh_tokens(&self, tokens: Tokens) -> Result<Tokens, GatewayError> {
        info!("auth: refreshing access token");
        let update: Map<String, Value> = self
            .post_auth(&self.settings.auth_refresh_url, Some(&tokens.refresh_token))
            .await?;
        let tokens = tokens.merged(update)?;
        save_tokens(self.session.as_ref(), &tokens).await?;
        self.install(&tokens)?;
        info!("auth: access token refreshed");
        Ok(tokens)
    }

    async fn post_auth<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<T, GatewayError> {
        let mut request = self
            .transport
            .post(url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let body = request.send().await?.error_for_status()?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn install(&self, tokens: &Tokens) -> Result<(), GatewayError> {
        let http = AuthorizedHttp::new(tokens, &self.settings.base_url, Arc::clone(&self.dispatcher))?;
        self.dispatcher.dispatch(Action::ChangeUser(tokens.clone()));
        self.http.set(http);
        Ok(())
    }

    /// Deprecated: the cuisine list is moving to a different access path. The
    /// endpoint is still served, so the call keeps working.
    pub fn get_cuisines(self: &Arc<Self>) -> PendingQuery<Vec<String>> {
        warn!("get_cuisines is deprecated");
        self.query("get_cuisines", |this| async move {
            let http = this.http.get().await;
            let cuisines: Vec<String> = http.get_json("cuisines", &QueryParams::new()).await?;
            this.dispatcher
                .dispatch(Action::GetCuisines(cuisines.clone()));
            Ok(cuisines)
        })
    }

    /// List restaurants matching `query`; `page` entries override `query`
    /// entries with the same key. The stored page remembers `query`.
    pub fn get_restaurants(
        self: &Arc<Self>,
        page: QueryParams,
        query: QueryParams,
    ) -> PendingQuery<RestaurantsPage> {
        self.query("get_restaurants", |this| async move {
            let mut params = query.clone();
            params.extend(page);

            let http = this.http.get().await;
            let data: RestaurantsPage = http.get_json("restaurants", &params).await?;
            let page = RestaurantsPage { query, ..data };
            this.dispatcher
                .dispatch(Action::GetRestaurants(page.clone()));
            Ok(page)
        })
    }

    pub fn get_restaurant(self: &Arc<Self>, id: RestaurantId) -> PendingQuery<Restaurant> {
        self.query("get_restaurant", |this| async move {
            let params = QueryParams::from([("id".to_string(), id.to_string())]);

            let http = this.http.get().await;
            let restaurant: Restaurant = http.get_json("restaurants", &params).await?;
            this.dispatcher
                .dispatch(Action::GetRestaurant(restaurant.clone()));
            Ok(restaurant)
        })
    }

    fn query<T, F, Fut>(self: &Arc<Self>, operation: &'static str, run: F) -> PendingQuery<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
    {
        let this = Arc::clone(self);
        let query = run(Arc::clone(self));
        PendingQuery::spawn(async move {
            let result = query.await;
            if let Err(err) = &result {
                this.report_failure(operation, err);
            }
            result
        })
    }

    /// Adds the review locally right away, then posts it. If the post fails
    /// the review list is put back as it was.
    ///
    /// The request runs on its own task, so it goes out (and a failure is
    /// rolled back) even if the returned future is dropped.
    pub fn create_review(
        self: &Arc<Self>,
        review: Review,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send + 'static {
        let key = review.key();
        let restore =
            self.apply_optimistic(&key.restaurant_id, Action::AddReview(review.clone()));
        let rollback = Rollback {
            restore,
            applied: Some(review.clone()),
            compensation: Some(Action::DeleteReview(key.clone())),
            key,
        };

        self.mutate("create_review", rollback, |this| async move {
            let http = this.http.get().await;
            http.execute(http.request(Method::POST, "reviews").json(&review))
                .await
                .map(drop)
        })
    }

    /// Replaces the review locally right away, then sends the change. If that
    /// fails the previously loaded version is put back.
    pub fn update_review(
        self: &Arc<Self>,
        review: Review,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send + 'static {
        let key = review.key();
        let previous = self.loaded_review(&key);
        let restore =
            self.apply_optimistic(&key.restaurant_id, Action::EditReview(review.clone()));
        let compensation = match previous {
            Some(previous) => Action::EditReview(previous),
            None => Action::DeleteReview(key.clone()),
        };
        let rollback = Rollback {
            restore,
            applied: Some(review.clone()),
            compensation: Some(compensation),
            key,
        };

        self.mutate("update_review", rollback, |this| async move {
            let params = review_params(&review.id, &review.user_id);
            let http = this.http.get().await;
            let request = http
                .request(Method::PUT, "reviews")
                .query(&params)
                .json(&ReviewChanges::from(&review));
            http.execute(request).await.map(drop)
        })
    }

    /// Removes the review locally right away, then deletes it remotely. If
    /// that fails the review is restored.
    pub fn delete_review(
        self: &Arc<Self>,
        id: ReviewId,
        user_id: UserId,
        restaurant_id: RestaurantId,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send + 'static {
        let key = ReviewKey { id, restaurant_id };
        let previous = self.loaded_review(&key);
        let restore =
            self.apply_optimistic(&key.restaurant_id, Action::DeleteReview(key.clone()));
        let params = review_params(&key.id, &user_id);
        let rollback = Rollback {
            restore,
            applied: None,
            compensation: previous.map(Action::AddReview),
            key,
        };

        self.mutate("delete_review", rollback, |this| async move {
            let http = this.http.get().await;
            http.execute(http.request(Method::DELETE, "reviews").query(&params))
                .await
                .map(drop)
        })
    }

    fn mutate<F, Fut>(
        self: &Arc<Self>,
        operation: &'static str,
        rollback: Rollback,
        run: F,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send + 'static
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<(), GatewayError>> + Send + 'static,
    {
        let this = Arc::clone(self);
        let request = run(Arc::clone(self));
        let task = tokio::spawn(async move {
            let result = request.await;
            if let Err(err) = &result {
                this.roll_back(operation, err, rollback);
            }
            result
        });
        async move { flatten_join(task.await) }
    }

    /// Dispatch `action` and capture the restaurant's review list on both
    /// sides of it. `None` when the restaurant is not loaded.
    fn apply_optimistic(
        &self,
        restaurant_id: &RestaurantId,
        action: Action,
    ) -> Option<ReviewsRestore> {
        let before = self.dispatcher.state();
        let after = self.dispatcher.dispatch(action);
        let reviews = |state: &ApplicationState| {
            state
                .restaurant(restaurant_id)
                .map(|restaurant| restaurant.reviews.clone())
        };
        Some(ReviewsRestore {
            restaurant_id: restaurant_id.clone(),
            expected: reviews(&after)?,
            reviews: reviews(&before)?,
        })
    }

    /// Snapshot taken when the mutation is issued. Overlapping mutations of
    /// the same review each hold their own snapshot; [`roll_back`] only
    /// applies one while the review still shows that mutation's write.
    ///
    /// [`roll_back`]: Self::roll_back
    fn loaded_review(&self, key: &ReviewKey) -> Option<Review> {
        self.dispatcher
            .state()
            .restaurant(&key.restaurant_id)
            .and_then(|restaurant| restaurant.review(&key.id))
            .cloned()
    }

    fn roll_back(&self, operation: &str, err: &GatewayError, rollback: Rollback) {
        let Rollback {
            key,
            restore,
            applied,
            compensation,
        } = rollback;

        if let Some(restore) = restore {
            let reviews = restore.reviews.clone();
            let state = self.dispatcher.dispatch(Action::RestoreReviews(restore));
            let restored = state
                .restaurant(&key.restaurant_id)
                .is_some_and(|restaurant| restaurant.reviews == reviews);
            if restored {
                warn!(operation, review = %key.id, "optimistic update rolled back");
                self.report_failure(operation, err);
                return;
            }
        }

        // the list moved on since the optimistic write; undo just this review,
        // and only if nothing has overwritten it since
        let state = self.dispatcher.state();
        let current = state
            .restaurant(&key.restaurant_id)
            .and_then(|restaurant| restaurant.review(&key.id));
        match compensation {
            Some(action) if current == applied.as_ref() => {
                warn!(
                    operation,
                    review = %key.id,
                    compensation = action.kind(),
                    "compensating optimistic update"
                );
                self.dispatcher.dispatch(action);
            }
            _ => warn!(
                operation,
                review = %key.id,
                "review changed since the optimistic update, leaving it"
            ),
        }
        self.report_failure(operation, err);
    }

    fn report_failure(&self, operation: &str, err: &GatewayError) {
        if err.is_abort() {
            return;
        }
        warn!(operation, error = %err, "gateway request failed");
        self.dispatcher
            .dispatch(Action::ReportError(err.report(operation)));
    }
}

/// How to undo an optimistic review write.
struct Rollback {
    key: ReviewKey,
    restore: Option<ReviewsRestore>,
    /// The review as the optimistic write left it; `None` for a delete.
    applied: Option<Review>,
    compensation: Option<Action>,
}

fn review_params(id: &ReviewId, user_id: &UserId) -> QueryParams {
    QueryParams::from([
        ("id".to_string(), id.to_string()),
        ("userId".to_string(), user_id.to_string()),
    ])
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
