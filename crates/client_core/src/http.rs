use std::sync::Arc;

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, RequestBuilder,
};
use serde::de::DeserializeOwned;
use shared::protocol::{QueryParams, Tokens};

use crate::{
    error::GatewayError,
    store::{Action, Dispatch},
};

/// HTTP client carrying the session's bearer token. Every request it executes
/// is counted in `inFlight` for as long as it is outstanding.
#[derive(Clone)]
pub struct AuthorizedHttp {
    client: Client,
    base_url: String,
    dispatcher: Arc<dyn Dispatch>,
}

impl AuthorizedHttp {
    pub fn new(
        tokens: &Tokens,
        base_url: &str,
        dispatcher: Arc<dyn Dispatch>,
    ) -> Result<Self, GatewayError> {
        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", tokens.access_token))
            .map_err(|_| GatewayError::InvalidCredential)?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, authorization);

        let client = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            dispatcher,
        })
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{path}", self.base_url))
    }

    /// Send `request` and read its body, bracketed by IN_FLIGHT_BEGIN and
    /// IN_FLIGHT_COMPLETE. The completion is dispatched on every path out,
    /// including the future being dropped mid-flight.
    pub async fn execute(&self, request: RequestBuilder) -> Result<Vec<u8>, GatewayError> {
        let _in_flight = InFlight::begin(Arc::clone(&self.dispatcher));
        let body = request
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(body.to_vec())
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &QueryParams,
    ) -> Result<T, GatewayError> {
        let body = self
            .execute(self.request(Method::GET, path).query(params))
            .await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

struct InFlight {
    dispatcher: Arc<dyn Dispatch>,
}

impl InFlight {
    fn begin(dispatcher: Arc<dyn Dispatch>) -> Self {
        dispatcher.dispatch(Action::InFlightBegin);
        Self { dispatcher }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.dispatcher.dispatch(Action::InFlightComplete);
    }
}
