//! Client-side state synchronization for the restaurant reviews app.
//!
//! [`Store`] owns the application state and is the only place it changes.
//! [`RestaurantApi`] talks to the backend, counts outstanding requests, and
//! applies review edits locally before the server confirms them.

pub mod deferred;
pub mod error;
pub mod gateway;
pub mod http;
pub mod pending;
pub mod refresh;
pub mod session;
pub mod settings;
pub mod store;

pub use deferred::Deferred;
pub use error::{ignore_abort, GatewayError};
pub use gateway::{RestaurantApi, SdkUser};
pub use pending::{CancelHandle, PendingQuery};
pub use refresh::{RefreshCoordinator, RefreshOutcome, DEFAULT_REFRESH_COOLDOWN};
pub use session::{FileSessionStore, MemorySessionStore, SessionError, SessionStore};
pub use settings::{load_settings, ClientSettings, SettingsError};
pub use store::{reduce, Action, ApplicationState, Dispatch, ReviewsRestore, Store};
