//! Credential and access-token lifecycle.
//!
//! One [`TokenRefresher`] per process holds the single source of truth for the
//! access token. Both the HTTP order path and the streaming connection read
//! from it.

pub mod clock;
pub mod error;
pub mod http;
pub mod refresher;
pub mod store;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AuthError, AuthResult, TransportError};
pub use http::{
    BoxFuture, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RpcFailure,
    ScriptedTransport,
};
pub use refresher::{AuthConfig, TokenRefresher};
pub use store::TokenStore;
pub use token::{Credential, Token};
