//! Core logic for the broker: validation, revocation and the authorization flow

pub mod blacklist;
pub mod flow;
pub mod issuer;
pub mod linkage;
mod validation;

pub use blacklist::Blacklist;
pub use flow::{
    logout_target, opaque_token, AuthorizationFlowCoordinator, AuthorizeRequest, FlowError, FlowResult,
    FlowState, LoginOutcome, SessionStateError, TokenResponse,
};
pub use issuer::{IssuedToken, TokenIssuer};
pub use linkage::build_user_context;
pub use validation::{TokenValidationError, TokenValidator, DEFAULT_AUDIENCE};
