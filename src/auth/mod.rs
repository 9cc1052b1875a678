//! Authentication module for the DicoEvent server
//!
//! Password hashing, JWT issuing and validation, the bearer-token extractor
//! and the role policies every protected route checks against.

pub mod handlers;
mod extractor;
mod permissions;
mod service;

pub use extractor::{bearer_token, AuthenticatedUser};
pub use permissions::{can_edit_profile, can_manage_event, Access};
pub use service::{AuthService, Claims, TokenPair, TokenType};
