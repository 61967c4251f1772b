//! Identity and session management for the portal.
//! Keep the public surface thin and split implementation across sub-modules.

mod credentials;
mod events;
mod provider;
mod session;
mod subject;

pub use credentials::{verify_password, PasswordHasher};
pub use events::{SessionEvent, SessionEvents};
pub use provider::{normalize_email, IdentityProvider, LocalIdentityProvider, SignUpRequest, MIN_PASSWORD_LEN};
pub use session::{Session, SessionManager, SessionToken};
pub use subject::Subject;
