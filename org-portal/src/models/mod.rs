pub mod organization;
pub mod session;
pub mod user;

pub use organization::{Organization, OrganizationChanges};
pub use session::{AuthSession, SessionTokens};
pub use user::{AuthUser, CurrentUser, SignedInUser, UserRecord, UserUpdate};
