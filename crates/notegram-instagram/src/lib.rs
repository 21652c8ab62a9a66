//! Instagram-shaped notes platform client and the account session lifecycle.
mod authenticator;
mod device;
mod http_client;
mod login_locks;
mod types;

pub use authenticator::{ActionOutcome, Authenticator, SessionOutcome, TwoFactorContinuation};
pub use device::DeviceProfile;
pub use http_client::{InstagramConfig, InstagramHttpClient, PRODUCTION_API_BASE};
pub use login_locks::LoginLockMap;
pub use types::{
    Audience, AuthError, LoginOutcome, Note, NoteReply, NotesPlatform, PendingTwoFactor,
    PlatformError, SessionState,
};
