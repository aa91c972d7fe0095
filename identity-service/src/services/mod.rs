pub mod auth;
pub mod authz;
pub mod challenge_cache;
pub mod invitation;
pub mod jwt;
pub mod notify;
pub mod otp;
pub mod passkey;
pub mod token_cache;
pub mod totp;

pub use auth::{AuthService, ClientMeta, EstablishedSession, LoginOutcome, MfaType, SessionUser};
pub use authz::{AccessRequirements, AuthorizedContext, AuthzService};
pub use challenge_cache::ChallengeCache;
pub use invitation::{InvitationProbe, InvitationService};
pub use jwt::{AccessTokenClaims, AccessTokenPayload, JwtService, RefreshTokenClaims, TokenPair};
pub use notify::{NoopNotifier, NotificationKind, NotificationPayload, NotificationSink, SmtpNotifier};
pub use otp::EmailOtpService;
pub use passkey::PasskeyService;
pub use token_cache::TokenCache;
pub use totp::{TotpService, TotpSetup};
