pub mod authenticator;
pub mod email_otp;
pub mod invitation;
pub mod passkey;
pub mod password_reset;
pub mod refresh_token;
pub mod role;
pub mod tenant;
pub mod user;

pub use authenticator::UserAuthenticator;
pub use email_otp::EmailOtp;
pub use invitation::UserInvitation;
pub use passkey::UserPasskey;
pub use password_reset::PasswordResetToken;
pub use refresh_token::RefreshToken;
pub use role::{Role, RoleGrantRow};
pub use tenant::{MembershipRow, Tenant};
pub use user::User;
