pub mod password;
pub mod token;
pub mod validation;

pub use password::{
    hash_password, unusable_password_hash, verify_password, Password, PasswordHashString,
};
pub use token::{generate_numeric_code, generate_token, sha256_hex};
pub use validation::ValidatedJson;
