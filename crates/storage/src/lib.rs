pub mod credentials;
pub mod shell_env;
pub mod token;

pub use credentials::{read_account, AccountSession, CredentialStore};
pub use shell_env::{EnvUpdate, EnvWriter};
pub use token::{decode_identity, pad_base64url, TokenIdentity};
