/*
[INPUT]:  API credentials and a timestamp source
[OUTPUT]: Signed login arguments
[POS]:    Auth layer - login handshake collaborators
[UPDATE]: When auth flow or signature methods change
*/

pub mod credentials;
pub mod signer;

pub use credentials::{Credentials, LOGIN_METHOD, LOGIN_PATH, LoginArgs};
pub use signer::{Clock, HmacSha256Signer, RequestSigner, SystemClock};
