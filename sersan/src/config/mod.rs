//! Cookie configuration for the session state machine.
mod cookie;

pub use ::cookie::SameSite;
pub use self::cookie::{CookieOptions, InvalidCookieName};

pub(crate) use self::cookie::is_valid_cookie_name;
