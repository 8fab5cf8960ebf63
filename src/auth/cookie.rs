use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, SameSite};

pub const REFRESH_COOKIE: &str = "refreshToken";

/// Scoped, script-inaccessible cookie carrying the rotated refresh token.
pub fn refresh_cookie(token: String, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::seconds(max_age.as_secs() as i64))
        .build()
}

/// Removal cookie; attributes must match the ones used when setting it.
pub fn cleared_refresh_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, ""))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_cookie_attributes() {
        let c = refresh_cookie("tok".into(), Duration::from_secs(15 * 24 * 3600), true);
        assert_eq!(c.name(), REFRESH_COOKIE);
        assert_eq!(c.value(), "tok");
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.secure(), Some(true));
        assert_eq!(c.same_site(), Some(SameSite::Strict));
        assert_eq!(c.max_age(), Some(time::Duration::days(15)));
    }

    #[test]
    fn cleared_cookie_expires_immediately() {
        let c = cleared_refresh_cookie(false);
        assert_eq!(c.value(), "");
        assert_eq!(c.max_age(), Some(time::Duration::ZERO));
    }
}
