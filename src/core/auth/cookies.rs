//! Credential cookies
//!
//! Both tokens travel as http-only, same-site, secure cookies on path `/`.
//! Both live for the refresh-token lifetime, so an expired access token is
//! still presented and the gate can answer "expired" instead of treating the
//! request as anonymous.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration as TimeDuration;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
    /// Lifetime of both cookies
    pub max_age: chrono::Duration,
}

impl CookiePolicy {
    pub fn new(secure: bool, max_age: chrono::Duration) -> Self {
        Self { secure, max_age }
    }

    fn build(&self, name: &'static str, value: String, max_age: TimeDuration) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(max_age)
            .build()
    }

    /// Attach both credential cookies
    pub fn set_tokens(&self, jar: CookieJar, access: &str, refresh: &str) -> CookieJar {
        let max_age = TimeDuration::seconds(self.max_age.num_seconds());
        jar.add(self.build(ACCESS_COOKIE, access.to_string(), max_age))
            .add(self.build(REFRESH_COOKIE, refresh.to_string(), max_age))
    }

    /// Expire both credential cookies
    pub fn clear_tokens(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.build(ACCESS_COOKIE, String::new(), TimeDuration::ZERO))
            .add(self.build(REFRESH_COOKIE, String::new(), TimeDuration::ZERO))
    }
}

pub fn access_token(jar: &CookieJar) -> Option<String> {
    non_empty(jar, ACCESS_COOKIE)
}

pub fn refresh_token(jar: &CookieJar) -> Option<String> {
    non_empty(jar, REFRESH_COOKIE)
}

fn non_empty(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
