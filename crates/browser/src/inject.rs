//! Turns a cached refresh token into a logged-in browser session.

use autologin_core::{Error, Result, SiteConfig, Timings};
use autologin_storage::AccountSession;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::cdp::CookieParam;
use crate::driver::BrowserDriver;

/// Joins user id and refresh token in the session cookie value.
pub const COOKIE_SEPARATOR: &str = "::";

/// Lifetime of a script-installed cookie, in seconds (60 days).
pub const SCRIPT_COOKIE_MAX_AGE: u64 = 5_184_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieMethod {
    Native,
    Script,
}

/// Where the browser ended up after visiting the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardStatus {
    Verified,
    AuthChallenge,
    Elsewhere(String),
    Unknown(String),
}

#[derive(Debug, Clone)]
pub struct InjectReport {
    pub cookie_method: CookieMethod,
    pub dashboard: DashboardStatus,
    /// Whether the root-then-dashboard navigation was repeated.
    pub retried: bool,
}

pub fn cookie_value(session: &AccountSession) -> String {
    format!(
        "{}{}{}",
        session.user_id(),
        COOKIE_SEPARATOR,
        session.refresh_token()
    )
}

/// Cookie value with the separator percent-encoded.
pub fn encoded_cookie_value(session: &AccountSession) -> String {
    format!(
        "{}{}{}",
        session.user_id(),
        urlencoding::encode(COOKIE_SEPARATOR),
        session.refresh_token()
    )
}

fn session_cookie(site: &SiteConfig, session: &AccountSession) -> CookieParam {
    CookieParam {
        name: site.cookie_name.clone(),
        value: cookie_value(session),
        domain: site.cookie_domain.clone(),
        path: site.cookie_path.clone(),
        secure: true,
        http_only: false,
        same_site: "None".to_string(),
    }
}

/// `document.cookie` assignment used when the native install is refused.
pub fn cookie_script(site: &SiteConfig, session: &AccountSession) -> Result<String> {
    let cookie = format!(
        "{}={}; domain={}; path={}; max-age={}; secure; SameSite=None",
        site.cookie_name,
        encoded_cookie_value(session),
        site.cookie_domain,
        site.cookie_path,
        SCRIPT_COOKIE_MAX_AGE
    );
    Ok(format!("document.cookie = {};", serde_json::to_string(&cookie)?))
}

/// One-line snippet a user can paste into the developer console.
pub fn manual_login_script(site: &SiteConfig, session: &AccountSession) -> String {
    format!(
        "document.cookie=\"{}={};domain={};path={};secure;SameSite=None\";location.reload();",
        site.cookie_name,
        encoded_cookie_value(session),
        site.cookie_domain,
        site.cookie_path
    )
}

/// Classify a page URL against the dashboard and the challenge host.
pub fn classify_url(url: &str, site: &SiteConfig) -> DashboardStatus {
    let Ok(parsed) = Url::parse(url) else {
        if url.contains(&site.auth_challenge_host) {
            return DashboardStatus::AuthChallenge;
        }
        return DashboardStatus::Unknown(format!("unparseable URL {}", url));
    };

    let host = parsed.host_str().unwrap_or_default();
    if host == site.auth_challenge_host
        || host.ends_with(&format!(".{}", site.auth_challenge_host))
    {
        return DashboardStatus::AuthChallenge;
    }

    let dashboard_path = Url::parse(&site.dashboard_url)
        .map(|u| u.path().trim_end_matches('/').to_string())
        .unwrap_or_else(|_| "/dashboard".to_string());
    if !dashboard_path.is_empty() && parsed.path().starts_with(&dashboard_path) {
        DashboardStatus::Verified
    } else {
        DashboardStatus::Elsewhere(url.to_string())
    }
}

pub struct SessionInjector<'a> {
    site: &'a SiteConfig,
    timings: Timings,
}

impl<'a> SessionInjector<'a> {
    pub fn new(site: &'a SiteConfig, timings: Timings) -> Self {
        Self { site, timings }
    }

    /// Install the session cookie and check where the dashboard lands.
    ///
    /// Fails only when the cookie cannot be installed; the dashboard check
    /// is reported in the result.
    pub async fn inject<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
        session: &AccountSession,
    ) -> Result<InjectReport> {
        driver.navigate(&self.site.root_url).await?;
        settle(self.timings.short_settle).await;
        driver.delete_all_cookies().await?;

        let cookie_method = self.install_cookie(driver, session).await?;
        info!(method = ?cookie_method, "Session cookie installed");

        let (dashboard, retried) = self.visit_dashboard(driver).await;
        Ok(InjectReport {
            cookie_method,
            dashboard,
            retried,
        })
    }

    async fn install_cookie<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
        session: &AccountSession,
    ) -> Result<CookieMethod> {
        let method = match driver.add_cookie(&session_cookie(self.site, session)).await {
            Ok(()) => CookieMethod::Native,
            Err(e) => {
                warn!(error = %e, "Native cookie install failed, trying script");
                driver
                    .execute_script(&cookie_script(self.site, session)?)
                    .await?;
                CookieMethod::Script
            }
        };

        let cookies = driver.get_cookies().await?;
        if cookies.iter().any(|c| c.name == self.site.cookie_name) {
            Ok(method)
        } else {
            Err(Error::CookieRejected(format!(
                "{} not present after install",
                self.site.cookie_name
            )))
        }
    }

    async fn visit_dashboard<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
    ) -> (DashboardStatus, bool) {
        let first = self.open_dashboard(driver).await;
        if first != DashboardStatus::AuthChallenge {
            return (first, false);
        }

        debug!("Landed on the auth challenge, retrying once");
        if let Err(e) = driver.navigate(&self.site.root_url).await {
            return (DashboardStatus::Unknown(e.to_string()), true);
        }
        settle(self.timings.short_settle).await;
        (self.open_dashboard(driver).await, true)
    }

    async fn open_dashboard<D: BrowserDriver + ?Sized>(&self, driver: &mut D) -> DashboardStatus {
        if let Err(e) = driver.navigate(&self.site.dashboard_url).await {
            return DashboardStatus::Unknown(e.to_string());
        }
        settle(self.timings.page_settle).await;
        match driver.current_url().await {
            Ok(url) => classify_url(&url, self.site),
            Err(e) => DashboardStatus::Unknown(e.to_string()),
        }
    }
}

pub(crate) async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::driver::Cookie;
    use std::collections::VecDeque;

    const TOKEN: &str = "eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJhdXRoMHx1c2VyXzQyIiwiZXhwIjoxOTAwMDAwMDAwfQ.sig";
    const CHALLENGE: &str = "https://authenticator.cursor.sh/?client_id=abc";

    fn account() -> AccountSession {
        AccountSession::new("dev@example.com", TOKEN)
    }

    fn injector(site: &SiteConfig) -> SessionInjector<'_> {
        SessionInjector::new(site, Timings::immediate())
    }

    #[test]
    fn test_cookie_values() {
        let a = account();
        assert_eq!(a.user_id(), "user_42");
        assert_eq!(cookie_value(&a), format!("user_42::{}", TOKEN));
        assert_eq!(encoded_cookie_value(&a), format!("user_42%3A%3A{}", TOKEN));
    }

    #[test]
    fn test_manual_login_script() {
        let site = SiteConfig::default();
        assert_eq!(
            manual_login_script(&site, &account()),
            format!(
                "document.cookie=\"WorkosCursorSessionToken=user_42%3A%3A{};domain=.cursor.com;path=/;secure;SameSite=None\";location.reload();",
                TOKEN
            )
        );
    }

    #[test]
    fn test_cookie_script() {
        let script = cookie_script(&SiteConfig::default(), &account()).unwrap();
        assert!(script.starts_with("document.cookie = \"WorkosCursorSessionToken=user_42%3A%3A"));
        assert!(script.contains("max-age=5184000"));
        assert!(script.contains("SameSite=None"));
    }

    #[test]
    fn test_classify_url() {
        let site = SiteConfig::default();
        assert_eq!(
            classify_url("https://www.cursor.com/dashboard", &site),
            DashboardStatus::Verified
        );
        assert_eq!(
            classify_url("https://www.cursor.com/dashboard?tab=settings", &site),
            DashboardStatus::Verified
        );
        assert_eq!(classify_url(CHALLENGE, &site), DashboardStatus::AuthChallenge);
        assert_eq!(
            classify_url("https://cursor.com/pricing", &site),
            DashboardStatus::Elsewhere("https://cursor.com/pricing".into())
        );
        // a query mentioning the challenge host is not a redirect
        assert_eq!(
            classify_url("https://www.cursor.com/dashboard?from=authenticator.cursor.sh", &site),
            DashboardStatus::Verified
        );
        assert!(matches!(
            classify_url("not a url", &site),
            DashboardStatus::Unknown(_)
        ));
    }

    #[tokio::test]
    async fn test_native_inject_verified() {
        let site = SiteConfig::default();
        let mut driver = FakeDriver {
            cookies: vec![Cookie {
                name: "stale".into(),
                value: "x".into(),
                domain: ".cursor.com".into(),
            }],
            ..Default::default()
        };

        let report = injector(&site).inject(&mut driver, &account()).await.unwrap();
        assert_eq!(report.cookie_method, CookieMethod::Native);
        assert_eq!(report.dashboard, DashboardStatus::Verified);
        assert!(!report.retried);
        assert_eq!(driver.navigations, vec![site.root_url.clone(), site.dashboard_url.clone()]);
        assert_eq!(driver.cookie_clears, 1);
        assert_eq!(driver.cookies.len(), 1);
        assert_eq!(driver.cookies[0].name, "WorkosCursorSessionToken");
        assert_eq!(driver.cookies[0].value, format!("user_42::{}", TOKEN));
        assert_eq!(driver.cookies[0].domain, ".cursor.com");
    }

    #[tokio::test]
    async fn test_script_fallback() {
        let site = SiteConfig::default();
        let mut driver = FakeDriver {
            reject_native_cookies: true,
            script_cookies_work: true,
            ..Default::default()
        };

        let report = injector(&site).inject(&mut driver, &account()).await.unwrap();
        assert_eq!(report.cookie_method, CookieMethod::Script);
        assert_eq!(driver.scripts.len(), 1);
        assert!(driver.scripts[0].contains("%3A%3A"));
        assert_eq!(driver.cookies[0].value, format!("user_42%3A%3A{}", TOKEN));
    }

    #[tokio::test]
    async fn test_cookie_rejected_everywhere() {
        let site = SiteConfig::default();
        let mut driver = FakeDriver {
            reject_native_cookies: true,
            ..Default::default()
        };

        let err = injector(&site).inject(&mut driver, &account()).await.unwrap_err();
        assert!(matches!(err, Error::CookieRejected(_)));
        // no dashboard visit after a failed install
        assert_eq!(driver.navigations, vec![site.root_url.clone()]);
    }

    #[tokio::test]
    async fn test_challenge_retried_once() {
        let site = SiteConfig::default();
        let mut driver = FakeDriver::default();
        driver.redirects.insert(
            site.dashboard_url.clone(),
            VecDeque::from(vec![CHALLENGE.to_string()]),
        );

        let report = injector(&site).inject(&mut driver, &account()).await.unwrap();
        assert!(report.retried);
        assert_eq!(report.dashboard, DashboardStatus::Verified);
        assert_eq!(
            driver.navigations,
            vec![
                site.root_url.clone(),
                site.dashboard_url.clone(),
                site.root_url.clone(),
                site.dashboard_url.clone(),
            ]
        );
    }

    #[tokio::test]
    async fn test_persistent_challenge_still_succeeds() {
        let site = SiteConfig::default();
        let mut driver = FakeDriver::default();
        driver.redirects.insert(
            site.dashboard_url.clone(),
            VecDeque::from(vec![CHALLENGE.to_string(); 3]),
        );

        let report = injector(&site).inject(&mut driver, &account()).await.unwrap();
        assert_eq!(report.dashboard, DashboardStatus::AuthChallenge);
        assert_eq!(driver.navigations.len(), 4);
    }
}
