//! CDP-driven browser automation for the login flow.
//!
//! - `session` launches the browser and connects to its page target
//! - `driver` exposes the page operations behind `BrowserDriver`
//! - `inject` installs the session cookie and checks the dashboard
//! - `harvest` creates an API key and reads it off the page

pub mod cdp;
pub mod driver;
pub mod extract;
pub mod harvest;
pub mod inject;
pub mod session;

pub use cdp::CookieParam;
pub use driver::{BrowserDriver, CdpDriver, Cookie, ElementRef};
pub use extract::KeyPattern;
pub use harvest::{ApiKeyHarvester, HarvestedKey, SubmitMethod};
pub use inject::{
    manual_login_script, CookieMethod, DashboardStatus, InjectReport, SessionInjector,
};
pub use session::{BrowserSession, DisplayMode, LaunchOptions};
