//! The browser operations the login flow consumes, and their CDP backend.

use async_trait::async_trait;
use autologin_core::{Error, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::cdp::CookieParam;
use crate::session::BrowserSession;

/// Opaque handle to a DOM element found by [`BrowserDriver::find_elements`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

/// A cookie as reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// Navigation, cookies, element lookup and scripting on one page.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Navigate and wait for the load event.
    async fn navigate(&mut self, url: &str) -> Result<()>;
    async fn current_url(&mut self) -> Result<String>;
    async fn delete_all_cookies(&mut self) -> Result<()>;
    /// Install a cookie natively. Fails if the browser rejects it.
    async fn add_cookie(&mut self, cookie: &CookieParam) -> Result<()>;
    async fn get_cookies(&mut self) -> Result<Vec<Cookie>>;
    async fn execute_script(&mut self, script: &str) -> Result<Value>;
    /// Serialized markup of the whole document.
    async fn page_source(&mut self) -> Result<String>;
    /// Elements matching an XPath expression, in document order.
    async fn find_elements(&mut self, xpath: &str) -> Result<Vec<ElementRef>>;
    async fn is_displayed(&mut self, element: &ElementRef) -> Result<bool>;
    async fn is_enabled(&mut self, element: &ElementRef) -> Result<bool>;
    async fn click(&mut self, element: &ElementRef) -> Result<()>;
    /// Focus the element and type `text` into it.
    async fn send_keys(&mut self, element: &ElementRef, text: &str) -> Result<()>;
    async fn press_enter(&mut self, element: &ElementRef) -> Result<()>;
    /// Rendered text of the element.
    async fn text(&mut self, element: &ElementRef) -> Result<String>;
    /// Invalidate every handle returned by `find_elements` so far.
    async fn release_elements(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Quote a string as an XPath 1.0 literal.
pub fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{}'", s)
    } else if !s.contains('"') {
        format!("\"{}\"", s)
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// Buttons whose full text content contains `label`.
pub fn button_containing(label: &str) -> String {
    format!("//button[contains(., {})]", xpath_literal(label))
}

/// Buttons with a direct text node containing `label`.
pub fn button_text_containing(label: &str) -> String {
    format!("//button[contains(text(), {})]", xpath_literal(label))
}

pub fn input_with_placeholder(placeholder: &str) -> String {
    format!("//input[@placeholder={}]", xpath_literal(placeholder))
}

/// Every element with at least one text node child.
pub const TEXT_ELEMENTS_XPATH: &str = "//*[text()]";

/// Object group holding the handles returned by `find_elements`.
const ELEMENT_GROUP: &str = "autologin-elements";

const FIND_ELEMENTS_JS: &str = "(() => { \
    const snap = document.evaluate(__XPATH__, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
    const out = []; \
    for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i)); \
    return out; })()";

const IS_DISPLAYED_JS: &str = "function() { \
    if (!this.isConnected) return false; \
    const style = window.getComputedStyle(this); \
    if (style.visibility === 'hidden' || style.display === 'none') return false; \
    const rect = this.getBoundingClientRect(); \
    return rect.width > 0 && rect.height > 0; }";

/// [`BrowserDriver`] over a CDP page connection.
pub struct CdpDriver {
    session: BrowserSession,
    load_timeout: Duration,
}

impl CdpDriver {
    pub fn new(session: BrowserSession, load_timeout: Duration) -> Self {
        Self {
            session,
            load_timeout,
        }
    }

    pub fn into_session(self) -> BrowserSession {
        self.session
    }

    async fn call_on(&self, element: &ElementRef, function: &str) -> Result<Value> {
        self.session
            .cdp
            .call_function_on(&element.0, function)
            .await
            .map_err(cdp_err)
    }

    async fn focus(&self, element: &ElementRef) -> Result<()> {
        self.call_on(element, "function() { this.focus(); }").await?;
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let cdp = &self.session.cdp;
        let mut loaded = cdp.subscribe_event("Page.loadEventFired").await;
        cdp.navigate(url).await.map_err(cdp_err)?;
        if tokio::time::timeout(self.load_timeout, loaded.recv()).await.is_err() {
            debug!(url, "Load event not seen before timeout, continuing");
        }
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String> {
        let value = self
            .session
            .cdp
            .evaluate_js("window.location.href")
            .await
            .map_err(cdp_err)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn delete_all_cookies(&mut self) -> Result<()> {
        self.session.cdp.clear_cookies().await.map_err(cdp_err)
    }

    async fn add_cookie(&mut self, cookie: &CookieParam) -> Result<()> {
        let accepted = self
            .session
            .cdp
            .set_cookie(cookie)
            .await
            .map_err(Error::CookieRejected)?;
        if accepted {
            Ok(())
        } else {
            Err(Error::CookieRejected(format!(
                "browser refused cookie {}",
                cookie.name
            )))
        }
    }

    async fn get_cookies(&mut self) -> Result<Vec<Cookie>> {
        let raw = self.session.cdp.get_cookies().await.map_err(cdp_err)?;
        Ok(raw.iter().filter_map(parse_cookie).collect())
    }

    async fn execute_script(&mut self, script: &str) -> Result<Value> {
        self.session.cdp.evaluate_js(script).await.map_err(cdp_err)
    }

    async fn page_source(&mut self) -> Result<String> {
        let value = self
            .session
            .cdp
            .evaluate_js("document.documentElement ? document.documentElement.outerHTML : ''")
            .await
            .map_err(cdp_err)?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn find_elements(&mut self, xpath: &str) -> Result<Vec<ElementRef>> {
        let literal = serde_json::to_string(xpath)?;
        let js = FIND_ELEMENTS_JS.replace("__XPATH__", &literal);
        let cdp = &self.session.cdp;

        let Some(array_id) = cdp
            .evaluate_handle(&js, ELEMENT_GROUP)
            .await
            .map_err(cdp_err)?
        else {
            return Ok(Vec::new());
        };
        let props = cdp.get_properties(&array_id).await.map_err(cdp_err);
        let _ = cdp.release_object(&array_id).await;

        let mut indexed: Vec<(usize, String)> = props?
            .into_iter()
            .filter_map(|(name, id)| name.parse::<usize>().ok().map(|i| (i, id)))
            .collect();
        indexed.sort_by_key(|(i, _)| *i);
        Ok(indexed.into_iter().map(|(_, id)| ElementRef(id)).collect())
    }

    async fn is_displayed(&mut self, element: &ElementRef) -> Result<bool> {
        Ok(self
            .call_on(element, IS_DISPLAYED_JS)
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    async fn is_enabled(&mut self, element: &ElementRef) -> Result<bool> {
        Ok(self
            .call_on(element, "function() { return !this.disabled; }")
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    async fn click(&mut self, element: &ElementRef) -> Result<()> {
        self.call_on(element, "function() { this.scrollIntoView({block: 'center'}); }")
            .await?;

        let center = match self.session.cdp.get_box_model(&element.0).await {
            Ok(bm) => extract_center_from_box_model(&bm),
            Err(e) => {
                debug!("Box model unavailable, using DOM click: {}", e);
                None
            }
        };

        let Some((x, y)) = center else {
            self.call_on(element, "function() { this.click(); }").await?;
            return Ok(());
        };

        let cdp = &self.session.cdp;
        cdp.dispatch_mouse_event("mouseMoved", x, y, "none", 0)
            .await
            .map_err(cdp_err)?;
        cdp.dispatch_mouse_event("mousePressed", x, y, "left", 1)
            .await
            .map_err(cdp_err)?;
        cdp.dispatch_mouse_event("mouseReleased", x, y, "left", 1)
            .await
            .map_err(cdp_err)?;
        Ok(())
    }

    async fn send_keys(&mut self, element: &ElementRef, text: &str) -> Result<()> {
        self.focus(element).await?;
        self.session.cdp.insert_text(text).await.map_err(cdp_err)?;
        // Frameworks listen for input events, not value changes
        self.call_on(
            element,
            "function() { this.dispatchEvent(new Event('input', {bubbles: true})); }",
        )
        .await?;
        Ok(())
    }

    async fn press_enter(&mut self, element: &ElementRef) -> Result<()> {
        self.focus(element).await?;
        let cdp = &self.session.cdp;
        cdp.dispatch_key_event("keyDown", "Enter", "Enter", 13, Some("\r"))
            .await
            .map_err(cdp_err)?;
        cdp.dispatch_key_event("keyUp", "Enter", "Enter", 13, None)
            .await
            .map_err(cdp_err)?;
        Ok(())
    }

    async fn text(&mut self, element: &ElementRef) -> Result<String> {
        let value = self
            .call_on(element, "function() { return String(this.innerText || ''); }")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn release_elements(&mut self) -> Result<()> {
        self.session
            .cdp
            .release_object_group(ELEMENT_GROUP)
            .await
            .map_err(cdp_err)
    }
}

fn parse_cookie(raw: &Value) -> Option<Cookie> {
    Some(Cookie {
        name: raw.get("name")?.as_str()?.to_string(),
        value: raw.get("value")?.as_str()?.to_string(),
        domain: raw
            .get("domain")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}

/// Center of the content quad of a `DOM.getBoxModel` response.
fn extract_center_from_box_model(bm: &Value) -> Option<(f64, f64)> {
    let content = bm.get("model")?.get("content")?.as_array()?;
    if content.len() < 8 {
        return None;
    }
    let x1 = content[0].as_f64()?;
    let y1 = content[1].as_f64()?;
    let x2 = content[4].as_f64()?;
    let y2 = content[5].as_f64()?;
    Some(((x1 + x2) / 2.0, (y1 + y2) / 2.0))
}

fn cdp_err(e: String) -> Error {
    Error::Cdp(e)
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory page used by the injector and harvester tests.

    use super::*;
    use std::collections::{HashMap, VecDeque};

    #[derive(Debug, Clone, Default)]
    pub struct FakeElement {
        pub id: String,
        /// XPath expressions this element answers to.
        pub xpaths: Vec<String>,
        pub displayed: bool,
        pub enabled: bool,
        pub text: String,
        pub click_fails: bool,
    }

    impl FakeElement {
        pub fn new(id: &str, xpath: &str) -> Self {
            Self {
                id: id.to_string(),
                xpaths: vec![xpath.to_string()],
                displayed: true,
                enabled: true,
                ..Default::default()
            }
        }

        pub fn with_text(mut self, text: &str) -> Self {
            self.text = text.to_string();
            self
        }

        pub fn hidden(mut self) -> Self {
            self.displayed = false;
            self
        }
    }

    #[derive(Default)]
    pub struct FakeDriver {
        pub url: String,
        pub navigations: Vec<String>,
        /// Per requested URL, the URLs the page ends up on, one per visit.
        pub redirects: HashMap<String, VecDeque<String>>,
        pub cookies: Vec<Cookie>,
        pub reject_native_cookies: bool,
        /// Whether `document.cookie` assignments take effect.
        pub script_cookies_work: bool,
        pub scripts: Vec<String>,
        pub source: String,
        pub elements: Vec<FakeElement>,
        pub clicks: Vec<String>,
        pub typed: Vec<(String, String)>,
        pub enters: Vec<String>,
        pub cookie_clears: usize,
        pub releases: usize,
    }

    impl FakeDriver {
        fn element(&self, element: &ElementRef) -> Result<&FakeElement> {
            self.elements
                .iter()
                .find(|e| e.id == element.0)
                .ok_or_else(|| Error::ElementNotFound(element.0.clone()))
        }
    }

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        async fn navigate(&mut self, url: &str) -> Result<()> {
            self.navigations.push(url.to_string());
            self.url = self
                .redirects
                .get_mut(url)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| url.to_string());
            Ok(())
        }

        async fn current_url(&mut self) -> Result<String> {
            Ok(self.url.clone())
        }

        async fn delete_all_cookies(&mut self) -> Result<()> {
            self.cookie_clears += 1;
            self.cookies.clear();
            Ok(())
        }

        async fn add_cookie(&mut self, cookie: &CookieParam) -> Result<()> {
            if self.reject_native_cookies {
                return Err(Error::CookieRejected("invalid cookie domain".into()));
            }
            self.cookies.push(Cookie {
                name: cookie.name.clone(),
                value: cookie.value.clone(),
                domain: cookie.domain.clone(),
            });
            Ok(())
        }

        async fn get_cookies(&mut self) -> Result<Vec<Cookie>> {
            Ok(self.cookies.clone())
        }

        async fn execute_script(&mut self, script: &str) -> Result<Value> {
            self.scripts.push(script.to_string());
            if self.script_cookies_work {
                if let Some(rest) = script.split("document.cookie = \"").nth(1) {
                    let pair = rest.split(';').next().unwrap_or_default();
                    if let Some((name, value)) = pair.split_once('=') {
                        self.cookies.push(Cookie {
                            name: name.to_string(),
                            value: value.to_string(),
                            domain: String::new(),
                        });
                    }
                }
            }
            Ok(Value::Null)
        }

        async fn page_source(&mut self) -> Result<String> {
            Ok(self.source.clone())
        }

        async fn find_elements(&mut self, xpath: &str) -> Result<Vec<ElementRef>> {
            Ok(self
                .elements
                .iter()
                .filter(|e| e.xpaths.iter().any(|x| x == xpath))
                .map(|e| ElementRef(e.id.clone()))
                .collect())
        }

        async fn is_displayed(&mut self, element: &ElementRef) -> Result<bool> {
            Ok(self.element(element)?.displayed)
        }

        async fn is_enabled(&mut self, element: &ElementRef) -> Result<bool> {
            Ok(self.element(element)?.enabled)
        }

        async fn click(&mut self, element: &ElementRef) -> Result<()> {
            if self.element(element)?.click_fails {
                return Err(Error::Cdp("element is not clickable".into()));
            }
            self.clicks.push(element.0.clone());
            Ok(())
        }

        async fn send_keys(&mut self, element: &ElementRef, text: &str) -> Result<()> {
            self.element(element)?;
            self.typed.push((element.0.clone(), text.to_string()));
            Ok(())
        }

        async fn press_enter(&mut self, element: &ElementRef) -> Result<()> {
            self.element(element)?;
            self.enters.push(element.0.clone());
            Ok(())
        }

        async fn text(&mut self, element: &ElementRef) -> Result<String> {
            Ok(self.element(element)?.text.clone())
        }

        async fn release_elements(&mut self) -> Result<()> {
            self.releases += 1;
            Ok(())
        }
    }
}
