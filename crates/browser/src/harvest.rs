//! Creates a user API key on the integrations page and reads it back.

use autologin_core::{Error, HarvestConfig, Result, SiteConfig, Timings};
use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::driver::{
    button_containing, button_text_containing, input_with_placeholder, BrowserDriver, ElementRef,
    TEXT_ELEMENTS_XPATH,
};
use crate::extract::KeyPattern;
use crate::inject::settle;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitMethod {
    /// Clicked the button carrying this label.
    Button(String),
    EnterKey,
}

#[derive(Debug, Clone)]
pub struct HarvestedKey {
    pub key: String,
    /// Name the key was created under.
    pub name: String,
    pub submit: SubmitMethod,
}

#[derive(Debug, Clone, Copy)]
enum Readiness {
    Present,
    Clickable,
}

pub fn key_name(prefix: &str, now: DateTime<Local>) -> String {
    format!("{}{}", prefix, now.format("%Y%m%d_%H%M%S"))
}

pub struct ApiKeyHarvester<'a> {
    site: &'a SiteConfig,
    config: &'a HarvestConfig,
    timings: Timings,
    pattern: KeyPattern,
}

impl<'a> ApiKeyHarvester<'a> {
    pub fn new(site: &'a SiteConfig, config: &'a HarvestConfig, timings: Timings) -> Result<Self> {
        Ok(Self {
            site,
            config,
            timings,
            pattern: KeyPattern::from_config(config)?,
        })
    }

    /// Walk the create-key dialog and return the new key.
    ///
    /// Every failure is an error for the caller to report; none of them
    /// invalidate the logged-in session.
    pub async fn harvest<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
    ) -> Result<HarvestedKey> {
        let result = self.create_key(driver).await;
        if let Err(e) = driver.release_elements().await {
            debug!("Element release failed: {}", e);
        }
        result
    }

    async fn create_key<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
    ) -> Result<HarvestedKey> {
        driver.navigate(&self.site.integrations_url).await?;
        settle(self.timings.page_settle).await;

        let create_xpaths: Vec<String> = self
            .config
            .create_labels
            .iter()
            .map(|l| button_containing(l))
            .collect();
        let (index, create) = wait_for_first(
            driver,
            &create_xpaths,
            Readiness::Clickable,
            self.timings.element_timeout,
            "create API key button",
        )
        .await?;
        debug!(label = %self.config.create_labels[index], "Found create button");
        driver.click(&create).await?;

        let name_xpath = input_with_placeholder(&self.config.name_placeholder);
        let (_, input) = wait_for_first(
            driver,
            std::slice::from_ref(&name_xpath),
            Readiness::Present,
            self.timings.element_timeout,
            "API key name input",
        )
        .await?;

        let name = key_name(&self.config.key_name_prefix, Local::now());
        driver.send_keys(&input, &name).await?;

        let submit = self.submit(driver, &input).await?;
        settle(self.timings.submit_settle).await;
        info!(name = %name, ?submit, "API key form submitted");

        settle(self.timings.key_settle).await;
        match self.extract_key(driver).await {
            Some(key) => Ok(HarvestedKey { key, name, submit }),
            None => Err(Error::ElementNotFound("API key value on page".into())),
        }
    }

    async fn submit<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
        input: &ElementRef,
    ) -> Result<SubmitMethod> {
        for label in &self.config.submit_labels {
            let candidates = driver
                .find_elements(&button_text_containing(label))
                .await
                .unwrap_or_default();
            let Some(button) = candidates.into_iter().next() else {
                continue;
            };
            if !driver.is_displayed(&button).await.unwrap_or(false) {
                continue;
            }
            match driver.click(&button).await {
                Ok(()) => return Ok(SubmitMethod::Button(label.clone())),
                Err(e) => {
                    warn!(label = %label, error = %e, "Submit click failed, pressing Enter");
                    break;
                }
            }
        }

        driver.press_enter(input).await?;
        Ok(SubmitMethod::EnterKey)
    }

    /// Markup scan first, then the text of every element with text.
    async fn extract_key<D: BrowserDriver + ?Sized>(
        &self,
        driver: &mut D,
    ) -> Option<String> {
        match driver.page_source().await {
            Ok(source) => {
                if let Some(key) = self.pattern.find(&source) {
                    return Some(key);
                }
            }
            Err(e) => debug!("Page source unavailable: {}", e),
        }

        let elements = match driver.find_elements(TEXT_ELEMENTS_XPATH).await {
            Ok(els) => els,
            Err(e) => {
                debug!("Text element scan failed: {}", e);
                return None;
            }
        };
        for element in &elements {
            let Ok(text) = driver.text(element).await else {
                continue;
            };
            if !text.contains(&self.config.key_prefix) {
                continue;
            }
            if let Some(key) = self.pattern.find_in_element_text(&text) {
                return Some(key);
            }
        }
        None
    }
}

/// Poll `xpaths` in order until one yields a ready element.
///
/// Returns the index of the matching expression with the element.
/// Handles from an unsuccessful pass are released before the next one.
async fn wait_for_first<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    xpaths: &[String],
    readiness: Readiness,
    timeout: Duration,
    what: &str,
) -> Result<(usize, ElementRef)> {
    let deadline = Instant::now() + timeout;
    loop {
        for (index, xpath) in xpaths.iter().enumerate() {
            let found = match driver.find_elements(xpath).await {
                Ok(found) => found,
                Err(e) => {
                    debug!(xpath = %xpath, "Lookup failed: {}", e);
                    continue;
                }
            };
            for element in found {
                if is_ready(driver, &element, readiness).await {
                    return Ok((index, element));
                }
            }
        }

        if let Err(e) = driver.release_elements().await {
            debug!("Element release failed: {}", e);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout(format!(
                "{} not found within {}ms",
                what,
                timeout.as_millis()
            )));
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

async fn is_ready<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    element: &ElementRef,
    readiness: Readiness,
) -> bool {
    match readiness {
        Readiness::Present => true,
        Readiness::Clickable => {
            driver.is_displayed(element).await.unwrap_or(false)
                && driver.is_enabled(element).await.unwrap_or(false)
        }
    }
}
