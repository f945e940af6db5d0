use autologin_core::{Error, HarvestConfig, Result};
use regex::Regex;

/// Recognizes API key values in page markup or element text.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    regex: Regex,
    min_text_len: usize,
}

impl KeyPattern {
    /// Keys are `prefix` followed by at least `min_body` ASCII alphanumerics.
    pub fn new(prefix: &str, min_body: usize, min_text_len: usize) -> Result<Self> {
        let pattern = format!("{}[a-zA-Z0-9]{{{},}}", regex::escape(prefix), min_body);
        let regex = Regex::new(&pattern)
            .map_err(|e| Error::Config(format!("Invalid key pattern {}: {}", pattern, e)))?;
        Ok(Self {
            regex,
            min_text_len,
        })
    }

    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        Self::new(
            &config.key_prefix,
            config.key_min_body,
            config.text_scan_min_len,
        )
    }

    /// First key in `text`, if any.
    pub fn find(&self, text: &str) -> Option<String> {
        self.regex.find(text).map(|m| m.as_str().to_string())
    }

    /// Element text worth scanning: longer than the minimum once trimmed.
    pub fn find_in_element_text(&self, text: &str) -> Option<String> {
        let text = text.trim();
        if text.chars().count() <= self.min_text_len {
            return None;
        }
        self.find(text)
    }
}
