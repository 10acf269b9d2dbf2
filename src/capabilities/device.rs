use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    #[error("not supported on this device")]
    Unsupported,
    #[error("blocked: {0}")]
    Blocked(String),
}

/// Local, fire-and-forget device outputs. Callers log and discard failures.
pub trait DeviceEffects: Send + Sync {
    fn vibrate(&self, pattern_ms: &[u32]) -> Result<(), EffectError>;

    fn play_audio(&self, src: &str) -> Result<(), EffectError>;

    /// Hands a URL (e.g. an `sms:` deep link) to the platform.
    fn open_url(&self, url: &str) -> Result<(), EffectError>;
}

/// The single human-readable status surface of the UI.
pub trait StatusSink: Send + Sync {
    fn set_status(&self, text: &str);

    /// A blocking notice (browser `alert()`); defaults to a status update.
    fn alert(&self, text: &str) {
        self.set_status(text);
    }
}

/// An `sms:` compose deep link with a prefilled body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsLink {
    number: String,
    body: String,
}

impl SmsLink {
    pub fn new(number: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            body: body.into(),
        }
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// `sms:<number>?body=<percent-encoded body>`; spaces become `%20`, not `+`.
    pub fn to_uri(&self) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(self.body.as_bytes())
            .collect::<String>()
            .replace('+', "%20");
        format!("sms:{}?body={}", self.number, encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sms_link_encodes_body() {
        let link = SmsLink::new("100", "EMERGENCY! I need help. Unable to send internet SOS.");
        assert_eq!(
            link.to_uri(),
            "sms:100?body=EMERGENCY%21%20I%20need%20help.%20Unable%20to%20send%20internet%20SOS."
        );
    }

    #[test]
    fn sms_link_keeps_literal_plus_encoded() {
        let link = SmsLink::new("100", "a+b c");
        assert_eq!(link.to_uri(), "sms:100?body=a%2Bb%20c");
    }
}
