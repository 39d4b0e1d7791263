use std::time::Duration;

/// Default ceiling for one unit of work.
pub const DEFAULT_UNIT_OF_WORK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default currency for newly opened accounts.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Engine settings, injected at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub unit_of_work_timeout: Duration,
    pub currency: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unit_of_work_timeout: DEFAULT_UNIT_OF_WORK_TIMEOUT,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_unit_of_work_timeout(mut self, timeout: Duration) -> Self {
        self.unit_of_work_timeout = timeout;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.unit_of_work_timeout, Duration::from_secs(30));
        assert_eq!(config.currency, "USD");
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_unit_of_work_timeout(Duration::from_millis(250))
            .with_currency("EUR");
        assert_eq!(config.unit_of_work_timeout, Duration::from_millis(250));
        assert_eq!(config.currency, "EUR");
    }
}
