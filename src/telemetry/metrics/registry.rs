//! Instrument creation for one meter.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use opentelemetry::metrics::Meter as SdkMeter;

use crate::telemetry::error::TelemetryError;
use crate::telemetry::metrics::instruments::{Counter, GaugeBuilder, Histogram, InstrumentBuilder, Number};

const MAX_NAME_LEN: usize = 255;

/// Creates instruments on the SDK meter.
///
/// Names are unique per meter, case-insensitively, across all instrument
/// kinds. The SDK only warns about duplicates; here the second creation
/// fails.
#[derive(Clone)]
pub struct Meter {
    inner: SdkMeter,
    names: Arc<DashSet<String>>,
    callback_timeout: Duration,
}

impl Meter {
    pub(crate) fn new(inner: SdkMeter, callback_timeout: Duration) -> Self {
        Self {
            inner,
            names: Arc::new(DashSet::new()),
            callback_timeout,
        }
    }

    pub fn counter<T: Number>(&self, name: impl Into<String>) -> InstrumentBuilder<'_, Counter<T>> {
        InstrumentBuilder::new(self, name.into())
    }

    pub fn histogram<T: Number>(&self, name: impl Into<String>) -> InstrumentBuilder<'_, Histogram<T>> {
        InstrumentBuilder::new(self, name.into())
    }

    pub fn observable_gauge<T: Number>(&self, name: impl Into<String>) -> GaugeBuilder<'_, T> {
        GaugeBuilder::new(self, name.into())
    }

    /// Number of registered instruments.
    pub fn instrument_count(&self) -> usize {
        self.names.len()
    }

    pub(crate) fn sdk(&self) -> &SdkMeter {
        &self.inner
    }

    pub(crate) fn callback_timeout(&self) -> Duration {
        self.callback_timeout
    }

    /// Claims `name` for a new instrument.
    pub(crate) fn reserve(&self, name: &str, kind: &'static str) -> Result<(), TelemetryError> {
        validate_name(name)?;
        if !self.names.insert(name.to_ascii_lowercase()) {
            tracing::error!(instrument = %name, kind, "Duplicate instrument registration");
            return Err(TelemetryError::DuplicateInstrument(name.to_string()));
        }
        tracing::debug!(instrument = %name, kind, "Instrument registered");
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), TelemetryError> {
    let invalid = |reason| TelemetryError::InvalidInstrumentName {
        name: name.to_string(),
        reason,
    };
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("name is empty")),
        Some(c) if !c.is_ascii_alphabetic() => return Err(invalid("name must start with a letter")),
        Some(_) => {}
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 255 characters"));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/')) {
        return Err(invalid("name contains characters outside [A-Za-z0-9_.-/]"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::SdkMeterProvider;

    fn meter() -> Meter {
        let provider = SdkMeterProvider::builder().build();
        Meter::new(provider.meter("test"), Duration::from_millis(100))
    }

    #[test]
    fn test_duplicate_name_rejected_at_creation() {
        let meter = meter();
        assert!(meter.counter::<u64>("http_errors").build().is_ok());
        assert!(matches!(
            meter.counter::<u64>("HTTP_Errors").build(),
            Err(TelemetryError::DuplicateInstrument(_))
        ));
        assert_eq!(meter.instrument_count(), 1);
    }

    #[test]
    fn test_duplicate_across_kinds() {
        let meter = meter();
        meter.histogram::<f64>("latency").build().unwrap();
        assert!(matches!(
            meter.counter::<u64>("latency").build(),
            Err(TelemetryError::DuplicateInstrument(_))
        ));
        assert!(matches!(
            meter.observable_gauge::<f64>("latency").with_callback(|_| Ok(())).build(),
            Err(TelemetryError::DuplicateInstrument(_))
        ));
    }

    #[test]
    fn test_name_rules() {
        let meter = meter();
        for bad in ["", "1st", "has space", "emoji_\u{1F600}"] {
            assert!(matches!(
                meter.counter::<u64>(bad).build(),
                Err(TelemetryError::InvalidInstrumentName { .. })
            ));
        }
        assert!(meter.counter::<u64>("x".repeat(256)).build().is_err());
        assert!(meter.counter::<u64>("http.server/requests-total_v2").build().is_ok());
    }

    #[test]
    fn test_gauge_requires_callback() {
        let meter = meter();
        assert!(matches!(
            meter.observable_gauge::<f64>("items_count").build(),
            Err(TelemetryError::MissingCallback(_))
        ));
        // A failed build does not claim the name.
        assert!(meter
            .observable_gauge::<f64>("items_count")
            .with_callback(|_| Ok(()))
            .build()
            .is_ok());
    }

    #[test]
    fn test_invalid_boundaries_rejected() {
        let meter = meter();
        assert!(matches!(
            meter.histogram::<f64>("latency").with_boundaries(vec![5.0, 1.0]).build(),
            Err(TelemetryError::InvalidBoundaries(_))
        ));
        assert!(matches!(
            meter.histogram::<f64>("latency").with_boundaries(vec![1.0, f64::NAN]).build(),
            Err(TelemetryError::InvalidBoundaries(_))
        ));
        assert!(meter.histogram::<f64>("latency").with_boundaries(vec![1.0, 5.0]).build().is_ok());
    }
}
