//! Product analytics events. Purely observational: nothing here feeds back
//! into sync decisions.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnalyticsEvent {
    HealthKitEnabled,
    HealthKitDataUploadSucceeded { count: usize },
    HealthKitDataUploadFailed { error: String, count: usize },
}

impl AnalyticsEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AnalyticsEvent::HealthKitEnabled => "HealthKitEnabled",
            AnalyticsEvent::HealthKitDataUploadSucceeded { .. } => "HealthKitDataUploadSucceeded",
            AnalyticsEvent::HealthKitDataUploadFailed { .. } => "HealthKitDataUploadFailed",
        }
    }
}

pub fn track(event: &AnalyticsEvent) {
    metrics::counter!("pivot_analytics_events_total", "event" => event.name()).increment(1);
    match event {
        AnalyticsEvent::HealthKitEnabled => {
            tracing::info!(event = event.name(), "analytics");
        }
        AnalyticsEvent::HealthKitDataUploadSucceeded { count } => {
            metrics::counter!("pivot_uploaded_records_total").increment(*count as u64);
            tracing::info!(event = event.name(), data_count = count, "analytics");
        }
        AnalyticsEvent::HealthKitDataUploadFailed { error, count } => {
            tracing::info!(event = event.name(), data_count = count, %error, "analytics");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_dashboard() {
        assert_eq!(AnalyticsEvent::HealthKitEnabled.name(), "HealthKitEnabled");
        assert_eq!(
            AnalyticsEvent::HealthKitDataUploadFailed {
                error: "x".into(),
                count: 1
            }
            .name(),
            "HealthKitDataUploadFailed"
        );
    }

    #[test]
    fn track_without_recorder_is_noop() {
        track(&AnalyticsEvent::HealthKitDataUploadSucceeded { count: 3 });
    }
}
