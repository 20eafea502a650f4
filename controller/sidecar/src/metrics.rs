use crate::publish::Outcome;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct SidecarMetrics {
    jobs: Counter,
    publishes: Family<PublishLabels, Counter>,
    debounce_fires: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PublishLabels {
    result: &'static str,
}

// === impl SidecarMetrics ===

impl SidecarMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let jobs = Counter::default();
        prom.register(
            "jobs",
            "Count of sidecar configuration jobs run",
            jobs.clone(),
        );

        let publishes = Family::default();
        prom.register(
            "publishes",
            "Count of sidecar configuration publishes, by result",
            publishes.clone(),
        );

        let debounce_fires = Counter::default();
        prom.register(
            "debounce_fires",
            "Count of debounce timer expirations",
            debounce_fires.clone(),
        );

        Self {
            jobs,
            publishes,
            debounce_fires,
        }
    }

    pub(crate) fn job(&self) {
        self.jobs.inc();
    }

    pub(crate) fn publish(&self, outcome: Outcome) {
        self.publishes
            .get_or_create(&PublishLabels {
                result: outcome.as_str(),
            })
            .inc();
    }

    pub(crate) fn debounce_fired(&self) {
        self.debounce_fires.inc();
    }

    #[cfg(test)]
    pub(crate) fn jobs_run(&self) -> u64 {
        self.jobs.get()
    }

    #[cfg(test)]
    pub(crate) fn publishes(&self, outcome: Outcome) -> u64 {
        self.publishes
            .get_or_create(&PublishLabels {
                result: outcome.as_str(),
            })
            .get()
    }
}
