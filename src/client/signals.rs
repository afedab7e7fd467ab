use crate::resilience::pipeline::PipelineSignals;

/// A snapshot of runtime "signals" across every cached pipeline.
///
/// Facts only: callers can build their own routing or back-off decisions on
/// top of these values.
#[derive(Debug, Clone, Default)]
pub struct SignalsSnapshot {
    pub global: Option<PipelineSignals>,
    pub endpoints: Vec<PipelineSignals>,
}

impl SignalsSnapshot {
    pub(crate) fn from_pipelines(pipelines: Vec<PipelineSignals>) -> Self {
        let mut snapshot = Self::default();
        for p in pipelines {
            if p.scope == crate::resilience::pipeline::GLOBAL_SCOPE {
                snapshot.global = Some(p);
            } else {
                snapshot.endpoints.push(p);
            }
        }
        snapshot
    }

    pub fn endpoint(&self, name: &str) -> Option<&PipelineSignals> {
        self.endpoints.iter().find(|p| p.scope == name)
    }
}
