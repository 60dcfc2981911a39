use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::WorkerBackend;
use crate::error::{MissionError, Result};
use crate::specialists::{
    CodingSpecialist, DeploymentSpecialist, MaintenanceSpecialist, PlanningSpecialist,
    TestingSpecialist,
};
use crate::types::Phase;
use crate::worker::Specialist;

/// Explicit phase → specialist table. Entries can be overridden, which is how
/// tests and embedders inject their own workers.
#[derive(Default)]
pub struct SpecialistRegistry {
    entries: HashMap<Phase, Arc<dyn Specialist>>,
}

impl SpecialistRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in specialists, all backed by `backend`. MAINTENANCE and
    /// PRODUCTION share one maintenance specialist.
    pub fn with_defaults(backend: Arc<dyn WorkerBackend>) -> Self {
        let mut reg = Self::new();
        reg.register(Phase::Planning, Arc::new(PlanningSpecialist::new(backend.clone())));
        reg.register(Phase::Coding, Arc::new(CodingSpecialist::new(backend.clone())));
        reg.register(Phase::Testing, Arc::new(TestingSpecialist::new(backend.clone())));
        reg.register(Phase::Deployment, Arc::new(DeploymentSpecialist::new(backend.clone())));
        let maintenance: Arc<dyn Specialist> = Arc::new(MaintenanceSpecialist::new(backend));
        reg.register(Phase::Maintenance, maintenance.clone());
        reg.register(Phase::Production, maintenance);
        reg
    }

    /// Bind `specialist` to `phase`, returning whatever was bound before.
    pub fn register(
        &mut self,
        phase: Phase,
        specialist: Arc<dyn Specialist>,
    ) -> Option<Arc<dyn Specialist>> {
        self.entries.insert(phase, specialist)
    }

    pub fn get(&self, phase: Phase) -> Result<Arc<dyn Specialist>> {
        self.entries
            .get(&phase)
            .cloned()
            .ok_or_else(|| MissionError::UnregisteredPhase {
                phase,
                known: self
                    .phases()
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    /// Registered phases in canonical order.
    pub fn phases(&self) -> Vec<Phase> {
        let mut phases: Vec<Phase> = self.entries.keys().copied().collect();
        phases.sort();
        phases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    #[test]
    fn defaults_cover_every_phase() {
        let reg = SpecialistRegistry::with_defaults(Arc::new(MockBackend));
        assert_eq!(reg.phases(), Phase::all().to_vec());
        assert_eq!(reg.get(Phase::Production).unwrap().name(), "maintenance");
    }

    #[test]
    fn register_returns_replaced_entry() {
        let mut reg = SpecialistRegistry::with_defaults(Arc::new(MockBackend));
        let old = reg.register(
            Phase::Coding,
            Arc::new(PlanningSpecialist::new(Arc::new(MockBackend))),
        );
        assert_eq!(old.unwrap().name(), "coding");
        assert_eq!(reg.get(Phase::Coding).unwrap().name(), "planning");
    }

    #[test]
    fn unregistered_phase_lists_known() {
        let mut reg = SpecialistRegistry::new();
        reg.register(
            Phase::Planning,
            Arc::new(PlanningSpecialist::new(Arc::new(MockBackend))),
        );
        let err = reg.get(Phase::Testing).err().unwrap();
        assert!(matches!(err, MissionError::UnregisteredPhase { .. }));
        assert!(err.to_string().contains("PLANNING"));
    }
}
