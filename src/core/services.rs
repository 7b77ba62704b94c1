//! Implementations for the service the app needs.
//!

use crate::core::gate::{AccessResult, ResourceGate};
use crate::core::readiness::ReadinessCell;
use crate::core::traits::{LanguageModel, ModelAccess};
use di::{Ref, inject, injectable};

/// The process-wide model slot, populated once by the model worker.
pub type ModelSlot = ReadinessCell<dyn LanguageModel>;

pub struct ModelGate {
    gate: ResourceGate<dyn LanguageModel>,
}

#[injectable(ModelAccess)]
impl ModelGate {
    #[inject]
    pub fn create(slot: Ref<ModelSlot>) -> ModelGate {
        ModelGate {
            gate: ResourceGate::new(slot, "LLM model"),
        }
    }
}

impl ModelAccess for ModelGate {
    fn acquire(&self) -> AccessResult<dyn LanguageModel> {
        self.gate.acquire()
    }

    fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    fn model_name(&self) -> Option<String> {
        self.gate.peek().map(|model| model.name().to_owned())
    }
}
