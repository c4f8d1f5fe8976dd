use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::SchedulingStore;

use crate::error::SlotError;

/// Resolves "the doctor": the single bookable practitioner.
///
/// A configured id always wins. Otherwise the store is asked once for active
/// users with a doctor-capable role, and the answer is cached.
pub struct PractitionerResolver {
    configured: Option<Uuid>,
    store: Arc<dyn SchedulingStore>,
    resolved: OnceCell<Uuid>,
}

impl PractitionerResolver {
    pub fn new(configured: Option<Uuid>, store: Arc<dyn SchedulingStore>) -> Self {
        Self {
            configured,
            store,
            resolved: OnceCell::new(),
        }
    }

    pub async fn resolve(&self) -> Result<Uuid, SlotError> {
        if let Some(id) = self.configured {
            return Ok(id);
        }

        let id = self
            .resolved
            .get_or_try_init(|| async {
                debug!("Looking up active practitioner by role");
                let candidates = self.store.active_practitioners().await.map_err(SlotError::from)?;
                match candidates.as_slice() {
                    [id] => {
                        info!("Resolved active practitioner {}", id);
                        Ok(*id)
                    }
                    [] => Err(SlotError::NoPractitioner),
                    many => Err(SlotError::AmbiguousPractitioner(many.len())),
                }
            })
            .await?;

        Ok(*id)
    }
}
