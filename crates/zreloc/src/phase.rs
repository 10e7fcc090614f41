//! Phase Controller - Global Phase and Mask Publication
//!
//! Owns the current [`AddressView`]. Phase flips replace the view under an
//! exclusive lock; barriers take a copy with [`PhaseController::view`] and
//! use it for the whole barrier call.
//!
//! Cycle:
//! ```text
//! Relocate --flip_to_marked--> Mark --mark_completed--> MarkCompleted
//!    ^                                                       |
//!    +------------------- flip_to_remapped ------------------+
//! ```

use crate::barrier::address_space::{AddressLayout, AddressView, GlobalPhase};
use crate::error::{RelocError, Result};
use crate::logging::{RelocEvent, RelocLogger};
use parking_lot::RwLock;
use std::sync::Arc;

/// PhaseController - publishes address views
pub struct PhaseController {
    view: RwLock<AddressView>,
    logger: Option<Arc<RelocLogger>>,
}

impl PhaseController {
    /// Start in the Relocate phase with Remapped as the good color
    pub fn new(layout: AddressLayout) -> Self {
        Self {
            view: RwLock::new(AddressView::initial(layout)),
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<RelocLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Current view
    pub fn view(&self) -> AddressView {
        *self.view.read()
    }

    pub fn phase(&self) -> GlobalPhase {
        self.view.read().phase()
    }

    fn flip<F>(&self, expected: GlobalPhase, next: F) -> Result<AddressView>
    where
        F: FnOnce(&AddressView) -> AddressView,
    {
        let mut view = self.view.write();
        if view.phase() != expected {
            return Err(RelocError::InvalidState {
                expected: expected.to_string(),
                actual: view.phase().to_string(),
            });
        }

        *view = next(&*view);
        let flipped = *view;
        drop(view);

        log::debug!(
            "phase flip: {} (seq {}, good {:#x})",
            flipped.phase(),
            flipped.seqnum(),
            flipped.good_mask()
        );
        if let Some(logger) = &self.logger {
            logger.log(RelocEvent::PhaseFlip {
                phase: flipped.phase(),
                seqnum: flipped.seqnum(),
            });
        }
        Ok(flipped)
    }

    /// Mark start: alternate the marked bit, which becomes the good color
    ///
    /// # Errors
    /// `InvalidState` unless the current phase is Relocate.
    pub fn flip_to_marked(&self) -> Result<AddressView> {
        self.flip(GlobalPhase::Relocate, AddressView::flipped_to_marked)
    }

    /// Mark end
    ///
    /// # Errors
    /// `InvalidState` unless the current phase is Mark.
    pub fn mark_completed(&self) -> Result<AddressView> {
        self.flip(GlobalPhase::Mark, AddressView::mark_completed)
    }

    /// Relocate start: Remapped becomes the good color
    ///
    /// Install the relocation set's forwarding records before calling this.
    ///
    /// # Errors
    /// `InvalidState` unless the current phase is MarkCompleted.
    pub fn flip_to_remapped(&self) -> Result<AddressView> {
        self.flip(GlobalPhase::MarkCompleted, AddressView::flipped_to_remapped)
    }
}

impl std::fmt::Debug for PhaseController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseController")
            .field("view", &self.view())
            .finish()
    }
}
