//! Barrier Module - Colored Addresses & Load Barriers
//!
//! Colored Addresses:
//! Collector metadata lives in the address bits directly above the heap
//! offset. A reference's color says which phase last vouched for it, so a
//! barrier can tell a current reference from a stale one with a single mask
//! test, without touching the object.
//!
//! Load Barriers:
//! Intercept reference loads to:
//! - Pass good references through unchanged (fast path)
//! - Redirect stale references to relocated objects (forwarding lookup)
//! - Write the resolved address back into the field (self-healing)
//!
//! Masks are never read from globals: every call takes the
//! [`AddressView`](address_space::AddressView) of the current phase.

pub mod address_space;
pub mod colored_ptr;
pub mod load_barrier;
pub mod stats;

pub use address_space::{AddressLayout, AddressView, Color, GlobalPhase};
pub use colored_ptr::ColoredAddress;
pub use load_barrier::Barrier;
pub use stats::{BarrierCounters, BarrierStats};
