//! Domain types shared by the appointment poller: the user's constraints, the
//! held appointment, candidate slots, the secondary-facility availability map
//! and the wire format of the scheduling service's JSON endpoints.

pub mod api;
pub mod models;

pub use api::{AvailableDay, AvailableTimes};
pub use models::{
    CandidateSlot, Constraints, DateVerdict, HeldAppointment, SecondaryAvailability,
    SecondarySlot, SECONDARY_LEAD_DAYS,
};
