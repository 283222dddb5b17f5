pub mod booking;
pub mod facility;
pub mod pricing;
pub mod slot;
pub mod user;

pub use booking::{Booking, BookingKind, BookingStatus, PaymentMethod, PaymentStatus};
pub use facility::{Facility, Floor};
pub use pricing::PricingRule;
pub use slot::{Slot, SlotStatus, SlotSummary, VehicleType};
pub use user::{User, UserRole};
