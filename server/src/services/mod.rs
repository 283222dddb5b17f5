pub mod auth;
pub mod booking;
pub mod export;
pub mod fees;
pub mod inventory;
pub mod payments;
pub mod qr;
pub mod realtime;

pub use booking::BookingService;
pub use inventory::InventoryService;
