pub mod attempt;
pub mod cancel;
pub mod capture;
pub mod error;
pub mod event_loop;
pub mod hexdump;
pub mod store;
pub mod sweep;

pub use error::SweepError;
