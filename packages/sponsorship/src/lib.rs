// Sponsorship Reservation Core
//
// Claims children for sponsors without double-booking. A claim either selects
// every child it names or nothing; holds lapse on a schedule; roster imports
// keep each child's place in the availability ledger.
//
// Services live per-domain in domains/*; infrastructure traits in kernel/.

pub mod api;
pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
