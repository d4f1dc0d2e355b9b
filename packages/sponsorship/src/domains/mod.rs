// Business domains
pub mod children;
pub mod imports;
pub mod reservations;
