pub mod child;
pub mod family;

pub use child::{Child, ChildKey, ChildProfile, ChildStatus};
pub use family::{Family, FamilySummary};
