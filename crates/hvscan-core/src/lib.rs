pub mod align;
pub mod analysis;
pub mod reference;
pub mod report;
pub mod stats;
pub mod types;
