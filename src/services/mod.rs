pub mod aggregates;
pub mod receipts;
pub mod reconcile;
pub mod stripe;
