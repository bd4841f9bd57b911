pub mod campaign;
pub mod donation;
pub mod donor;
pub mod organization;
pub mod receipt;
pub mod recurring;
