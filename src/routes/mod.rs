pub mod campaigns;
pub mod donations;
pub mod health;
pub mod me;
pub mod organizations;
pub mod webhooks;
