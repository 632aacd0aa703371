pub mod reconcile;
pub mod session;
pub mod store;
pub mod upload;
pub mod view;
