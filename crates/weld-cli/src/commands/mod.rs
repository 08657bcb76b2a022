pub mod bundle;
pub mod resolve;
pub mod version;
