pub mod crl;
pub mod keys;
pub mod process;
pub mod store;
