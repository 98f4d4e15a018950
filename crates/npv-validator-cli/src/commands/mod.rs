pub mod npv;
pub mod stress;
pub mod validate;
