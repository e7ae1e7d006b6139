pub mod inference;
pub mod ols;
pub mod robust;
