pub mod optimizer;
pub mod zphi;
