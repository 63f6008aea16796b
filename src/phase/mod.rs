pub mod linprog;
pub mod reconstruction;
pub mod segmentation;
pub mod spline;
pub mod unfold;
