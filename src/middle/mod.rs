pub mod lir;
pub mod optimization;
pub mod ssa;
pub mod ty;
