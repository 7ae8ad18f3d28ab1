pub mod keys;
pub mod optimizer;
pub mod prober;
pub mod traffic;
