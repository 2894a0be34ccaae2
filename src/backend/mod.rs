pub mod pool;
pub mod protocol;
pub mod traits;
