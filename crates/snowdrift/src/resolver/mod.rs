mod atomic_store;
mod file_lock;
mod in_process;
mod interface;
#[cfg(feature = "redis")]
mod redis_store;
mod store;

pub use atomic_store::*;
pub use file_lock::*;
pub use in_process::*;
pub use interface::*;
#[cfg(feature = "redis")]
pub use redis_store::*;
pub use store::*;
