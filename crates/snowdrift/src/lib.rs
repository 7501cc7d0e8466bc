#![cfg_attr(docsrs, feature(doc_cfg))]
//! Snowflake-style 64-bit identifiers with pluggable sequence resolvers.
//!
//! An ID is packed as `timestamp | datacenter id | worker id | sequence`
//! (most significant bit first, top bit always zero). The [`Generator`] reads
//! the clock, asks a [`SequenceResolver`] for the next sequence in the current
//! millisecond bucket and encodes the result with a [`BitLayout`].
//!
//! The resolver decides how far the uniqueness guarantee reaches:
//!
//! - [`InProcessResolver`]: threads of one process.
//! - [`AtomicStoreResolver`]: every process sharing an [`AtomicStore`].
//! - [`FileLockResolver`]: every process sharing a lock directory.
//!
//! ```
//! use snowdrift::Generator;
//!
//! let generator = Generator::new(1, 7).unwrap();
//! let id = generator.next_id().unwrap();
//! let parts = generator.decode(id);
//! assert_eq!(parts.datacenter_id, 1);
//! assert_eq!(parts.worker_id, 7);
//! ```

mod deadline;
mod error;
mod generator;
mod id;
mod layout;
mod mutex;
mod resolver;
mod time;

pub use crate::deadline::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::id::*;
pub use crate::layout::*;
pub use crate::resolver::*;
pub use crate::time::*;
