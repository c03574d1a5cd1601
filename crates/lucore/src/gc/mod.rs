//! The garbage-collected object heap: typed ids, arena storage, GC headers,
//! the object wrappers, and the incremental collector itself.

mod arena;
mod collector;
mod header;
mod ids;
mod object;
mod pool;

pub use arena::Arena;
pub use collector::{Collector, GcOptions, Phase};
pub use header::{Age, GcHeader};
pub use ids::{FunctionId, GcRef, StringId, TableId, ThreadId, UpvalueId, UserdataId};
pub use object::{GcClosure, GcString, GcTable, GcThread, GcUpvalue, GcUserdata};
pub use pool::GcPool;
