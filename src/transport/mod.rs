pub mod unicast;

pub use unicast::{BoxedReader, BoxedWriter, Direction, Scheduler, SecureUnicast};
