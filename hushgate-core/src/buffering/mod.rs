//! Audio containers shared by the capture callback and the consumer.
//!
//! - [`chunk`]: the `AudioChunk` value type and sample conversions.
//! - [`pre_roll`]: bounded ring of raw chunks kept while idle.
//! - [`queue`]: the bounded delivery queue, the only structure that crosses
//!   from the capture callback to the consumer thread.

pub mod chunk;
pub mod pre_roll;
pub mod queue;

pub use chunk::AudioChunk;
pub use pre_roll::{PreRollBuffer, PRE_ROLL_CAPACITY};
pub use queue::{delivery_queue, DeliveryConsumer, DeliveryItem, DeliveryProducer};
