pub mod block;
pub mod node_id;
pub mod transaction;

pub use block::{Block, BlockId};
pub use node_id::NodeId;
pub use transaction::Transaction;
