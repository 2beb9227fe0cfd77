mod id;
mod messages;
mod node;
mod routing_table;

pub use id::*;
pub use messages::*;
pub use node::*;
pub use routing_table::*;
