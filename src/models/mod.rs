mod actor;
mod collab;
mod event;
mod node;
mod opcode;
mod point;
mod stream;

pub use actor::{Actor, ActorType};
pub use collab::Collab;
pub use event::{NewEvent, OrEvent};
pub use node::{Node, NodeType};
pub use opcode::Opcode;
pub use point::Point;
pub use stream::{Stream, StreamCollab, StreamRole};
