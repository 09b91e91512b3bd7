pub mod error;
pub mod packet;
pub mod task;
pub mod task_set;


pub use error::{GearmanError, Result};
pub use packet::{PacketType, Request, ServerMessage};
pub use task::{Task, TaskState, TaskType};
pub use task_set::TaskSet;
