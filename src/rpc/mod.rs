pub mod cell;

pub use cell::{Cell, CellBus, LocalCell, TopicHandler};
