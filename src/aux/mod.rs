pub mod aux;

pub use aux::{register, send, AuxHandler};
