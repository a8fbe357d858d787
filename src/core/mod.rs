// Core modules implementing storage, framing, commands, and error modeling.
pub mod command;
pub mod error;
pub mod frame;
pub mod medium;
pub mod ring;
