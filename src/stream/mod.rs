pub mod decoder;
pub mod frame;
pub mod multiplexer;
pub mod reassembler;

pub use multiplexer::{ multiplex, FrameStream, Multiplexer };
pub use reassembler::StreamReassembler;
