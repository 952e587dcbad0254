pub mod code;
pub mod compile;
pub mod compile_error;
pub mod env;
pub mod op;
pub mod text;

pub use code::Code;
pub use compile::CodeGenerator;
pub use compile_error::CompileError;
pub use op::Instr;
