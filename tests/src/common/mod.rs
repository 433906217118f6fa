pub mod asm;
pub mod ir;
pub mod machine;
