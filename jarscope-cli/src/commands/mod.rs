pub mod classes;
pub mod common;
pub mod deobfuscate;
