pub mod dtype;
pub mod sfbk;
pub mod sfont;
pub mod fileutils;
