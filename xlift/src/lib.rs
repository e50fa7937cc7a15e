pub mod ast;
pub mod builder;
pub mod c_printer;
pub mod constant_folding;
pub mod containers;
pub mod dataflow;
pub mod diagnostics;
pub mod dictionary;
pub mod error;
pub mod fact_loader;
pub mod instr_xdata;
pub mod interned;
pub mod lift_config;
pub mod lifter;
pub mod log;
pub mod opcode;
pub mod provenance;
pub mod symbol_table;
#[cfg(test)]
mod tests;
pub mod xvalue;
