// Криптографические наборы

pub mod classic;

pub use classic::ClassicSuiteProvider;
