pub mod extract;
pub mod identity;
pub mod merge;
pub mod runner;
pub mod test_suite;
