mod change_tests;
mod common;
mod version_tests;
