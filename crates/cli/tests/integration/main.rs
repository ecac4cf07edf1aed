mod apply_tests;
mod common;
mod teardown_tests;
