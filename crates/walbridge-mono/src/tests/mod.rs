pub mod args_test;
