pub mod wemo;
