pub mod standardize;
