mod common;
mod pushdown_parity_test;
