mod common;

mod batch;
