mod read_write;

pub use read_write::register_benchmarks;
