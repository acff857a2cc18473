mod state_bank;

pub use state_bank::register_benchmarks;
