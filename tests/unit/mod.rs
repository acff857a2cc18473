mod cache_tests;
mod journal_tests;
mod profile_tests;
mod session_tests;
mod support;
