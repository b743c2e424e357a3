mod circuit_breaker_tests;
mod retry_tests;
