//! Integration test modules.

mod arbiter_failover_test;
mod controller_dispatch_test;
mod service_test;
