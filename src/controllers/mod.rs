//! Background controllers: periodic or one-shot
//! tasks that run independently of any single client request. None of
//! them call a Provider *mutation* directly — only reads (`list_instances`)
//! happen here; every mutating call happens inside a Worker Pool job
//! handler, so it gets the same retry/timeout/concurrency treatment as
//! everything else the pool runs.

pub mod auto_stop;
pub mod migration;
pub mod reconciler;
